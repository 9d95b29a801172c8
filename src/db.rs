use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::{
    Application, ApplicationStatus, Letter, Offer, OfferDraft, OfferPatch, Profile, ProfilePatch,
};

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // SQLite does not enforce foreign keys unless asked to.
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS profile (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                phone TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                postal_code TEXT NOT NULL DEFAULT '',
                country TEXT NOT NULL DEFAULT '',
                headline TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                linkedin TEXT NOT NULL DEFAULT '',
                github TEXT NOT NULL DEFAULT '',
                portfolio TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS offers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT,
                contract_type TEXT,
                description TEXT,
                source TEXT,
                url TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                offer_id INTEGER NOT NULL REFERENCES offers(id),
                status TEXT NOT NULL DEFAULT 'todo' CHECK (status IN ('todo', 'sent', 'in_progress', 'rejected', 'interview')),
                submitted_at TEXT,
                notes TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL UNIQUE REFERENCES applications(id),
                template_id TEXT NOT NULL,
                html TEXT NOT NULL,
                overrides TEXT NOT NULL DEFAULT '{}',
                generated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_applications_offer ON applications(offer_id);
            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);
            CREATE INDEX IF NOT EXISTS idx_letters_application ON letters(application_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='offers'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(Error::Conflict(
                "database not initialized, run 'dossier init' first".into(),
            ));
        }
        Ok(())
    }

    // --- Profile operations ---

    /// The profile is a single row; when none exists yet an empty default is
    /// returned instead of an error.
    pub fn get_profile(&self) -> Result<Profile> {
        let result = self.conn.query_row(
            "SELECT first_name, last_name, email, phone, address, city, postal_code,
                    country, headline, summary, linkedin, github, portfolio
             FROM profile WHERE id = 1",
            [],
            Self::row_to_profile,
        );
        match result {
            Ok(profile) => Ok(profile),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Profile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge-update: fields absent from the patch keep their stored value.
    pub fn update_profile(&self, patch: &ProfilePatch) -> Result<Profile> {
        let mut profile = self.get_profile()?;
        patch.apply(&mut profile);
        self.conn.execute(
            "INSERT OR REPLACE INTO profile
                (id, first_name, last_name, email, phone, address, city, postal_code,
                 country, headline, summary, linkedin, github, portfolio)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                profile.first_name,
                profile.last_name,
                profile.email,
                profile.phone,
                profile.address,
                profile.city,
                profile.postal_code,
                profile.country,
                profile.headline,
                profile.summary,
                profile.linkedin,
                profile.github,
                profile.portfolio,
            ],
        )?;
        info!("profile updated");
        self.get_profile()
    }

    fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
        Ok(Profile {
            first_name: row.get(0)?,
            last_name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            address: row.get(4)?,
            city: row.get(5)?,
            postal_code: row.get(6)?,
            country: row.get(7)?,
            headline: row.get(8)?,
            summary: row.get(9)?,
            linkedin: row.get(10)?,
            github: row.get(11)?,
            portfolio: row.get(12)?,
        })
    }

    // --- Offer operations ---

    pub fn create_offer(&self, draft: &OfferDraft) -> Result<Offer> {
        if draft.title.trim().is_empty() {
            return Err(Error::validation("title", "offer title must not be empty"));
        }
        if draft.company.trim().is_empty() {
            return Err(Error::validation(
                "company",
                "offer company must not be empty",
            ));
        }
        self.conn.execute(
            "INSERT INTO offers (title, company, location, contract_type, description, source, url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                draft.title.trim(),
                draft.company.trim(),
                draft.location,
                draft.contract_type,
                draft.description,
                draft.source,
                draft.url,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, "offer created");
        self.get_offer(id)
    }

    pub fn get_offer(&self, id: i64) -> Result<Offer> {
        let result = self.conn.query_row(
            "SELECT id, title, company, location, contract_type, description, source, url, created_at
             FROM offers WHERE id = ?1",
            [id],
            Self::row_to_offer,
        );
        match result {
            Ok(offer) => Ok(offer),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::not_found("offer", id)),
            Err(e) => Err(e.into()),
        }
    }

    /// List offers, newest first. `search` is a LIKE match over title,
    /// company and description; `company` narrows to one company.
    pub fn list_offers(&self, search: Option<&str>, company: Option<&str>) -> Result<Vec<Offer>> {
        let mut sql = String::from(
            "SELECT id, title, company, location, contract_type, description, source, url, created_at
             FROM offers WHERE 1=1",
        );

        let mut args: Vec<String> = vec![];

        if let Some(text) = search {
            sql.push_str(&format!(
                " AND (title LIKE ?{n} OR company LIKE ?{n} OR description LIKE ?{n})",
                n = args.len() + 1
            ));
            args.push(format!("%{}%", text.trim()));
        }

        if let Some(c) = company {
            sql.push_str(&format!(" AND LOWER(company) = LOWER(?{})", args.len() + 1));
            args.push(c.trim().to_string());
        }

        sql.push_str(" ORDER BY id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match args.len() {
            0 => stmt.query_map([], Self::row_to_offer)?,
            1 => stmt.query_map([&args[0]], Self::row_to_offer)?,
            2 => stmt.query_map([&args[0], &args[1]], Self::row_to_offer)?,
            _ => unreachable!("at most two filters"),
        };

        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn update_offer(&self, id: i64, patch: &OfferPatch) -> Result<Offer> {
        let current = self.get_offer(id)?;

        let title = patch.title.as_deref().unwrap_or(&current.title);
        let company = patch.company.as_deref().unwrap_or(&current.company);
        if title.trim().is_empty() {
            return Err(Error::validation("title", "offer title must not be empty"));
        }
        if company.trim().is_empty() {
            return Err(Error::validation(
                "company",
                "offer company must not be empty",
            ));
        }

        let location = patch.location.clone().or(current.location);
        let contract_type = patch.contract_type.clone().or(current.contract_type);
        let description = patch.description.clone().or(current.description);
        let source = patch.source.clone().or(current.source);
        let url = patch.url.clone().or(current.url);

        self.conn.execute(
            "UPDATE offers
             SET title = ?1, company = ?2, location = ?3, contract_type = ?4,
                 description = ?5, source = ?6, url = ?7
             WHERE id = ?8",
            params![
                title.trim(),
                company.trim(),
                location,
                contract_type,
                description,
                source,
                url,
                id
            ],
        )?;
        info!(id, "offer updated");
        self.get_offer(id)
    }

    /// Delete an offer and everything hanging off it. The whole cascade runs
    /// in one transaction: either the offer, its applications and their
    /// letters all go, or nothing does.
    pub fn delete_offer(&self, id: i64) -> Result<()> {
        self.get_offer(id)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM letters WHERE application_id IN
                 (SELECT id FROM applications WHERE offer_id = ?1)",
            [id],
        )?;
        tx.execute("DELETE FROM applications WHERE offer_id = ?1", [id])?;
        tx.execute("DELETE FROM offers WHERE id = ?1", [id])?;
        tx.commit()?;
        info!(id, "offer deleted (with applications and letters)");
        Ok(())
    }

    fn row_to_offer(row: &rusqlite::Row) -> rusqlite::Result<Offer> {
        Ok(Offer {
            id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            contract_type: row.get(4)?,
            description: row.get(5)?,
            source: row.get(6)?,
            url: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    // --- Application operations ---

    pub fn create_application(&self, offer_id: i64, notes: Option<&str>) -> Result<Application> {
        self.get_offer(offer_id)?;
        self.conn.execute(
            "INSERT INTO applications (offer_id, notes) VALUES (?1, ?2)",
            params![offer_id, notes],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(id, offer_id, "application created");
        self.get_application(id)
    }

    pub fn get_application(&self, id: i64) -> Result<Application> {
        let result = self.conn.query_row(
            "SELECT a.id, a.offer_id, o.title, o.company, a.status, a.submitted_at, a.notes, a.created_at
             FROM applications a
             JOIN offers o ON a.offer_id = o.id
             WHERE a.id = ?1",
            [id],
            Self::row_to_application,
        );
        match result {
            Ok(app) => Ok(app),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::not_found("application", id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_applications(&self, status: Option<ApplicationStatus>) -> Result<Vec<Application>> {
        let mut sql = String::from(
            "SELECT a.id, a.offer_id, o.title, o.company, a.status, a.submitted_at, a.notes, a.created_at
             FROM applications a
             JOIN offers o ON a.offer_id = o.id",
        );
        if status.is_some() {
            sql.push_str(" WHERE a.status = ?1");
        }
        sql.push_str(" ORDER BY a.id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s.as_str()], Self::row_to_application)?
        } else {
            stmt.query_map([], Self::row_to_application)?
        };
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_for_offer(&self, offer_id: i64) -> Result<Vec<Application>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.offer_id, o.title, o.company, a.status, a.submitted_at, a.notes, a.created_at
             FROM applications a
             JOIN offers o ON a.offer_id = o.id
             WHERE a.offer_id = ?1
             ORDER BY a.id DESC",
        )?;
        let rows = stmt.query_map([offer_id], Self::row_to_application)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Change an application's status. The first transition into Sent stamps
    /// the submission date; later transitions never touch it.
    pub fn update_status(&self, id: i64, status: ApplicationStatus) -> Result<Application> {
        let app = self.get_application(id)?;

        let submitted_at = match (status, &app.submitted_at) {
            (ApplicationStatus::Sent, None) => {
                Some(chrono::Local::now().format("%Y-%m-%d").to_string())
            }
            (_, existing) => existing.clone(),
        };

        self.conn.execute(
            "UPDATE applications SET status = ?1, submitted_at = ?2 WHERE id = ?3",
            params![status.as_str(), submitted_at, id],
        )?;
        info!(id, status = status.as_str(), "application status updated");
        self.get_application(id)
    }

    pub fn set_notes(&self, id: i64, notes: &str) -> Result<Application> {
        self.get_application(id)?;
        self.conn.execute(
            "UPDATE applications SET notes = ?1 WHERE id = ?2",
            params![notes, id],
        )?;
        self.get_application(id)
    }

    /// Delete an application together with its letter, atomically.
    pub fn delete_application(&self, id: i64) -> Result<()> {
        self.get_application(id)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM letters WHERE application_id = ?1", [id])?;
        tx.execute("DELETE FROM applications WHERE id = ?1", [id])?;
        tx.commit()?;
        info!(id, "application deleted (with letter)");
        Ok(())
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<Application> {
        let status_raw: String = row.get(4)?;
        let status = status_raw.parse::<ApplicationStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Application {
            id: row.get(0)?,
            offer_id: row.get(1)?,
            offer_title: row.get(2)?,
            offer_company: row.get(3)?,
            status,
            submitted_at: row.get(5)?,
            notes: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    // --- Letter operations ---

    /// Store a rendered letter for an application, replacing any previous
    /// one. An application has at most one current letter.
    pub fn upsert_letter(
        &self,
        application_id: i64,
        template_id: &str,
        html: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Letter> {
        let overrides_json = serde_json::to_string(overrides)?;
        self.conn.execute(
            "INSERT INTO letters (application_id, template_id, html, overrides, generated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(application_id) DO UPDATE SET
                 template_id = excluded.template_id,
                 html = excluded.html,
                 overrides = excluded.overrides,
                 generated_at = excluded.generated_at",
            params![application_id, template_id, html, overrides_json],
        )?;
        debug!(application_id, template_id, "letter stored");
        self.get_letter(application_id)?
            .ok_or_else(|| Error::not_found("letter", application_id))
    }

    pub fn get_letter(&self, application_id: i64) -> Result<Option<Letter>> {
        let result = self.conn.query_row(
            "SELECT id, application_id, template_id, html, overrides, generated_at
             FROM letters WHERE application_id = ?1",
            [application_id],
            Self::row_to_letter,
        );
        match result {
            Ok(letter) => Ok(Some(letter)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn row_to_letter(row: &rusqlite::Row) -> rusqlite::Result<Letter> {
        let overrides_json: String = row.get(4)?;
        let overrides = serde_json::from_str(&overrides_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Letter {
            id: row.get(0)?,
            application_id: row.get(1)?,
            template_id: row.get(2)?,
            html: row.get(3)?,
            overrides,
            generated_at: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn sample_offer(db: &Database) -> Offer {
        db.create_offer(&OfferDraft {
            title: "Backend Engineer".into(),
            company: "Acme".into(),
            location: Some("Geneva".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn create_offer_rejects_empty_title_and_company() {
        let db = test_db();
        let err = db
            .create_offer(&OfferDraft {
                title: "  ".into(),
                company: "Acme".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "title", .. }));

        let err = db
            .create_offer(&OfferDraft {
                title: "Backend Engineer".into(),
                company: "".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation { field: "company", .. }));
    }

    #[test]
    fn update_missing_offer_is_not_found() {
        let db = test_db();
        let err = db.update_offer(42, &OfferPatch::default()).unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "offer", .. }));
    }

    #[test]
    fn update_offer_keeps_omitted_fields() {
        let db = test_db();
        let offer = sample_offer(&db);
        let updated = db
            .update_offer(
                offer.id,
                &OfferPatch {
                    title: Some("Senior Backend Engineer".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Senior Backend Engineer");
        assert_eq!(updated.company, "Acme");
        assert_eq!(updated.location.as_deref(), Some("Geneva"));
    }

    #[test]
    fn list_offers_filters_by_search_and_company() {
        let db = test_db();
        sample_offer(&db);
        db.create_offer(&OfferDraft {
            title: "Data Analyst".into(),
            company: "Globex".into(),
            ..Default::default()
        })
        .unwrap();

        let hits = db.list_offers(Some("backend"), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].company, "Acme");

        let hits = db.list_offers(None, Some("globex")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Data Analyst");

        assert_eq!(db.list_offers(None, None).unwrap().len(), 2);
    }

    #[test]
    fn create_application_requires_existing_offer() {
        let db = test_db();
        let err = db.create_application(99, None).unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "offer", .. }));
    }

    #[test]
    fn sent_date_is_stamped_once() {
        let db = test_db();
        let offer = sample_offer(&db);
        let app = db.create_application(offer.id, None).unwrap();
        assert_eq!(app.status, ApplicationStatus::Todo);
        assert!(app.submitted_at.is_none());

        let app = db.update_status(app.id, ApplicationStatus::Sent).unwrap();
        assert!(app.submitted_at.is_some());

        // Backdate the stamp, then bounce through other statuses and back to
        // Sent: the original date must survive.
        db.conn
            .execute(
                "UPDATE applications SET submitted_at = '2000-01-01' WHERE id = ?1",
                [app.id],
            )
            .unwrap();
        let app = db
            .update_status(app.id, ApplicationStatus::InProgress)
            .unwrap();
        assert_eq!(app.submitted_at.as_deref(), Some("2000-01-01"));
        let app = db.update_status(app.id, ApplicationStatus::Sent).unwrap();
        assert_eq!(app.submitted_at.as_deref(), Some("2000-01-01"));
    }

    #[test]
    fn delete_offer_cascades_to_applications_and_letters() {
        let db = test_db();
        let offer = sample_offer(&db);
        let a1 = db.create_application(offer.id, None).unwrap();
        let a2 = db.create_application(offer.id, Some("second try")).unwrap();
        db.upsert_letter(a1.id, "modern", "<html></html>", &BTreeMap::new())
            .unwrap();

        db.delete_offer(offer.id).unwrap();

        assert!(matches!(
            db.get_offer(offer.id).unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            db.get_application(a1.id).unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            db.get_application(a2.id).unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(db.get_letter(a1.id).unwrap().is_none());
    }

    #[test]
    fn delete_application_cascades_to_letter() {
        let db = test_db();
        let offer = sample_offer(&db);
        let app = db.create_application(offer.id, None).unwrap();
        db.upsert_letter(app.id, "modern", "<html></html>", &BTreeMap::new())
            .unwrap();

        db.delete_application(app.id).unwrap();
        assert!(db.get_letter(app.id).unwrap().is_none());
        // The offer itself survives.
        assert_eq!(db.get_offer(offer.id).unwrap().id, offer.id);
    }

    #[test]
    fn profile_defaults_to_empty_and_merges_updates() {
        let db = test_db();
        let profile = db.get_profile().unwrap();
        assert!(profile.full_name().is_empty());

        db.update_profile(&ProfilePatch {
            first_name: Some("Jane".into()),
            last_name: Some("Doe".into()),
            email: Some("jane@example.org".into()),
            ..Default::default()
        })
        .unwrap();

        // A later partial update leaves other fields alone.
        let profile = db
            .update_profile(&ProfilePatch {
                city: Some("Lausanne".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(profile.full_name(), "Jane Doe");
        assert_eq!(profile.email, "jane@example.org");
        assert_eq!(profile.city, "Lausanne");
    }

    #[test]
    fn upsert_letter_replaces_previous_letter() {
        let db = test_db();
        let offer = sample_offer(&db);
        let app = db.create_application(offer.id, None).unwrap();

        db.upsert_letter(app.id, "modern", "<p>one</p>", &BTreeMap::new())
            .unwrap();
        let mut overrides = BTreeMap::new();
        overrides.insert("intro".to_string(), "Hello".to_string());
        db.upsert_letter(app.id, "classic", "<p>two</p>", &overrides)
            .unwrap();

        let letter = db.get_letter(app.id).unwrap().unwrap();
        assert_eq!(letter.template_id, "classic");
        assert_eq!(letter.html, "<p>two</p>");
        assert_eq!(letter.overrides.get("intro").map(String::as_str), Some("Hello"));

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM letters", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
