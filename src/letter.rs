use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Application, ApplicationStatus, Letter, Offer, Profile};
use crate::templates::TemplateStore;

/// Renders cover letters by merging the candidate profile, an offer and
/// caller-supplied section overrides through a template. Rendering is
/// deterministic: the same inputs always produce byte-identical HTML.
pub struct LetterEngine<'a> {
    db: &'a Database,
    templates: &'a TemplateStore,
}

impl<'a> LetterEngine<'a> {
    pub fn new(db: &'a Database, templates: &'a TemplateStore) -> Self {
        Self { db, templates }
    }

    /// Render a letter for an application and store it, replacing any
    /// previous letter for that application.
    ///
    /// An application already marked Sent is an audit trail of what was
    /// actually submitted; re-rendering it requires `force`.
    pub fn render(
        &self,
        application_id: i64,
        template_id: &str,
        overrides: &BTreeMap<String, String>,
        force: bool,
    ) -> Result<Letter> {
        let application = self.db.get_application(application_id)?;
        if application.status == ApplicationStatus::Sent && !force {
            return Err(Error::Conflict(format!(
                "application {application_id} was already sent; re-render with --force to overwrite its letter"
            )));
        }

        let offer = self.db.get_offer(application.offer_id)?;
        let profile = self.db.get_profile()?;
        let markup = self.templates.load(template_id)?;

        let context = build_context(&profile, &offer, &application, overrides)?;
        let html = render_markup(&markup, &context)?;

        let letter = self
            .db
            .upsert_letter(application_id, template_id, &html, overrides)?;
        info!(application_id, template_id, "letter rendered");
        Ok(letter)
    }

    /// Write the stored letter to `output_dir` for external preview. This is
    /// an explicit caller request, never a side effect of `render`.
    pub fn export(&self, application_id: i64, output_dir: &Path) -> Result<PathBuf> {
        let letter = self
            .db
            .get_letter(application_id)?
            .ok_or_else(|| Error::not_found("letter", application_id))?;
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("letter_application_{application_id}.html"));
        std::fs::write(&path, &letter.html)?;
        info!(application_id, path = %path.display(), "letter exported");
        Ok(path)
    }
}

/// Build the rendering context. Every declared variable is always present:
/// optional fields degrade to the empty string so `{% if ... %}` blocks can
/// omit them, while the required ones are checked up front.
fn build_context(
    profile: &Profile,
    offer: &Offer,
    application: &Application,
    overrides: &BTreeMap<String, String>,
) -> Result<tera::Context> {
    let name = profile.full_name();
    if name.is_empty() {
        return Err(Error::TemplateRender(
            "required variable 'candidate.name' is empty; fill in the profile first".into(),
        ));
    }
    if offer.title.trim().is_empty() {
        return Err(Error::TemplateRender(
            "required variable 'offer.title' is empty".into(),
        ));
    }

    let mut ctx = tera::Context::new();
    ctx.insert(
        "candidate",
        &serde_json::json!({
            "name": name,
            "first_name": profile.first_name,
            "last_name": profile.last_name,
            "email": profile.email,
            "phone": profile.phone,
            "address": profile.address,
            "city": profile.city,
            "postal_code": profile.postal_code,
            "country": profile.country,
            "headline": profile.headline,
            "summary": profile.summary,
            "linkedin": profile.linkedin,
            "github": profile.github,
            "portfolio": profile.portfolio,
        }),
    );
    ctx.insert(
        "offer",
        &serde_json::json!({
            "title": offer.title,
            "company": offer.company,
            "location": offer.location.clone().unwrap_or_default(),
            "contract_type": offer.contract_type.clone().unwrap_or_default(),
            "description": offer.description.clone().unwrap_or_default(),
            "source": offer.source.clone().unwrap_or_default(),
            "url": offer.url.clone().unwrap_or_default(),
        }),
    );
    ctx.insert(
        "application",
        &serde_json::json!({
            "status": application.status.as_str(),
            "submitted_at": application.submitted_at.clone().unwrap_or_default(),
            "notes": application.notes.clone().unwrap_or_default(),
        }),
    );

    for (key, text) in default_sections(profile, offer) {
        ctx.insert(key, &text);
    }
    // Overrides win over computed defaults; unknown names become extra
    // context entries for custom templates.
    for (key, text) in overrides {
        ctx.insert(key.as_str(), text);
    }

    Ok(ctx)
}

/// Editable sections and their computed defaults.
fn default_sections(profile: &Profile, offer: &Offer) -> Vec<(&'static str, String)> {
    let intro = format!(
        "I am writing to apply for the {} position at {}.",
        offer.title, offer.company
    );
    let motivation = if !profile.summary.is_empty() {
        profile.summary.clone()
    } else if !profile.headline.is_empty() {
        format!(
            "As a {}, I believe my background is a strong match for this role.",
            profile.headline
        )
    } else {
        "I believe my background and experience are a strong match for this role.".to_string()
    };
    let closing = "I would welcome the opportunity to discuss my application with you. \
                   Thank you for your time and consideration."
        .to_string();
    vec![("intro", intro), ("motivation", motivation), ("closing", closing)]
}

fn render_markup(markup: &str, context: &tera::Context) -> Result<String> {
    let mut tera = tera::Tera::default();
    // Tera ships builtins that read the clock, the environment or a RNG.
    // Letters must be reproducible, so those are replaced with hard errors.
    tera.register_function("now", deny("now"));
    tera.register_function("get_random", deny("get_random"));
    tera.register_function("get_env", deny("get_env"));
    // The .html name turns tera's autoescaping on.
    tera.add_raw_template("letter.html", markup)
        .map_err(|e| Error::TemplateRender(describe(&e)))?;
    tera.render("letter.html", context)
        .map_err(|e| Error::TemplateRender(describe(&e)))
}

fn deny(name: &'static str) -> impl tera::Function {
    move |_args: &std::collections::HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
        Err(tera::Error::msg(format!(
            "function '{name}' is disabled: letters must render reproducibly"
        )))
    }
}

/// Flatten a tera error and its source chain into one line; the chain is
/// where tera names the offending variable or block.
fn describe(e: &tera::Error) -> String {
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OfferDraft, ProfilePatch};

    struct Fixture {
        db: Database,
        store: TemplateStore,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        store.seed_builtins().unwrap();
        Fixture {
            db,
            store,
            _dir: dir,
        }
    }

    fn set_profile(db: &Database) {
        db.update_profile(&ProfilePatch {
            first_name: Some("Jane".into()),
            last_name: Some("Doe".into()),
            email: Some("jane@example.org".into()),
            ..Default::default()
        })
        .unwrap();
    }

    fn make_application(db: &Database, title: &str, company: &str) -> i64 {
        let offer = db
            .create_offer(&OfferDraft {
                title: title.into(),
                company: company.into(),
                ..Default::default()
            })
            .unwrap();
        db.create_application(offer.id, None).unwrap().id
    }

    #[test]
    fn render_is_deterministic() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);

        let first = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap();
        let second = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap();
        assert_eq!(first.html, second.html);
    }

    #[test]
    fn todo_application_renders_offer_without_sent_date() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);

        let letter = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap();
        assert!(letter.html.contains("Backend Engineer"));
        assert!(letter.html.contains("Acme"));
        assert!(!letter.html.contains("Sent on"));
    }

    #[test]
    fn overrides_take_precedence_over_defaults() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Data Analyst", "Globex");
        let engine = LetterEngine::new(&f.db, &f.store);

        let mut overrides = BTreeMap::new();
        overrides.insert("intro".to_string(), "Custom opening line.".to_string());
        let letter = engine.render(app_id, "modern", &overrides, false).unwrap();

        assert!(letter.html.contains("Custom opening line."));
        assert!(!letter.html.contains("I am writing to apply"));
        assert!(letter.html.contains("Jane Doe"));
        assert!(letter.html.contains("Data Analyst"));
    }

    #[test]
    fn sent_application_requires_force() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);
        engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap();

        f.db.update_status(app_id, ApplicationStatus::Sent).unwrap();

        let err = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // With force the letter is replaced and now carries the sent date.
        let letter = engine
            .render(app_id, "modern", &BTreeMap::new(), true)
            .unwrap();
        assert!(letter.html.contains("Sent on"));
    }

    #[test]
    fn empty_candidate_name_is_a_render_error() {
        let f = fixture();
        // No profile set: candidate.name is required and empty.
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);

        let err = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap_err();
        match err {
            Error::TemplateRender(msg) => assert!(msg.contains("candidate.name")),
            other => panic!("expected TemplateRender, got {other:?}"),
        }
    }

    #[test]
    fn missing_phone_is_omitted_silently() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);

        let letter = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap();
        assert!(!letter.html.contains("555-0100"));

        f.db.update_profile(&ProfilePatch {
            phone: Some("555-0100".into()),
            ..Default::default()
        })
        .unwrap();
        let letter = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap();
        assert!(letter.html.contains("555-0100"));
    }

    #[test]
    fn undeclared_variable_is_a_render_error() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        std::fs::write(
            f.store.dir().join("broken.html"),
            "<p>{{ recruiter.name }}</p>",
        )
        .unwrap();
        let engine = LetterEngine::new(&f.db, &f.store);

        let err = engine
            .render(app_id, "broken", &BTreeMap::new(), false)
            .unwrap_err();
        assert!(matches!(err, Error::TemplateRender(_)));
    }

    #[test]
    fn clock_reading_templates_are_rejected() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        std::fs::write(f.store.dir().join("clocked.html"), "<p>{{ now() }}</p>").unwrap();
        let engine = LetterEngine::new(&f.db, &f.store);

        let err = engine
            .render(app_id, "clocked", &BTreeMap::new(), false)
            .unwrap_err();
        match err {
            Error::TemplateRender(msg) => assert!(msg.contains("disabled")),
            other => panic!("expected TemplateRender, got {other:?}"),
        }
    }

    #[test]
    fn missing_template_propagates_not_found() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);

        let err = engine
            .render(app_id, "nonexistent", &BTreeMap::new(), false)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "template", .. }));
    }

    #[test]
    fn export_writes_stored_html() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);
        let letter = engine
            .render(app_id, "modern", &BTreeMap::new(), false)
            .unwrap();

        let out = tempfile::tempdir().unwrap();
        let path = engine.export(app_id, out.path()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), letter.html);
    }

    #[test]
    fn export_without_letter_is_not_found() {
        let f = fixture();
        set_profile(&f.db);
        let app_id = make_application(&f.db, "Backend Engineer", "Acme");
        let engine = LetterEngine::new(&f.db, &f.store);

        let out = tempfile::tempdir().unwrap();
        let err = engine.export(app_id, out.path()).unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "letter", .. }));
    }
}
