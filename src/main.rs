mod config;
mod db;
mod error;
mod letter;
mod models;
mod templates;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Database;
use letter::LetterEngine;
use models::{ApplicationStatus, OfferDraft, OfferPatch, ProfilePatch};
use templates::TemplateStore;

#[derive(Parser)]
#[command(name = "dossier")]
#[command(about = "Track job offers and applications, and generate cover letters")]
struct Cli {
    /// Path to a config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and seed the builtin letter templates
    Init,

    /// Show or edit the candidate profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Manage job offers
    Offer {
        #[command(subcommand)]
        command: OfferCommands,
    },

    /// Manage applications
    #[command(name = "app")]
    Application {
        #[command(subcommand)]
        command: ApplicationCommands,
    },

    /// List available letter templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },

    /// Generate, inspect and export cover letters
    Letter {
        #[command(subcommand)]
        command: LetterCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show the candidate profile
    Show,

    /// Set profile fields (omitted fields are kept as they are)
    Set {
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        postal_code: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        headline: Option<String>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        linkedin: Option<String>,
        #[arg(long)]
        github: Option<String>,
        #[arg(long)]
        portfolio: Option<String>,
    },
}

#[derive(Subcommand)]
enum OfferCommands {
    /// Add a job offer
    Add {
        /// Job title
        title: String,

        /// Company name
        company: String,

        #[arg(short, long)]
        location: Option<String>,

        /// Contract type (permanent, fixed-term, freelance, ...)
        #[arg(short = 't', long)]
        contract_type: Option<String>,

        /// Posting text
        #[arg(short, long)]
        description: Option<String>,

        /// Where the offer was found (linkedin, jobup, ...)
        #[arg(short, long)]
        source: Option<String>,

        #[arg(short, long)]
        url: Option<String>,
    },

    /// List offers
    List {
        /// Free-text search over title, company and description
        #[arg(short, long)]
        search: Option<String>,

        /// Filter by company
        #[arg(long)]
        company: Option<String>,
    },

    /// Show offer details, including its applications
    Show {
        /// Offer ID
        id: i64,
    },

    /// Edit an offer (omitted fields are kept as they are)
    Edit {
        /// Offer ID
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        contract_type: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },

    /// Delete an offer and all its applications and letters
    Delete {
        /// Offer ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum ApplicationCommands {
    /// Start an application against an offer
    Add {
        /// Offer ID
        offer_id: i64,

        /// Free-form notes
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List applications
    List {
        /// Filter by status (todo, sent, in_progress, rejected, interview)
        #[arg(short, long)]
        status: Option<String>,

        /// Only applications for one offer
        #[arg(short, long)]
        offer: Option<i64>,
    },

    /// Show application details
    Show {
        /// Application ID
        id: i64,
    },

    /// Change an application's status
    Status {
        /// Application ID
        id: i64,

        /// New status (todo, sent, in_progress, rejected, interview)
        status: String,
    },

    /// Replace an application's notes
    Note {
        /// Application ID
        id: i64,

        /// New notes text
        notes: String,
    },

    /// Delete an application and its letter
    Delete {
        /// Application ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// List templates found in the templates directory
    List,
}

#[derive(Subcommand)]
enum LetterCommands {
    /// Render a cover letter for an application
    Render {
        /// Application ID
        application_id: i64,

        /// Template to use
        #[arg(short, long, default_value = "modern")]
        template: String,

        /// Override a section, e.g. --set intro="Custom opening line."
        #[arg(long = "set", value_name = "SECTION=TEXT")]
        overrides: Vec<String>,

        /// Re-render even if the application was already sent
        #[arg(long)]
        force: bool,
    },

    /// Print the stored letter HTML
    Show {
        /// Application ID
        application_id: i64,
    },

    /// Write the stored letter to the output directory for preview
    Export {
        /// Application ID
        application_id: i64,

        /// Override the configured output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dossier=warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;
    let db = Database::open(&cfg.database_path)?;
    let store = TemplateStore::new(&cfg.templates_dir);

    match cli.command {
        Commands::Init => {
            db.init()?;
            store.seed_builtins()?;
            println!("Database initialized at {}", db.path().display());
            println!("Templates directory: {}", store.dir().display());
        }

        Commands::Profile { command } => {
            db.ensure_initialized()?;
            match command {
                ProfileCommands::Show => {
                    let profile = db.get_profile()?;
                    if profile.full_name().is_empty() && profile.email.is_empty() {
                        println!("Profile is empty. Fill it in with 'dossier profile set'.");
                    } else {
                        print_field("Name", &profile.full_name());
                        print_field("Headline", &profile.headline);
                        print_field("Email", &profile.email);
                        print_field("Phone", &profile.phone);
                        print_field("Address", &profile.address);
                        print_field("City", &profile.city);
                        print_field("Postal code", &profile.postal_code);
                        print_field("Country", &profile.country);
                        print_field("LinkedIn", &profile.linkedin);
                        print_field("GitHub", &profile.github);
                        print_field("Portfolio", &profile.portfolio);
                        if !profile.summary.is_empty() {
                            println!("\n--- Summary ---\n{}", profile.summary);
                        }
                    }
                }

                ProfileCommands::Set {
                    first_name,
                    last_name,
                    email,
                    phone,
                    address,
                    city,
                    postal_code,
                    country,
                    headline,
                    summary,
                    linkedin,
                    github,
                    portfolio,
                } => {
                    let profile = db.update_profile(&ProfilePatch {
                        first_name,
                        last_name,
                        email,
                        phone,
                        address,
                        city,
                        postal_code,
                        country,
                        headline,
                        summary,
                        linkedin,
                        github,
                        portfolio,
                    })?;
                    println!("Profile updated ({}).", profile.full_name());
                }
            }
        }

        Commands::Offer { command } => {
            db.ensure_initialized()?;
            match command {
                OfferCommands::Add {
                    title,
                    company,
                    location,
                    contract_type,
                    description,
                    source,
                    url,
                } => {
                    let offer = db.create_offer(&OfferDraft {
                        title,
                        company,
                        location,
                        contract_type,
                        description,
                        source,
                        url,
                    })?;
                    println!("Added offer #{} ({} at {})", offer.id, offer.title, offer.company);
                }

                OfferCommands::List { search, company } => {
                    let offers = db.list_offers(search.as_deref(), company.as_deref())?;
                    if offers.is_empty() {
                        println!("No offers found.");
                    } else {
                        println!(
                            "{:<6} {:<30} {:<20} {:<16} {:<12}",
                            "ID", "TITLE", "COMPANY", "LOCATION", "ADDED"
                        );
                        println!("{}", "-".repeat(88));
                        for offer in offers {
                            println!(
                                "{:<6} {:<30} {:<20} {:<16} {:<12}",
                                offer.id,
                                truncate(&offer.title, 28),
                                truncate(&offer.company, 18),
                                truncate(&offer.location.unwrap_or_default(), 14),
                                truncate(&offer.created_at, 10)
                            );
                        }
                    }
                }

                OfferCommands::Show { id } => {
                    let offer = db.get_offer(id)?;
                    println!("Offer #{}", offer.id);
                    println!("Title: {}", offer.title);
                    println!("Company: {}", offer.company);
                    print_field("Location", &offer.location.unwrap_or_default());
                    print_field("Contract", &offer.contract_type.unwrap_or_default());
                    print_field("Source", &offer.source.unwrap_or_default());
                    print_field("URL", &offer.url.unwrap_or_default());
                    println!("Added: {}", offer.created_at);
                    if let Some(text) = &offer.description {
                        println!("\n--- Posting ---\n{}", text);
                    }
                    let apps = db.list_for_offer(id)?;
                    if !apps.is_empty() {
                        println!("\nApplications ({}):", apps.len());
                        for app in apps {
                            let sent = app
                                .submitted_at
                                .map(|d| format!(", sent {d}"))
                                .unwrap_or_default();
                            println!("  #{} - {}{}", app.id, app.status.label(), sent);
                        }
                    }
                }

                OfferCommands::Edit {
                    id,
                    title,
                    company,
                    location,
                    contract_type,
                    description,
                    source,
                    url,
                } => {
                    let offer = db.update_offer(
                        id,
                        &OfferPatch {
                            title,
                            company,
                            location,
                            contract_type,
                            description,
                            source,
                            url,
                        },
                    )?;
                    println!("Updated offer #{} ({} at {})", offer.id, offer.title, offer.company);
                }

                OfferCommands::Delete { id } => {
                    db.delete_offer(id)?;
                    println!("Deleted offer #{} and its applications and letters.", id);
                }
            }
        }

        Commands::Application { command } => {
            db.ensure_initialized()?;
            match command {
                ApplicationCommands::Add { offer_id, notes } => {
                    let app = db.create_application(offer_id, notes.as_deref())?;
                    println!(
                        "Added application #{} for offer #{} ({} at {})",
                        app.id, app.offer_id, app.offer_title, app.offer_company
                    );
                }

                ApplicationCommands::List { status, offer } => {
                    let apps = match offer {
                        Some(offer_id) => db.list_for_offer(offer_id)?,
                        None => {
                            let status = status
                                .as_deref()
                                .map(str::parse::<ApplicationStatus>)
                                .transpose()?;
                            db.list_applications(status)?
                        }
                    };
                    if apps.is_empty() {
                        println!("No applications found.");
                    } else {
                        println!(
                            "{:<6} {:<12} {:<28} {:<18} {:<10}",
                            "ID", "STATUS", "TITLE", "COMPANY", "SENT"
                        );
                        println!("{}", "-".repeat(78));
                        for app in apps {
                            println!(
                                "{:<6} {:<12} {:<28} {:<18} {:<10}",
                                app.id,
                                app.status.label(),
                                truncate(&app.offer_title, 26),
                                truncate(&app.offer_company, 16),
                                app.submitted_at.unwrap_or_else(|| "-".to_string())
                            );
                        }
                    }
                }

                ApplicationCommands::Show { id } => {
                    let app = db.get_application(id)?;
                    println!("Application #{}", app.id);
                    println!(
                        "Offer: #{} ({} at {})",
                        app.offer_id, app.offer_title, app.offer_company
                    );
                    println!("Status: {}", app.status.label());
                    if let Some(date) = &app.submitted_at {
                        println!("Sent: {}", date);
                    }
                    println!("Created: {}", app.created_at);
                    if let Some(notes) = &app.notes {
                        println!("\n--- Notes ---\n{}", notes);
                    }
                    if let Some(letter) = db.get_letter(id)? {
                        println!(
                            "\nLetter: template '{}', generated {}",
                            letter.template_id, letter.generated_at
                        );
                    }
                }

                ApplicationCommands::Status { id, status } => {
                    let status: ApplicationStatus = status.parse()?;
                    let app = db.update_status(id, status)?;
                    match &app.submitted_at {
                        Some(date) if app.status == ApplicationStatus::Sent => {
                            println!("Application #{} is now {} (sent {}).", app.id, app.status.label(), date)
                        }
                        _ => println!("Application #{} is now {}.", app.id, app.status.label()),
                    }
                }

                ApplicationCommands::Note { id, notes } => {
                    db.set_notes(id, &notes)?;
                    println!("Notes updated for application #{}.", id);
                }

                ApplicationCommands::Delete { id } => {
                    db.delete_application(id)?;
                    println!("Deleted application #{} and its letter.", id);
                }
            }
        }

        Commands::Template { command } => match command {
            TemplateCommands::List => {
                let templates = store.list()?;
                if templates.is_empty() {
                    println!(
                        "No templates found in {}. Run 'dossier init' to seed the builtin ones.",
                        store.dir().display()
                    );
                } else {
                    println!("{:<20} {:<30}", "ID", "NAME");
                    println!("{}", "-".repeat(50));
                    for t in templates {
                        println!("{:<20} {:<30}", t.id, t.display_name);
                    }
                }
            }
        },

        Commands::Letter { command } => {
            db.ensure_initialized()?;
            let engine = LetterEngine::new(&db, &store);
            match command {
                LetterCommands::Render {
                    application_id,
                    template,
                    overrides,
                    force,
                } => {
                    let overrides = parse_overrides(&overrides)?;
                    let letter = engine.render(application_id, &template, &overrides, force)?;
                    println!(
                        "Rendered letter for application #{} with template '{}' ({} bytes).",
                        application_id,
                        letter.template_id,
                        letter.html.len()
                    );
                }

                LetterCommands::Show { application_id } => {
                    match db.get_letter(application_id)? {
                        Some(letter) => println!("{}", letter.html),
                        None => println!("No letter rendered for application #{} yet.", application_id),
                    }
                }

                LetterCommands::Export {
                    application_id,
                    output_dir,
                } => {
                    let dir = output_dir.unwrap_or(cfg.letters_output_dir);
                    let path = engine.export(application_id, &dir)?;
                    println!("Letter written to {}", path.display());
                }
            }
        }
    }

    Ok(())
}

/// Parse repeated `--set section=text` arguments into an override map.
fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut overrides = BTreeMap::new();
    for entry in raw {
        let (section, text) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --set '{entry}', expected SECTION=TEXT"))?;
        if section.trim().is_empty() {
            return Err(anyhow!("invalid --set '{entry}', section name is empty"));
        }
        overrides.insert(section.trim().to_string(), text.to_string());
    }
    Ok(overrides)
}

fn print_field(label: &str, value: &str) {
    if !value.is_empty() {
        println!("{}: {}", label, value);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // The cut may land inside a multibyte character; back off to a boundary.
    let mut end = max.saturating_sub(3);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_overrides_splits_on_first_equals() {
        let parsed =
            parse_overrides(&["intro=Custom opening line.".to_string(), "closing=a=b".to_string()])
                .unwrap();
        assert_eq!(parsed.get("intro").map(String::as_str), Some("Custom opening line."));
        assert_eq!(parsed.get("closing").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn parse_overrides_rejects_missing_equals() {
        assert!(parse_overrides(&["intro".to_string()]).is_err());
        assert!(parse_overrides(&["=text".to_string()]).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // "é" is two bytes, so a naive byte slice at the cut point panics.
        let accented = "é".repeat(15);
        let cut = truncate(&accented, 28);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 28);

        assert_eq!(truncate("Développeur Python / Data et automatisation", 28), "Développeur Python / Dat...");
        assert_eq!(truncate("short", 28), "short");
    }
}
