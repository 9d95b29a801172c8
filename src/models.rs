use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Lifecycle of an application. Transitions are always explicit user
/// actions; nothing in this crate infers a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Todo,
    Sent,
    InProgress,
    Rejected,
    Interview,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Todo,
        ApplicationStatus::Sent,
        ApplicationStatus::InProgress,
        ApplicationStatus::Rejected,
        ApplicationStatus::Interview,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Todo => "todo",
            ApplicationStatus::Sent => "sent",
            ApplicationStatus::InProgress => "in_progress",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Interview => "interview",
        }
    }

    /// Human label for table output.
    pub fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Todo => "To do",
            ApplicationStatus::Sent => "Sent",
            ApplicationStatus::InProgress => "In progress",
            ApplicationStatus::Rejected => "Rejected",
            ApplicationStatus::Interview => "Interview",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Ok(ApplicationStatus::Todo),
            "sent" => Ok(ApplicationStatus::Sent),
            "in_progress" | "in-progress" | "inprogress" => Ok(ApplicationStatus::InProgress),
            "rejected" => Ok(ApplicationStatus::Rejected),
            "interview" => Ok(ApplicationStatus::Interview),
            other => {
                let expected = ApplicationStatus::ALL.map(ApplicationStatus::as_str).join(", ");
                Err(Error::validation(
                    "status",
                    format!("unknown status '{other}' (expected one of: {expected})"),
                ))
            }
        }
    }
}

/// The single candidate profile. One row, created lazily; never deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub headline: String,
    pub summary: String,
    pub linkedin: String,
    pub github: String,
    pub portfolio: String,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Partial profile update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub portfolio: Option<String>,
}

impl ProfilePatch {
    pub fn apply(&self, profile: &mut Profile) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }
        set(&mut profile.first_name, &self.first_name);
        set(&mut profile.last_name, &self.last_name);
        set(&mut profile.email, &self.email);
        set(&mut profile.phone, &self.phone);
        set(&mut profile.address, &self.address);
        set(&mut profile.city, &self.city);
        set(&mut profile.postal_code, &self.postal_code);
        set(&mut profile.country, &self.country);
        set(&mut profile.headline, &self.headline);
        set(&mut profile.summary, &self.summary);
        set(&mut profile.linkedin, &self.linkedin);
        set(&mut profile.github, &self.github);
        set(&mut profile.portfolio, &self.portfolio);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub contract_type: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>, // "linkedin", "jobup", "manual", etc.
    pub url: Option<String>,
    pub created_at: String,
}

/// Fields needed to create an offer. Title and company are required.
#[derive(Debug, Clone, Default)]
pub struct OfferDraft {
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub contract_type: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
}

/// Partial offer update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct OfferPatch {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub contract_type: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub offer_id: i64,
    pub offer_title: String,   // denormalized for convenience
    pub offer_company: String, // denormalized for convenience
    pub status: ApplicationStatus,
    pub submitted_at: Option<String>, // YYYY-MM-DD, stamped on first transition to Sent
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Letter {
    pub id: i64,
    pub application_id: i64,
    pub template_id: String,
    pub html: String,
    pub overrides: BTreeMap<String, String>,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDescriptor {
    pub id: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_status_parses_from_its_own_name() {
        for status in ApplicationStatus::ALL {
            assert_eq!(status.as_str().parse::<ApplicationStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_error_names_all_statuses() {
        let err = "pending".parse::<ApplicationStatus>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'pending'"));
        for status in ApplicationStatus::ALL {
            assert!(msg.contains(status.as_str()));
        }
    }
}
