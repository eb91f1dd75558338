use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role carried by the access credential's role claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
    Viewer,
}

impl UserRole {
    /// Parse a role claim string, tolerating casing and decorated values
    /// like "org-admin". Unknown or absent claims fall back to Member.
    pub fn from_claim(claim: Option<&str>) -> Self {
        match claim {
            Some(value) => {
                let lower = value.to_lowercase();
                if lower.contains("admin") {
                    UserRole::Admin
                } else if lower.contains("viewer") || lower.contains("readonly") {
                    UserRole::Viewer
                } else {
                    UserRole::Member
                }
            }
            None => UserRole::Member,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            UserRole::Admin => "Admin",
            UserRole::Member => "Member",
            UserRole::Viewer => "Viewer",
        }
    }
}

/// The authenticated account as reported by the who-am-I endpoint, or
/// derived from identity-provider claims when a provider is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub role: UserRole,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastLoginAt")]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl CurrentUser {
    /// Name to show in greetings and logs; falls back to the email.
    pub fn display_label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}
