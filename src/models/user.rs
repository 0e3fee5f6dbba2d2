use serde::{Deserialize, Serialize};

/// Role carried in the access token; admin endpoints check it instead of an email list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}
