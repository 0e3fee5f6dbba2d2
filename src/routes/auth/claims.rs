use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::UserRole;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Claims {
    pub id: String, // user UUID
    pub email: String,
    pub exp: usize, // expiration (as UNIX timestamp)
    pub role: Option<UserRole>,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.id).ok()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(UserRole::Admin)
    }
}
