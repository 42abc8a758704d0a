//! Tokens are issued and managed elsewhere. This crate only needs enough of
//! the row to seed fixtures and to delete tokens owned by pruned authorizations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Status;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub authorization_id: Option<Uuid>,
    pub application_id: Option<Uuid>,
    pub subject: Option<String>,
    pub status: Status,
    pub token_type: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewToken {
    pub id: Uuid,
    pub authorization_id: Option<Uuid>,
    pub application_id: Option<Uuid>,
    pub subject: Option<String>,
    pub status: Status,
    pub token_type: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl NewToken {
    /// A valid access token attached to `authorization_id`.
    pub fn for_authorization(authorization_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            authorization_id: Some(authorization_id),
            application_id: None,
            subject: None,
            status: Status::Valid,
            token_type: "access_token".to_string(),
            creation_date: Some(Utc::now()),
            expiration_date: None,
        }
    }

    /// A token not tied to any authorization (e.g. client credentials).
    pub fn detached() -> Self {
        Self {
            authorization_id: None,
            ..Self::for_authorization(Uuid::nil())
        }
    }

    pub(crate) fn into_token(self) -> Token {
        Token {
            id: self.id,
            authorization_id: self.authorization_id,
            application_id: self.application_id,
            subject: self.subject,
            status: self.status,
            token_type: self.token_type,
            creation_date: self.creation_date,
            expiration_date: self.expiration_date,
        }
    }
}
