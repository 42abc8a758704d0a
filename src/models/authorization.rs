use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ModelError;

/// Lifecycle status shared by authorizations and tokens.
///
/// Stored as a lowercase string. Only the transition `Valid -> Revoked` is
/// performed by this crate; the others are written by the issuing server.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum Status {
    Valid,
    Inactive,
    Redeemed,
    Rejected,
    Revoked,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Valid => "valid",
            Status::Inactive => "inactive",
            Status::Redeemed => "redeemed",
            Status::Rejected => "rejected",
            Status::Revoked => "revoked",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(Status::Valid),
            "inactive" => Ok(Status::Inactive),
            "redeemed" => Ok(Status::Redeemed),
            "rejected" => Ok(Status::Rejected),
            "revoked" => Ok(Status::Revoked),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Whether an authorization outlives the request that created it.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Hash)]
#[sqlx(type_name = "varchar")]
pub enum AuthorizationType {
    /// One-shot grant, expected to disappear once no token refers to it.
    #[serde(rename = "ad-hoc")]
    #[sqlx(rename = "ad-hoc")]
    AdHoc,
    #[serde(rename = "permanent")]
    #[sqlx(rename = "permanent")]
    Permanent,
}

impl AuthorizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationType::AdHoc => "ad-hoc",
            AuthorizationType::Permanent => "permanent",
        }
    }
}

impl fmt::Display for AuthorizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuthorizationType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ad-hoc" => Ok(AuthorizationType::AdHoc),
            "permanent" => Ok(AuthorizationType::Permanent),
            other => Err(ModelError::UnknownType(other.to_string())),
        }
    }
}

/// A subject's grant to a client application, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub id: Uuid,
    pub application_id: Option<Uuid>,
    pub subject: String,
    pub status: Status,
    #[serde(rename = "type")]
    pub kind: AuthorizationType,
    pub scopes: Vec<String>,
    pub creation_date: Option<DateTime<Utc>>,
}

/// Insert payload for an authorization created by the issuing server.
#[derive(Debug, Clone)]
pub struct NewAuthorization {
    pub id: Uuid,
    pub application_id: Option<Uuid>,
    pub subject: String,
    pub status: Status,
    pub kind: AuthorizationType,
    pub scopes: Vec<String>,
    pub creation_date: Option<DateTime<Utc>>,
}

impl NewAuthorization {
    /// A valid authorization created now, with a fresh id.
    pub fn new(subject: impl Into<String>, application_id: Uuid, kind: AuthorizationType) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id: Some(application_id),
            subject: subject.into(),
            status: Status::Valid,
            kind,
            scopes: Vec::new(),
            creation_date: Some(Utc::now()),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_scopes<I, T>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn created_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.creation_date = at;
        self
    }

    pub(crate) fn into_authorization(self) -> Authorization {
        Authorization {
            id: self.id,
            application_id: self.application_id,
            subject: self.subject,
            status: self.status,
            kind: self.kind,
            scopes: self.scopes,
            creation_date: self.creation_date,
        }
    }
}
