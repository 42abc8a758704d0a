pub mod authorization;
pub mod token;

use thiserror::Error;

pub use authorization::{Authorization, AuthorizationType, NewAuthorization, Status};
pub use token::{NewToken, Token};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown authorization status: {0}")]
    UnknownStatus(String),

    #[error("unknown authorization type: {0}")]
    UnknownType(String),
}
