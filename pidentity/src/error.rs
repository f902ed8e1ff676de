//! Identity error kinds and error value helpers.

use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    InvalidInput,
    InvalidCredentials,
    AccountExists,
    AccountMissing,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityError {
    pub kind: IdentityErrorKind,
    pub message: String,
}

impl IdentityError {
    pub fn new(kind: IdentityErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(IdentityErrorKind::InvalidInput, message)
    }

    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::new(IdentityErrorKind::InvalidCredentials, message)
    }

    pub fn account_exists(message: impl Into<String>) -> Self {
        Self::new(IdentityErrorKind::AccountExists, message)
    }

    pub fn account_missing(message: impl Into<String>) -> Self {
        Self::new(IdentityErrorKind::AccountMissing, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(IdentityErrorKind::Internal, message)
    }
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for IdentityError {}
