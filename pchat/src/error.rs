//! Session error kinds and error value helpers.

use std::error::Error;
use std::fmt::{Display, Formatter};

use pstore::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    InvalidRequest,
    Storage,
    Provider,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::InvalidRequest, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Storage, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Provider, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Internal, message)
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for SessionError {}

impl From<StoreError> for SessionError {
    fn from(value: StoreError) -> Self {
        SessionError::storage(value.message)
    }
}
