use serde::Serialize;

use crate::error::ErrorKind;
use crate::AppError;

/// Body returned to clients for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicError {
    pub error: String,
}

pub const STORAGE_MESSAGE: &str = "Service temporarily unavailable";
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Client-safe text. Storage and internal failures never expose driver detail.
pub fn public_message(err: &AppError) -> String {
    match err.kind() {
        ErrorKind::StorageUnavailable => STORAGE_MESSAGE.to_string(),
        ErrorKind::Internal => INTERNAL_MESSAGE.to_string(),
        _ => err.message().to_string(),
    }
}

impl From<&AppError> for PublicError {
    fn from(err: &AppError) -> Self {
        PublicError {
            error: public_message(err),
        }
    }
}
