//! Error types for the cadence-common crate.

use thiserror::Error;

/// Errors raised while building or loading contacts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContactError {
    /// The record has no usable email address.
    #[error("Contact has no email address")]
    MissingEmail,

    /// A contact list could not be read or decoded.
    #[error("Unable to read contacts from {source_name}: {reason}")]
    Unreadable { source_name: String, reason: String },
}

impl ContactError {
    /// Returns `true` if the error concerns the whole list rather than one record.
    #[must_use]
    pub const fn is_list_error(&self) -> bool {
        matches!(self, Self::Unreadable { .. })
    }
}
