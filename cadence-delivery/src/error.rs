//! Typed error handling for dispatch operations.
//!
//! Errors fall into three groups:
//! - Input errors: the contact list is missing or empty - fail before touching the transport
//! - Transport errors: the mail transport refused an operation
//! - Submission errors: a message could not be submitted - fatal for the run, never retried

use std::path::PathBuf;

use cadence_common::ContactError;
use thiserror::Error;

/// Top-level dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The run was given nothing usable to send to.
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// The transport is offline or otherwise unable to accept messages.
    #[error(
        "Mail transport is unavailable: {0}. Bring the transport online and run the campaign again"
    )]
    Unavailable(String),

    /// Submitting a message failed. The run stops here.
    #[error("Failed to submit email #{step} to {recipient}: {source}")]
    Submission {
        step: usize,
        recipient: String,
        #[source]
        source: TransportError,
    },

    /// Building or saving a message failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Problems with the contact list, detected before any transport interaction.
#[derive(Debug, Error)]
pub enum InputError {
    /// The contact list is empty.
    #[error("No contacts to send to. Import a contact list with at least one email address")]
    NoContacts,

    /// The contact list could not be loaded.
    #[error("Contact list could not be read: {0}")]
    ContactsUnreadable(#[from] ContactError),
}

/// Errors reported by a mail transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport session could not be opened or has gone away.
    #[error("Session error: {0}")]
    Session(String),

    /// A message property could not be written or read.
    #[error("Unable to access property {property}: {reason}")]
    Property {
        property: &'static str,
        reason: String,
    },

    /// An attachment could not be added to a message.
    #[error("Unable to attach {}: {reason}", path.display())]
    Attachment { path: PathBuf, reason: String },

    /// The transport refused the message.
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// No sending identity is available.
    #[error("No sending identity available")]
    NoIdentity,

    /// Message could not be encoded for storage.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Returns `true` if the run failed before any transport interaction.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(self, Self::Input(_))
    }

    /// Returns `true` if a message may have been handed to the transport
    /// before the failure.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Submission { .. } | Self::Transport(_))
    }
}

impl From<ron::Error> for TransportError {
    fn from(error: ron::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Operations whose failure is logged and otherwise ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestEffort {
    Attachment,
    IdentityBinding,
    Flush,
    DraftCleanup,
}

impl BestEffort {
    /// Log and discard a failed best-effort operation
    pub fn swallow(self, error: &TransportError) {
        tracing::warn!(operation = ?self, "Ignoring failed {}: {error}", self.describe());
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::IdentityBinding => "sending identity binding",
            Self::Flush => "outbound queue flush",
            Self::DraftCleanup => "draft cleanup after submission",
        }
    }
}
