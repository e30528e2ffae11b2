//! The mail transport seam
//!
//! A [`Transport`] owns a session with whatever actually queues and sends mail.
//! Messages are built through a [`MessageHandle`] and committed with
//! [`MessageHandle::save`] or [`MessageHandle::submit`]. Submission consumes
//! the handle, so nothing can mutate a message after it has been handed over.
//!
//! Deferred-delivery timestamps are naive local time. A transport may store a
//! different value than the one written (for instance after an implicit zone
//! conversion); [`MessageHandle::get_deferred_delivery`] must report what was
//! actually stored so the skew can be detected.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::TransportError;

pub mod memory;
pub mod spool;

pub use memory::{MemoryTransport, TransportEvent};
pub use spool::{OutboundMessage, SpoolTransport};

/// A message under construction
#[async_trait]
pub trait MessageHandle: Send + Sync {
    /// Set recipient, subject and body. `rich` marks `body` as a markup document.
    async fn set_content(
        &mut self,
        to: &str,
        subject: &str,
        body: &str,
        rich: bool,
    ) -> Result<(), TransportError>;

    async fn add_attachment(&mut self, path: &Path) -> Result<(), TransportError>;

    /// Bind a sending identity, returning the address actually bound
    async fn bind_identity(&mut self, preferred: Option<&str>)
    -> Result<Option<String>, TransportError>;

    async fn set_deferred_delivery(&mut self, at: NaiveDateTime) -> Result<(), TransportError>;

    /// The deferred-delivery value the transport holds, if it can report one
    async fn get_deferred_delivery(&self) -> Result<Option<NaiveDateTime>, TransportError>;

    /// Persist the message without submitting it
    async fn save(&mut self) -> Result<(), TransportError>;

    /// Hand the message over for delivery, returning its item identifier
    async fn submit(self: Box<Self>) -> Result<Option<String>, TransportError>;
}

/// An external mail transport
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn open_session(&self) -> Result<(), TransportError>;

    /// Release the session. Called exactly once per opened session.
    fn release(&self);

    async fn create_draft(&self) -> Result<Box<dyn MessageHandle>, TransportError>;

    /// Whether the transport is online and able to send
    async fn is_reachable(&self) -> bool;

    /// Ask the transport to process its outbound queue now
    async fn flush_outbound(&self) -> Result<(), TransportError>;
}

/// Pick the identity matching `preferred` (ignoring case), else the first one
#[must_use]
pub fn choose_identity<'a>(identities: &'a [String], preferred: Option<&str>) -> Option<&'a str> {
    preferred
        .and_then(|preferred| {
            identities
                .iter()
                .find(|identity| identity.eq_ignore_ascii_case(preferred.trim()))
        })
        .or_else(|| identities.first())
        .map(String::as_str)
}
