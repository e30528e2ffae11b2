use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use cadence_common::transport;
use chrono::{NaiveDateTime, TimeDelta};
use parking_lot::Mutex;

use super::{MessageHandle, Transport, choose_identity};
use crate::error::TransportError;

/// Everything the memory transport was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    SessionOpened,
    Created { id: usize },
    Content { id: usize, to: String },
    Attachment { id: usize, path: PathBuf },
    IdentityBound { id: usize, identity: String },
    DeferredWrite { id: usize, value: NaiveDateTime },
    Saved { id: usize },
    Submitted { id: usize },
    Flushed,
    Released,
}

/// A message as the memory transport holds it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: usize,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub rich: bool,
    pub attachments: Vec<PathBuf>,
    pub identity: Option<String>,

    /// The value as stored, skew included
    pub deferred: Option<NaiveDateTime>,
    pub saved: bool,
    pub submitted: bool,
}

#[derive(Debug, Default)]
struct State {
    events: Vec<TransportEvent>,
    messages: Vec<StoredMessage>,
    submissions: usize,
}

#[derive(Debug, Clone)]
struct Behaviour {
    shift: TimeDelta,
    readback: bool,
    identities: Vec<String>,
    fail_attachments: bool,
    fail_submission: Option<usize>,
}

/// In-memory transport
///
/// Honors the full transport contract and records every call. Stored
/// deferred-delivery values are offset by a configurable shift to reproduce
/// transports that convert the written value between zones. Failure injection
/// covers sessions, attachments, submissions and flushes.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
    behaviour: Behaviour,
    reachable: bool,
    fail_session: bool,
    fail_flush: bool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A reachable, skew-free transport with a single identity
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            behaviour: Behaviour {
                shift: TimeDelta::zero(),
                readback: true,
                identities: vec!["sender@localhost".to_string()],
                fail_attachments: false,
                fail_submission: None,
            },
            reachable: true,
            fail_session: false,
            fail_flush: false,
        }
    }

    /// Store every deferred-delivery value `shift` later than written
    #[must_use]
    pub const fn with_shift(mut self, shift: TimeDelta) -> Self {
        self.behaviour.shift = shift;
        self
    }

    #[must_use]
    pub fn with_identities<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.behaviour.identities = identities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Report no value on deferred-delivery read-back
    #[must_use]
    pub const fn without_readback(mut self) -> Self {
        self.behaviour.readback = false;
        self
    }

    #[must_use]
    pub const fn fail_session(mut self) -> Self {
        self.fail_session = true;
        self
    }

    #[must_use]
    pub const fn fail_attachments(mut self) -> Self {
        self.behaviour.fail_attachments = true;
        self
    }

    /// Reject the `nth` submission (1-based)
    #[must_use]
    pub const fn fail_submission(mut self, nth: usize) -> Self {
        self.behaviour.fail_submission = Some(nth);
        self
    }

    #[must_use]
    pub const fn fail_flush(mut self) -> Self {
        self.fail_flush = true;
        self
    }

    #[must_use]
    pub fn events(&self) -> Vec<TransportEvent> {
        self.state.lock().events.clone()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.state.lock().messages.clone()
    }

    #[must_use]
    pub fn submitted(&self) -> Vec<StoredMessage> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|message| message.submitted)
            .cloned()
            .collect()
    }

    /// Deferred-delivery values as written, per message
    #[must_use]
    pub fn deferred_writes(&self, id: usize) -> Vec<NaiveDateTime> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                TransportEvent::DeferredWrite { id: written, value } if *written == id => {
                    Some(*value)
                }
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn count(&self, matches: impl Fn(&TransportEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|event| matches(event)).count()
    }

    fn record(&self, event: TransportEvent) {
        self.state.lock().events.push(event);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_session(&self) -> Result<(), TransportError> {
        if self.fail_session {
            return Err(TransportError::Session(
                "memory transport configured to refuse sessions".to_string(),
            ));
        }

        self.record(TransportEvent::SessionOpened);
        Ok(())
    }

    fn release(&self) {
        self.record(TransportEvent::Released);
    }

    async fn create_draft(&self) -> Result<Box<dyn MessageHandle>, TransportError> {
        let id = {
            let mut state = self.state.lock();
            let id = state.messages.len();
            state.messages.push(StoredMessage {
                id,
                ..StoredMessage::default()
            });
            state.events.push(TransportEvent::Created { id });
            id
        };

        transport!("Created memory draft {id}");

        Ok(Box::new(MemoryMessage {
            id,
            state: Arc::clone(&self.state),
            behaviour: self.behaviour.clone(),
        }))
    }

    async fn is_reachable(&self) -> bool {
        self.reachable
    }

    async fn flush_outbound(&self) -> Result<(), TransportError> {
        if self.fail_flush {
            return Err(TransportError::Session("flush refused".to_string()));
        }

        self.record(TransportEvent::Flushed);
        Ok(())
    }
}

struct MemoryMessage {
    id: usize,
    state: Arc<Mutex<State>>,
    behaviour: Behaviour,
}

impl MemoryMessage {
    fn update(&self, event: TransportEvent, apply: impl FnOnce(&mut StoredMessage)) {
        let mut state = self.state.lock();
        if let Some(message) = state.messages.get_mut(self.id) {
            apply(message);
        }
        state.events.push(event);
    }
}

#[async_trait]
impl MessageHandle for MemoryMessage {
    async fn set_content(
        &mut self,
        to: &str,
        subject: &str,
        body: &str,
        rich: bool,
    ) -> Result<(), TransportError> {
        self.update(
            TransportEvent::Content {
                id: self.id,
                to: to.to_string(),
            },
            |message| {
                message.to = to.to_string();
                message.subject = subject.to_string();
                message.body = body.to_string();
                message.rich = rich;
            },
        );
        Ok(())
    }

    async fn add_attachment(&mut self, path: &Path) -> Result<(), TransportError> {
        if self.behaviour.fail_attachments {
            return Err(TransportError::Attachment {
                path: path.to_path_buf(),
                reason: "attachments disabled".to_string(),
            });
        }

        self.update(
            TransportEvent::Attachment {
                id: self.id,
                path: path.to_path_buf(),
            },
            |message| message.attachments.push(path.to_path_buf()),
        );
        Ok(())
    }

    async fn bind_identity(
        &mut self,
        preferred: Option<&str>,
    ) -> Result<Option<String>, TransportError> {
        let identity = choose_identity(&self.behaviour.identities, preferred)
            .ok_or(TransportError::NoIdentity)?
            .to_string();

        self.update(
            TransportEvent::IdentityBound {
                id: self.id,
                identity: identity.clone(),
            },
            |message| message.identity = Some(identity.clone()),
        );
        Ok(Some(identity))
    }

    async fn set_deferred_delivery(&mut self, at: NaiveDateTime) -> Result<(), TransportError> {
        let stored = at
            .checked_add_signed(self.behaviour.shift)
            .ok_or(TransportError::Property {
                property: "deferred_delivery",
                reason: format!("{at} is out of range"),
            })?;

        self.update(
            TransportEvent::DeferredWrite {
                id: self.id,
                value: at,
            },
            |message| message.deferred = Some(stored),
        );
        Ok(())
    }

    async fn get_deferred_delivery(&self) -> Result<Option<NaiveDateTime>, TransportError> {
        if !self.behaviour.readback {
            return Ok(None);
        }

        Ok(self
            .state
            .lock()
            .messages
            .get(self.id)
            .and_then(|message| message.deferred))
    }

    async fn save(&mut self) -> Result<(), TransportError> {
        self.update(TransportEvent::Saved { id: self.id }, |message| {
            message.saved = true;
        });
        Ok(())
    }

    async fn submit(self: Box<Self>) -> Result<Option<String>, TransportError> {
        let mut state = self.state.lock();
        state.submissions += 1;

        if self.behaviour.fail_submission == Some(state.submissions) {
            return Err(TransportError::Rejected(format!(
                "submission {} refused",
                state.submissions
            )));
        }

        if let Some(message) = state.messages.get_mut(self.id) {
            message.submitted = true;
        }
        state.events.push(TransportEvent::Submitted { id: self.id });

        Ok(Some(format!("mem-{:04}", self.id)))
    }
}
