//! Campaign-level dispatch
//!
//! A run walks the contact list in order, dispatching the whole schedule to
//! each contact before moving to the next. The transport session is held for
//! the whole run and released exactly once, however the run ends.

mod contact;

use std::sync::Arc;

use cadence_common::{internal, transport};
use serde::{Deserialize, Serialize};

pub use self::contact::{ContactDispatcher, ContactReport};
use crate::{
    audit::{AuditConfig, AuditLog},
    compensation::Compensator,
    contacts::ContactSource,
    error::{BestEffort, DispatchError, InputError},
    schedule::{Clock, SequenceStep, SystemClock},
    throttle::{Throttle, ThrottleConfig},
    transport::Transport,
    types::RunSummary,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Preferred sending identity; the transport's first identity otherwise
    #[serde(default)]
    pub sender: Option<String>,

    #[serde(default)]
    pub compensation: Compensator,

    #[serde(default)]
    pub throttle: ThrottleConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

/// Releases the transport session when dropped
struct SessionGuard<'a> {
    transport: &'a dyn Transport,
}

impl<'a> SessionGuard<'a> {
    async fn open(transport: &'a dyn Transport) -> Result<Self, DispatchError> {
        transport.open_session().await.map_err(|err| {
            DispatchError::Unavailable(format!("unable to open a session: {err}"))
        })?;

        transport!(level = DEBUG, "Transport session opened");
        Ok(Self { transport })
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.transport.release();
        transport!(level = DEBUG, "Transport session released");
    }
}

/// Drives a schedule across a contact list
#[derive(Debug)]
pub struct CampaignDispatcher {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl CampaignDispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: DispatchConfig) -> Self {
        Self {
            transport,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch `schedule` to every contact from `contacts`
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Input`] if the contact list is empty or unreadable,
    ///   before the transport is touched
    /// - [`DispatchError::Unavailable`] if sending is enabled and the
    ///   transport is unreachable, before any message is created
    /// - [`DispatchError::Submission`] or [`DispatchError::Transport`] if a
    ///   message fails; messages already submitted stay submitted
    ///
    /// Every failure also writes a crash record next to the audit log.
    pub async fn run(
        &self,
        schedule: &[SequenceStep],
        contacts: &dyn ContactSource,
        send_enabled: bool,
        window_minutes: u32,
    ) -> Result<RunSummary, DispatchError> {
        let mut audit = AuditLog::open(self.config.audit.clone(), Arc::clone(&self.clock));

        internal!(
            level = INFO,
            "Starting run: {} steps, sending {}, window {window_minutes} minutes",
            schedule.len(),
            if send_enabled { "enabled" } else { "disabled" }
        );

        let result = self
            .execute(schedule, contacts, send_enabled, window_minutes, &mut audit)
            .await;

        match result {
            Ok(mut summary) => {
                summary.audit_log = audit.path().map(ToOwned::to_owned);
                audit.summary(&summary);
                audit.close();

                internal!(
                    level = INFO,
                    "Run complete: {} contacts, {} emails processed",
                    summary.contacts,
                    summary.processed()
                );
                Ok(summary)
            }
            Err(err) => {
                if let Some(path) = audit.crash(&err) {
                    internal!(level = ERROR, "Run failed, crash record at {}", path.display());
                }
                audit.close();
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        schedule: &[SequenceStep],
        contacts: &dyn ContactSource,
        send_enabled: bool,
        window_minutes: u32,
        audit: &mut AuditLog,
    ) -> Result<RunSummary, DispatchError> {
        let contacts = contacts.load().await.map_err(InputError::from)?;
        if contacts.is_empty() {
            return Err(InputError::NoContacts.into());
        }

        let session = SessionGuard::open(self.transport.as_ref()).await?;

        if send_enabled && !self.transport.is_reachable().await {
            return Err(DispatchError::Unavailable(
                "the transport reports it is offline".to_string(),
            ));
        }

        let throttle = Throttle::applies(send_enabled, window_minutes)
            .then(|| Throttle::new(self.config.throttle));

        let dispatcher = ContactDispatcher {
            transport: session.transport,
            clock: self.clock.as_ref(),
            compensator: self.config.compensation,
            sender: self.config.sender.as_deref(),
        };

        let mut summary = RunSummary::default();

        for (index, contact) in contacts.iter().enumerate() {
            if let Some(throttle) = &throttle {
                throttle.pace(index).await;
            }

            let report = dispatcher
                .dispatch(contact, schedule, send_enabled, window_minutes, audit)
                .await?;

            summary.contacts += 1;
            summary.created += report.count();
            summary.submitted += report.submitted();
            summary.drafts += report.drafts();
        }

        if summary.submitted > 0 {
            summary.flushed = true;
            if let Err(err) = self.transport.flush_outbound().await {
                BestEffort::Flush.swallow(&err);
            }
        }

        drop(session);
        Ok(summary)
    }
}
