use std::path::PathBuf;

use cadence_common::{Contact, internal};
use chrono::NaiveDateTime;

use crate::{
    audit::AuditLog,
    compensation::Compensator,
    error::{BestEffort, DispatchError},
    schedule::{Clock, SequenceStep, apply_send_window},
    template::Content,
    transport::{MessageHandle, Transport},
    types::{Disposition, DispatchOutcome},
};

/// Outcomes for every non-inert step of one contact's sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactReport {
    pub outcomes: Vec<DispatchOutcome>,
}

impl ContactReport {
    /// Steps that produced a message
    #[must_use]
    pub fn count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.created).count()
    }

    #[must_use]
    pub fn submitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.submitted).count()
    }

    #[must_use]
    pub fn drafts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.created && o.disposition == Disposition::Draft)
            .count()
    }
}

/// Builds and commits one contact's messages
pub struct ContactDispatcher<'a> {
    pub transport: &'a dyn Transport,
    pub clock: &'a dyn Clock,
    pub compensator: Compensator,

    /// Preferred sending identity
    pub sender: Option<&'a str>,
}

impl ContactDispatcher<'_> {
    /// Dispatch every step of `schedule` to `contact`
    ///
    /// # Errors
    ///
    /// Stops at the first step whose message cannot be built or submitted.
    /// That step's outcome is still recorded in `audit`.
    pub async fn dispatch(
        &self,
        contact: &Contact,
        schedule: &[SequenceStep],
        send_enabled: bool,
        window_minutes: u32,
        audit: &mut AuditLog,
    ) -> Result<ContactReport, DispatchError> {
        let tokens = contact.tokens();
        let mut report = ContactReport::default();

        for (index, step) in schedule.iter().enumerate() {
            let number = index + 1;

            if step.is_inert() {
                internal!(
                    "Skipping empty step #{number} for {}",
                    contact.email()
                );
                continue;
            }

            let now = self.clock.now();
            let parsed = step.timing.resolve(now);
            let scheduled =
                parsed.map(|base| apply_send_window(base, window_minutes, &mut rand::rng()));

            let disposition = match (send_enabled, scheduled) {
                (false, _) => Disposition::Draft,
                (true, Some(at)) if at > now => Disposition::Deferred,
                (true, _) => Disposition::Immediate,
            };

            let content = Content::compose(&step.subject, &step.body, &tokens);

            let mut outcome = DispatchOutcome::new(number, contact.email(), disposition);
            outcome.subject.clone_from(&content.subject);
            step.timing.raw_date().clone_into(&mut outcome.raw_date);
            step.timing.raw_time().clone_into(&mut outcome.raw_time);
            outcome.parsed = parsed;
            outcome.scheduled = scheduled;

            let result = self
                .commit(contact, step, &content, &mut outcome, audit)
                .await;

            if let Err(err) = &result {
                outcome.error = Some(err.to_string());
            }

            audit.email(&outcome);
            report.outcomes.push(outcome);

            if let Err(err) = result {
                internal!(
                    level = ERROR,
                    "Dispatch to {} stopped at step #{number}: {err}",
                    contact.email()
                );
                return Err(err);
            }
        }

        Ok(report)
    }

    async fn commit(
        &self,
        contact: &Contact,
        step: &SequenceStep,
        content: &Content,
        outcome: &mut DispatchOutcome,
        audit: &mut AuditLog,
    ) -> Result<(), DispatchError> {
        let mut handle = self.transport.create_draft().await?;
        outcome.created = true;

        handle
            .set_content(
                contact.email(),
                &content.subject,
                content.body.as_str(),
                content.body.is_rich(),
            )
            .await?;

        attach(handle.as_mut(), &step.attachments).await;

        match handle.bind_identity(self.sender).await {
            Ok(identity) => outcome.identity = identity,
            Err(err) => BestEffort::IdentityBinding.swallow(&err),
        }

        match (outcome.disposition, outcome.scheduled) {
            (Disposition::Deferred, Some(at)) => {
                handle.save().await?;

                let compensation = self.compensator.apply(handle.as_mut(), at).await;
                audit.compensation(&compensation);
                if let Some(warning) = &compensation.error {
                    outcome.error = Some(format!("Compensation warning: {warning}"));
                }
                outcome.compensation = Some(compensation);

                self.submit(handle, contact, outcome).await
            }
            (Disposition::Draft, _) => {
                handle.save().await?;
                internal!("Saved step #{} for {} as a draft", outcome.step, contact.email());
                Ok(())
            }
            _ => self.submit(handle, contact, outcome).await,
        }
    }

    async fn submit(
        &self,
        handle: Box<dyn MessageHandle>,
        contact: &Contact,
        outcome: &mut DispatchOutcome,
    ) -> Result<(), DispatchError> {
        let item_id = handle
            .submit()
            .await
            .map_err(|source| DispatchError::Submission {
                step: outcome.step,
                recipient: contact.email().to_string(),
                source,
            })?;

        outcome.submitted = true;
        outcome.item_id = item_id;

        internal!(
            level = DEBUG,
            "Submitted step #{} for {} ({}, {})",
            outcome.step,
            contact.email(),
            outcome.disposition,
            describe(outcome.scheduled)
        );

        Ok(())
    }
}

/// Attach every file that exists; problems are logged and skipped
async fn attach(handle: &mut dyn MessageHandle, paths: &[PathBuf]) {
    for path in paths {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            internal!(
                level = DEBUG,
                "Attachment {} does not exist, skipping",
                path.display()
            );
            continue;
        }

        if let Err(err) = handle.add_attachment(path).await {
            BestEffort::Attachment.swallow(&err);
        }
    }
}

fn describe(at: Option<NaiveDateTime>) -> String {
    at.map_or_else(|| "now".to_string(), |at| at.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        audit::AuditConfig,
        schedule::{FixedClock, Timing},
        transport::{MemoryTransport, TransportEvent},
    };

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-03-02 07:00", "%Y-%m-%d %H:%M").unwrap()
    }

    fn offset(days: i64, time: &str) -> Timing {
        Timing::Offset {
            days,
            time: time.to_string(),
        }
    }

    fn audit() -> AuditLog {
        AuditLog::open(
            AuditConfig {
                enabled: false,
                ..AuditConfig::default()
            },
            Arc::new(FixedClock(now())),
        )
    }

    fn contact() -> Contact {
        Contact::new("ana@example.com")
            .unwrap()
            .with_name("Ana", "Silva")
            .with_company("Acme")
    }

    async fn dispatch(
        transport: &MemoryTransport,
        schedule: &[SequenceStep],
        send_enabled: bool,
    ) -> Result<ContactReport, DispatchError> {
        let clock = FixedClock(now());
        let dispatcher = ContactDispatcher {
            transport,
            clock: &clock,
            compensator: Compensator::default(),
            sender: Some("ana.sender@example.com"),
        };

        dispatcher
            .dispatch(&contact(), schedule, send_enabled, 0, &mut audit())
            .await
    }

    #[tokio::test]
    async fn test_inert_step_skipped() {
        let transport = MemoryTransport::new();
        let schedule = vec![
            SequenceStep::new("Hi {FirstName}", "One", offset(0, "9:00 AM")),
            SequenceStep::new(" ", "\t", offset(1, "9:00 AM")),
            SequenceStep::new("Again", "Three", offset(2, "9:00 AM")),
        ];

        let report = dispatch(&transport, &schedule, true).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.count(), 2);
        assert_eq!(report.outcomes[0].step, 1);
        assert_eq!(report.outcomes[1].step, 3);
        assert_eq!(report.outcomes[0].subject, "Hi Ana");
    }

    #[tokio::test]
    async fn test_deferred_saved_before_submit() {
        let transport = MemoryTransport::new();
        let schedule = vec![SequenceStep::new("Hello", "Body", offset(1, "9:00 AM"))];

        let report = dispatch(&transport, &schedule, true).await.unwrap();
        let outcome = &report.outcomes[0];

        assert_eq!(outcome.disposition, Disposition::Deferred);
        assert!(outcome.submitted);
        assert_eq!(outcome.item_id.as_deref(), Some("mem-0000"));

        let events = transport.events();
        let saved = events
            .iter()
            .position(|e| *e == TransportEvent::Saved { id: 0 })
            .unwrap();
        let written = events
            .iter()
            .position(|e| matches!(e, TransportEvent::DeferredWrite { .. }))
            .unwrap();
        let submitted = events
            .iter()
            .position(|e| *e == TransportEvent::Submitted { id: 0 })
            .unwrap();
        assert!(saved < written && written < submitted);
    }

    #[tokio::test]
    async fn test_past_and_immediate_submit_now() {
        let transport = MemoryTransport::new();
        let schedule = vec![
            SequenceStep::new("Past", "Body", offset(0, "6:00 AM")),
            SequenceStep::new("Now", "Body", offset(3, "Immediately")),
        ];

        let report = dispatch(&transport, &schedule, true).await.unwrap();

        assert!(
            report
                .outcomes
                .iter()
                .all(|o| o.disposition == Disposition::Immediate && o.submitted)
        );
        assert_eq!(report.outcomes[1].scheduled, None);
        assert_eq!(
            transport.count(|e| matches!(e, TransportEvent::DeferredWrite { .. })),
            0
        );
        assert_eq!(transport.count(|e| matches!(e, TransportEvent::Saved { .. })), 0);
    }

    #[tokio::test]
    async fn test_drafts_only_when_not_sending() {
        let transport = MemoryTransport::new();
        let schedule = vec![SequenceStep::new("Hello", "Body", offset(1, "9:00 AM"))];

        let report = dispatch(&transport, &schedule, false).await.unwrap();

        assert_eq!(report.drafts(), 1);
        assert_eq!(report.submitted(), 0);
        assert!(transport.submitted().is_empty());
        assert!(transport.messages()[0].saved);
    }

    #[tokio::test]
    async fn test_identity_preference_and_fallback() {
        let transport = MemoryTransport::new()
            .with_identities(["team@example.com", "Ana.Sender@example.com"]);
        let schedule = vec![SequenceStep::new("Hello", "Body", offset(0, ""))];

        let report = dispatch(&transport, &schedule, true).await.unwrap();
        assert_eq!(
            report.outcomes[0].identity.as_deref(),
            Some("Ana.Sender@example.com")
        );

        let transport = MemoryTransport::new().with_identities(Vec::<String>::new());
        let report = dispatch(&transport, &schedule, true).await.unwrap();
        assert_eq!(report.outcomes[0].identity, None);
        assert!(report.outcomes[0].submitted);
    }

    #[tokio::test]
    async fn test_attachments_missing_and_failing_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("deck.pdf");
        std::fs::write(&present, b"%PDF").unwrap();

        let schedule = vec![
            SequenceStep::new("Hello", "Body", offset(0, ""))
                .with_attachment(&present)
                .with_attachment(dir.path().join("missing.pdf")),
        ];

        let transport = MemoryTransport::new();
        dispatch(&transport, &schedule, true).await.unwrap();
        assert_eq!(transport.messages()[0].attachments, vec![present.clone()]);

        let transport = MemoryTransport::new().fail_attachments();
        let report = dispatch(&transport, &schedule, true).await.unwrap();
        assert!(report.outcomes[0].submitted);
        assert!(transport.messages()[0].attachments.is_empty());
    }

    #[tokio::test]
    async fn test_submission_failure_stops_contact() {
        let transport = MemoryTransport::new().fail_submission(2);
        let schedule = vec![
            SequenceStep::new("One", "Body", offset(0, "")),
            SequenceStep::new("Two", "Body", offset(0, "")),
            SequenceStep::new("Three", "Body", offset(0, "")),
        ];

        let error = dispatch(&transport, &schedule, true).await.unwrap_err();

        assert!(matches!(
            error,
            DispatchError::Submission { step: 2, ref recipient, .. } if recipient == "ana@example.com"
        ));
        assert_eq!(transport.messages().len(), 2);
        assert_eq!(transport.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_skewed_transport_compensated() {
        let transport = MemoryTransport::new().with_shift(TimeDelta::hours(7));
        let schedule = vec![SequenceStep::new("Hello", "Body", offset(2, "9:00 AM"))];

        let report = dispatch(&transport, &schedule, true).await.unwrap();
        let compensation = report.outcomes[0].compensation.as_ref().unwrap();

        assert!(compensation.applied);
        assert_eq!(
            transport.messages()[0].deferred,
            NaiveDateTime::parse_from_str("2026-03-04 09:00", "%Y-%m-%d %H:%M").ok()
        );
    }

    #[tokio::test]
    async fn test_compensation_error_is_a_warning() {
        let transport = MemoryTransport::new().without_readback();
        let schedule = vec![SequenceStep::new("Hello", "Body", offset(2, "9:00 AM"))];

        let report = dispatch(&transport, &schedule, true).await.unwrap();

        assert!(report.outcomes[0].submitted);
        assert!(
            report.outcomes[0]
                .error
                .as_deref()
                .unwrap()
                .starts_with("Compensation warning:")
        );
    }
}
