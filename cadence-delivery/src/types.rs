//! Records produced while dispatching a campaign

use std::path::PathBuf;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// What happened to a built message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Submitted with a future deferred-delivery timestamp
    Deferred,

    /// Submitted for delivery now
    Immediate,

    /// Saved as a draft, never submitted
    Draft,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
            Self::Draft => "draft",
        })
    }
}

/// Diagnostics from writing a deferred-delivery timestamp
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompensationResult {
    pub desired: Option<NaiveDateTime>,
    pub first_readback: Option<NaiveDateTime>,

    /// `first_readback - desired`
    pub shift: Option<TimeDelta>,

    /// Written on the second pass, when compensation was applied
    pub corrected: Option<NaiveDateTime>,
    pub final_readback: Option<NaiveDateTime>,
    pub applied: bool,
    pub error: Option<String>,
}

impl CompensationResult {
    /// The value the transport reports holding after all writes
    #[must_use]
    pub fn effective(&self) -> Option<NaiveDateTime> {
        self.final_readback.or(self.first_readback)
    }
}

/// The result of one (contact, step) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// 1-based position of the step in the schedule
    pub step: usize,
    pub recipient: String,
    pub subject: String,
    pub raw_date: String,
    pub raw_time: String,

    /// Resolved send time before the send window was applied
    pub parsed: Option<NaiveDateTime>,

    /// Send time after the send window, as handed to the transport
    pub scheduled: Option<NaiveDateTime>,
    pub disposition: Disposition,
    pub created: bool,
    pub submitted: bool,
    pub identity: Option<String>,
    pub item_id: Option<String>,
    pub compensation: Option<CompensationResult>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    #[must_use]
    pub fn new(step: usize, recipient: impl Into<String>, disposition: Disposition) -> Self {
        Self {
            step,
            recipient: recipient.into(),
            subject: String::new(),
            raw_date: String::new(),
            raw_time: String::new(),
            parsed: None,
            scheduled: None,
            disposition,
            created: false,
            submitted: false,
            identity: None,
            item_id: None,
            compensation: None,
            error: None,
        }
    }
}

/// Totals for a completed run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub contacts: usize,
    pub created: usize,
    pub submitted: usize,
    pub drafts: usize,
    pub flushed: bool,
    pub audit_log: Option<PathBuf>,
}

impl RunSummary {
    /// Total emails processed (created or submitted)
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_prefers_final_readback() {
        let first = NaiveDateTime::parse_from_str("2026-03-02 16:00", "%Y-%m-%d %H:%M").ok();
        let last = NaiveDateTime::parse_from_str("2026-03-02 09:00", "%Y-%m-%d %H:%M").ok();

        let mut result = CompensationResult {
            first_readback: first,
            ..CompensationResult::default()
        };
        assert_eq!(result.effective(), first);

        result.final_readback = last;
        assert_eq!(result.effective(), last);
    }

    #[test]
    fn test_disposition_display() {
        assert_eq!(Disposition::Deferred.to_string(), "deferred");
        assert_eq!(Disposition::Draft.to_string(), "draft");
    }
}
