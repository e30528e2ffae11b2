//! Email sequence scheduling and delivery
//!
//! This crate turns a multi-step email sequence into concrete messages for
//! each contact:
//! - Resolve each step's send time from a date or a day offset
//! - Spread sends across a random window
//! - Merge contact tokens into the subject and body
//! - Hand messages to a mail transport, correcting deferred-delivery skew
//! - Record every decision in a per-run audit log

pub mod audit;
pub mod compensation;
pub mod contacts;
pub mod dispatcher;
mod error;
pub mod schedule;
pub mod template;
pub mod throttle;
pub mod transport;
mod types;

pub use audit::{AuditConfig, AuditLog};
pub use compensation::Compensator;
pub use contacts::{ContactFile, ContactSource};
pub use dispatcher::{CampaignDispatcher, ContactDispatcher, ContactReport, DispatchConfig};
pub use error::{BestEffort, DispatchError, InputError, TransportError};
pub use schedule::{Clock, FixedClock, Schedule, SequenceStep, SystemClock, Timing};
pub use template::{Body, Content};
pub use throttle::{Throttle, ThrottleConfig};
pub use transport::{MemoryTransport, MessageHandle, SpoolTransport, Transport};
pub use types::{CompensationResult, Disposition, DispatchOutcome, RunSummary};
