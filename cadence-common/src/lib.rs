//! Types and plumbing shared by every cadence crate: the contact model,
//! its errors, and logging setup.

pub mod contact;
pub mod error;
pub mod logging;

pub use contact::{Contact, ContactRecord, Tokens};
pub use error::ContactError;
pub use tracing;
