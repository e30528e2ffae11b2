//! Deferred-delivery skew compensation
//!
//! Some transports convert a written deferred-delivery value between zones
//! before storing it, so the message would go out hours early or late. The
//! compensator writes the desired value, reads back what was stored, and when
//! the difference looks like a zone offset writes `desired - shift` so the
//! transport's conversion lands on the intended time.
//!
//! A message sees at most two writes. Nothing here aborts dispatch: every
//! transport error is captured in [`CompensationResult::error`].

use cadence_common::internal;
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::{transport::MessageHandle, types::CompensationResult};

/// Shifts at or below this many seconds are clock noise
const MIN_SHIFT_SECS: i64 = 60;

/// Shifts above this many seconds are not zone offsets and are left alone
const MAX_SHIFT_SECS: i64 = 12 * 60 * 60;

/// Whether a detected shift should be corrected
#[must_use]
pub fn is_correctable(shift: TimeDelta) -> bool {
    let magnitude = shift.abs();
    magnitude > TimeDelta::seconds(MIN_SHIFT_SECS)
        && magnitude <= TimeDelta::seconds(MAX_SHIFT_SECS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compensator {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for Compensator {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

const fn default_enabled() -> bool {
    true
}

impl Compensator {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Write `desired` to `handle`, correcting for any detected skew
    pub async fn apply(
        &self,
        handle: &mut dyn MessageHandle,
        desired: NaiveDateTime,
    ) -> CompensationResult {
        let mut result = CompensationResult {
            desired: Some(desired),
            ..CompensationResult::default()
        };

        if let Err(error) = self.write(handle, desired, &mut result).await {
            result.error = Some(error);
        }

        result
    }

    async fn write(
        &self,
        handle: &mut dyn MessageHandle,
        desired: NaiveDateTime,
        result: &mut CompensationResult,
    ) -> Result<(), String> {
        handle
            .set_deferred_delivery(desired)
            .await
            .map_err(|e| e.to_string())?;

        let Some(stored) = handle
            .get_deferred_delivery()
            .await
            .map_err(|e| e.to_string())?
        else {
            return Err("Transport did not report the stored deferred-delivery time".to_string());
        };

        result.first_readback = Some(stored);
        let shift = stored - desired;
        result.shift = Some(shift);

        if !self.enabled || !is_correctable(shift) {
            return Ok(());
        }

        let corrected = desired - shift;
        result.corrected = Some(corrected);

        internal!(
            level = DEBUG,
            "Deferred delivery stored {stored} for {desired}, rewriting as {corrected}"
        );

        handle
            .set_deferred_delivery(corrected)
            .await
            .map_err(|e| e.to_string())?;
        result.applied = true;

        result.final_readback = handle
            .get_deferred_delivery()
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }
}
