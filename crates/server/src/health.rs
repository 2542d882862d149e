//! Subsystem health states shared by the health endpoint.

use serde::Serialize;

/// Health of one subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierStatus {
    Healthy,
    /// Running without its backing store; requests still succeed.
    Degraded,
    Disabled,
    /// Requests depending on this subsystem will fail.
    Unavailable,
}

impl TierStatus {
    /// Whether the subsystem is working as configured.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Healthy | Self::Disabled)
    }
}
