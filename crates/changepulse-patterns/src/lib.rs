//! Change-history pattern mining: co-change, rhythm, ownership and churn.
//!
//! Each analyzer reads a validated [`snapshot::Snapshot`] of one project's
//! commits and file changes and returns deterministic, ordered patterns
//! together with run [`Metrics`](changepulse_core::Metrics). Analyzers are
//! independent of one another and check a cooperative
//! [`Budget`](changepulse_core::Budget) so a caller can bound their runtime.

pub mod cooccurrence;
pub mod developer;
pub mod magnitude;
pub mod snapshot;
pub mod temporal;
