//! Insight generation: correlating analyzer patterns into ranked findings.
//!
//! - [`aggregator`] joins co-change, ownership, risk and trend patterns into
//!   [`Insight`](changepulse_core::Insight)s scored by a weighted geometric mean.
//! - [`pipeline`] runs all analyzers concurrently under per-analyzer deadlines
//!   and feeds their output to the aggregator.

pub mod aggregator;
pub mod pipeline;
