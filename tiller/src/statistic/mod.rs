//! Pure metrics computation over the trades accumulated by an execution.
//!
//! All values are decimals, never binary floats; PnL sums and ratios at pip scale must not
//! round.

/// Individual metric generators.
pub mod metric;

/// Aggregated execution metrics and their calculation.
pub mod summary;

pub use summary::{EquityCurvePoint, ExecutionMetrics, PROFIT_FACTOR_CAP};
