use crate::error::TillerError;
use crate::lifecycle::task::Account;

/// Brokerage adapter used when a `graceful_close` stop dispatches a position-closing job.
///
/// Order placement and account queries live behind this seam; the core never talks to a
/// brokerage directly.
pub trait OrderGateway: Send + Sync {
    /// Close every open position held by the account. Returns the number of positions closed.
    fn close_all_positions(&self, account: &Account) -> Result<u32, TillerError>;
}

/// Gateway for deployments without a brokerage link (backtest-only installs, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOrderGateway;

impl OrderGateway for NullOrderGateway {
    fn close_all_positions(&self, _account: &Account) -> Result<u32, TillerError> {
        Ok(0)
    }
}
