pub mod drawdown;
pub mod sharpe;
