use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::metric::{drawdown::DrawdownGenerator, sharpe::annualised_sharpe};
use crate::lifecycle::execution::TradeLogEntry;

/// Profit factor reported when there are wins but no losses.
pub const PROFIT_FACTOR_CAP: Decimal = Decimal::from_parts(9_999_999, 0, 0, false, 4);

/// One point of the equity curve: the balance after a trade, stamped with its exit time.
/// The curve starts from the initial balance with no timestamp.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct EquityCurvePoint {
    pub timestamp: Option<DateTime<Utc>>,
    pub balance: Decimal,
}

/// Aggregated metrics of an execution, computed from its accumulated trades.
///
/// `profit_factor` is `None` when wins and losses are both zero, and capped at
/// [`PROFIT_FACTOR_CAP`] when there are wins but no losses. `sharpe_ratio` is `None` when
/// undefined (fewer than two trades, or zero deviation).
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ExecutionMetrics {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_return: Decimal,
    pub win_rate: Decimal,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub profit_factor: Option<Decimal>,
    pub max_drawdown: Decimal,
    pub sharpe_ratio: Option<Decimal>,
    pub equity_curve: Vec<EquityCurvePoint>,
}

impl ExecutionMetrics {
    /// Calculate all metrics from trade data and the starting balance.
    pub fn calculate(trades: &[TradeLogEntry], initial_balance: Decimal) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let mut metrics = Self {
            total_trades: trades.len() as u64,
            ..Self::default()
        };

        metrics.total_pnl = trades.iter().map(|trade| trade.pnl).sum();
        metrics.realized_pnl = trades
            .iter()
            .filter(|trade| trade.exit_time.is_some())
            .map(|trade| trade.pnl)
            .sum();
        metrics.unrealized_pnl = metrics.total_pnl - metrics.realized_pnl;

        metrics.total_return = if initial_balance > Decimal::ZERO {
            metrics
                .total_pnl
                .checked_div(initial_balance)
                .map(|ratio| ratio * Decimal::ONE_HUNDRED)
                .unwrap_or(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        let wins: Vec<Decimal> = trades
            .iter()
            .map(|trade| trade.pnl)
            .filter(|pnl| *pnl > Decimal::ZERO)
            .collect();
        let losses: Vec<Decimal> = trades
            .iter()
            .map(|trade| trade.pnl)
            .filter(|pnl| *pnl < Decimal::ZERO)
            .collect();

        metrics.winning_trades = wins.len() as u64;
        metrics.losing_trades = losses.len() as u64;
        metrics.win_rate = Decimal::from(metrics.winning_trades)
            .checked_div(Decimal::from(metrics.total_trades))
            .map(|ratio| ratio * Decimal::ONE_HUNDRED)
            .unwrap_or(Decimal::ZERO);

        let gross_profit: Decimal = wins.iter().sum();
        let gross_loss: Decimal = losses.iter().sum::<Decimal>().abs();

        metrics.average_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            gross_profit
                .checked_div(Decimal::from(wins.len()))
                .unwrap_or(Decimal::ZERO)
        };
        metrics.average_loss = if losses.is_empty() {
            Decimal::ZERO
        } else {
            (-gross_loss)
                .checked_div(Decimal::from(losses.len()))
                .unwrap_or(Decimal::ZERO)
        };

        metrics.profit_factor = if gross_loss > Decimal::ZERO {
            gross_profit.checked_div(gross_loss)
        } else if gross_profit.is_zero() {
            None
        } else {
            Some(PROFIT_FACTOR_CAP)
        };

        let mut balance = initial_balance;
        let mut drawdown = DrawdownGenerator::init(initial_balance);
        metrics.equity_curve.push(EquityCurvePoint {
            timestamp: None,
            balance,
        });
        for trade in trades {
            balance += trade.pnl;
            drawdown.update(balance);
            metrics.equity_curve.push(EquityCurvePoint {
                timestamp: trade.exit_time,
                balance,
            });
        }
        metrics.max_drawdown = drawdown.max_drawdown();

        let pnls: Vec<Decimal> = trades.iter().map(|trade| trade.pnl).collect();
        metrics.sharpe_ratio = annualised_sharpe(&pnls);

        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tiller_integration::de;

    fn trade(pnl: Decimal, exit_time: Option<&str>) -> TradeLogEntry {
        TradeLogEntry {
            pnl,
            exit_time: exit_time.and_then(de::rfc3339_utc),
            ..TradeLogEntry::default()
        }
    }

    #[test]
    fn test_empty_trades() {
        let metrics = ExecutionMetrics::calculate(&[], dec!(10000));

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, dec!(0));
        assert_eq!(metrics.total_return, dec!(0));
        assert_eq!(metrics.sharpe_ratio, None);
        assert_eq!(metrics.profit_factor, None);
        assert!(metrics.equity_curve.is_empty());
    }

    #[test]
    fn test_two_trade_backtest() {
        let trades = vec![
            trade(dec!(50), Some("2024-01-01T00:20:00Z")),
            trade(dec!(-20), Some("2024-01-01T00:40:00Z")),
        ];

        let metrics = ExecutionMetrics::calculate(&trades, dec!(10000));

        assert_eq!(metrics.total_trades, 2);
        assert_eq!(metrics.winning_trades, 1);
        assert_eq!(metrics.losing_trades, 1);
        assert_eq!(metrics.total_pnl, dec!(30));
        assert_eq!(metrics.realized_pnl, dec!(30));
        assert_eq!(metrics.unrealized_pnl, dec!(0));
        assert_eq!(metrics.win_rate, dec!(50));
        assert_eq!(metrics.total_return, dec!(0.3));
        assert_eq!(metrics.average_win, dec!(50));
        assert_eq!(metrics.average_loss, dec!(-20));
        assert_eq!(metrics.profit_factor, Some(dec!(2.5)));

        let balances: Vec<Decimal> = metrics
            .equity_curve
            .iter()
            .map(|point| point.balance)
            .collect();
        assert_eq!(balances, vec![dec!(10000), dec!(10050), dec!(10030)]);

        // Peak 10050 -> trough 10030: (20 / 10050) * 100
        assert_eq!(
            metrics.max_drawdown.round_dp(4),
            dec!(0.199).round_dp(4)
        );
        assert!(metrics.sharpe_ratio.is_some());
    }

    #[test]
    fn test_profit_factor_sentinel_without_losses() {
        let trades = vec![trade(dec!(10), None), trade(dec!(5), None)];
        let metrics = ExecutionMetrics::calculate(&trades, dec!(1000));

        assert_eq!(metrics.profit_factor, Some(PROFIT_FACTOR_CAP));
        assert_eq!(metrics.profit_factor, Some(dec!(999.9999)));
        // Open trades (no exit time) count as unrealized.
        assert_eq!(metrics.realized_pnl, dec!(0));
        assert_eq!(metrics.unrealized_pnl, dec!(15));
    }

    #[test]
    fn test_profit_factor_undefined_when_flat() {
        let trades = vec![trade(dec!(0), None), trade(dec!(0), None)];
        let metrics = ExecutionMetrics::calculate(&trades, dec!(1000));

        assert_eq!(metrics.profit_factor, None);
        assert_eq!(metrics.winning_trades, 0);
        assert_eq!(metrics.losing_trades, 0);
        assert_eq!(metrics.sharpe_ratio, None);
    }

    #[test]
    fn test_total_return_zero_for_non_positive_balance() {
        let trades = vec![trade(dec!(50), None)];
        let metrics = ExecutionMetrics::calculate(&trades, dec!(0));

        assert_eq!(metrics.total_return, dec!(0));
    }

    #[test]
    fn test_total_pnl_is_decimal_sum_of_trades() {
        let trades = vec![
            trade(dec!(0.1), None),
            trade(dec!(0.2), None),
            trade(dec!(-0.3), None),
        ];
        let metrics = ExecutionMetrics::calculate(&trades, dec!(100));

        // Exact decimal arithmetic: no float residue.
        assert_eq!(metrics.total_pnl, dec!(0));
    }
}
