use rust_decimal::{Decimal, MathematicalOps};

/// Annualised Sharpe ratio over per-trade PnL values.
///
/// Uses the population standard deviation and a 252-trading-day annualisation factor.
/// Returns `None` when there are fewer than two trades or the deviation is zero - a ratio
/// over a constant series carries no information.
///
/// See docs: <https://www.investopedia.com/articles/07/sharpe_ratio.asp>
pub fn annualised_sharpe(pnls: &[Decimal]) -> Option<Decimal> {
    if pnls.len() < 2 {
        return None;
    }

    let count = Decimal::from(pnls.len());
    let mean = pnls.iter().sum::<Decimal>().checked_div(count)?;
    let variance = pnls
        .iter()
        .map(|pnl| {
            let diff = pnl - mean;
            diff * diff
        })
        .sum::<Decimal>()
        .checked_div(count)?;
    let std_dev = variance.sqrt()?;

    if std_dev.is_zero() {
        return None;
    }

    let annualisation = Decimal::from(252).sqrt()?;
    mean.checked_div(std_dev)
        .and_then(|ratio| ratio.checked_mul(annualisation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fewer_than_two_trades_is_undefined() {
        assert_eq!(annualised_sharpe(&[]), None);
        assert_eq!(annualised_sharpe(&[dec!(50)]), None);
    }

    #[test]
    fn test_zero_deviation_is_undefined() {
        assert_eq!(annualised_sharpe(&[dec!(10), dec!(10), dec!(10)]), None);
    }

    #[test]
    fn test_annualised_ratio() {
        // mean = 15, population std dev = 35
        let pnls = [dec!(50), dec!(-20)];
        let ratio = annualised_sharpe(&pnls).unwrap();

        let expected = (dec!(15) / dec!(35)) * Decimal::from(252).sqrt().unwrap();
        assert_eq!(ratio, expected);
        // Sanity: sqrt(252) ~ 15.87, so the ratio lands near 6.8.
        assert!(ratio > dec!(6.7) && ratio < dec!(6.9));
    }
}
