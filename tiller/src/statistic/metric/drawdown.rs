use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum peak-to-trough decline of an equity balance, expressed as a percentage of the
/// peak.
///
/// See documentation: <https://www.investopedia.com/terms/d/drawdown.asp>
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct DrawdownGenerator {
    pub peak: Option<Decimal>,
    pub max_pct: Decimal,
}

impl DrawdownGenerator {
    /// Initialise from the starting balance.
    pub fn init(initial: Decimal) -> Self {
        Self {
            peak: Some(initial),
            max_pct: Decimal::ZERO,
        }
    }

    /// Update with the next balance point, tracking the running peak and the largest
    /// percentage decline from it.
    pub fn update(&mut self, balance: Decimal) {
        let peak = match self.peak {
            Some(peak) if peak >= balance => peak,
            _ => {
                self.peak = Some(balance);
                return;
            }
        };

        if peak > Decimal::ZERO {
            let drawdown = (peak - balance)
                .checked_div(peak)
                .map(|ratio| ratio * Decimal::ONE_HUNDRED)
                .unwrap_or(Decimal::ZERO);
            if drawdown > self.max_pct {
                self.max_pct = drawdown;
            }
        }
    }

    pub fn max_drawdown(&self) -> Decimal {
        self.max_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_max_drawdown_tracks_running_peak() {
        struct TestCase {
            input: Decimal,
            expected_max: Decimal,
        }

        let mut generator = DrawdownGenerator::init(dec!(100));

        let cases = vec![
            // TC0: new peak, no drawdown
            TestCase {
                input: dec!(110),
                expected_max: dec!(0),
            },
            // TC1: 10% decline from the 110 peak
            TestCase {
                input: dec!(99),
                expected_max: dec!(10),
            },
            // TC2: deeper decline, 20% from peak
            TestCase {
                input: dec!(88),
                expected_max: dec!(20),
            },
            // TC3: partial recovery keeps the maximum
            TestCase {
                input: dec!(95),
                expected_max: dec!(20),
            },
            // TC4: recovery above the peak does not reset the maximum
            TestCase {
                input: dec!(120),
                expected_max: dec!(20),
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            generator.update(test.input);
            assert_eq!(
                generator.max_drawdown(),
                test.expected_max,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_zero_peak_produces_no_drawdown() {
        let mut generator = DrawdownGenerator::init(dec!(0));
        generator.update(dec!(-10));
        assert_eq!(generator.max_drawdown(), dec!(0));
    }
}
