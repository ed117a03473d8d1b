//! Grid Planner
//!
//! Pure grid arithmetic: level computation, per-cycle profitability, and
//! capital requirements. No I/O happens here; everything is deterministic
//! for a given input, which is what makes the reconciliation cycle testable.
//!
//! ## Spacing policy
//!
//! Endpoints are inclusive: `spacing = (upper - lower) / (count - 1)`, so
//! both `lower` and `upper` are grid levels and exactly `count` levels are
//! produced. For `[1.0700, 1.0900]` with 20 grids the spacing is
//! ~10.53 pips.

use thiserror::Error;

use crate::types::{round_price, to_pips, GridLevel, Side, PIP};

/// Rejected grid geometry.
#[derive(Debug, Error, PartialEq)]
pub enum InvalidRangeError {
    #[error("lower level ({lower}) must be less than upper level ({upper})")]
    Inverted { lower: f64, upper: f64 },

    #[error("grid count ({0}) must be at least 2")]
    TooFewGrids(usize),
}

/// Compute the ladder of grid levels for the configured range.
///
/// Levels are strictly increasing, rounded to quote precision, and
/// classified relative to `current_price`: `Buy` below it, `Sell` above it.
/// A level landing exactly on the current price joins whichever side has
/// fewer members, Buy winning a tie.
pub fn compute_levels(
    lower: f64,
    upper: f64,
    count: usize,
    current_price: f64,
) -> Result<Vec<GridLevel>, InvalidRangeError> {
    if lower >= upper {
        return Err(InvalidRangeError::Inverted { lower, upper });
    }
    if count < 2 {
        return Err(InvalidRangeError::TooFewGrids(count));
    }

    let spacing = (upper - lower) / (count - 1) as f64;
    let prices: Vec<f64> = (0..count)
        .map(|i| round_price(lower + i as f64 * spacing))
        .collect();

    let buys = prices.iter().filter(|p| **p < current_price).count();
    let sells = prices.iter().filter(|p| **p > current_price).count();

    Ok(prices
        .into_iter()
        .enumerate()
        .map(|(index, price)| {
            let side = if price < current_price {
                Side::Buy
            } else if price > current_price {
                Side::Sell
            } else if buys <= sells {
                Side::Buy
            } else {
                Side::Sell
            };
            GridLevel { price, side, index }
        })
        .collect())
}

/// Grid spacing in price units under the inclusive-endpoints policy.
pub fn spacing(lower: f64, upper: f64, count: usize) -> f64 {
    (upper - lower) / (count.saturating_sub(1).max(1)) as f64
}

/// Grid spacing expressed in pips.
pub fn spacing_pips(lower: f64, upper: f64, count: usize) -> f64 {
    to_pips(spacing(lower, upper, count))
}

/// Net profit of one complete buy-then-sell cycle, in account currency.
///
/// One cycle earns the grid spacing and pays the spread once, both scaled
/// by the traded units. Rounded to cents.
pub fn profit_per_cycle(spacing_pips: f64, spread_pips: f64, units: u32) -> f64 {
    let gross = spacing_pips * units as f64 * PIP;
    let spread_cost = spread_pips * units as f64 * PIP;
    round_cents(gross - spread_cost)
}

/// Capital required to carry the buy side of the ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct CapitalEstimate {
    /// Notional of all buy-side entries filling at once.
    pub required_capital: f64,
    /// 20% cushion on top of the notional.
    pub margin_buffer: f64,
    pub total_recommended: f64,
    /// Worst-case number of simultaneously filled slots.
    pub max_positions: usize,
}

/// Estimate capital needs assuming the buy half of the grid fills.
pub fn required_capital(units: u32, price: f64, count: usize) -> CapitalEstimate {
    let max_positions = (count / 2).max(1);
    let total_units = units as f64 * max_positions as f64;
    let required = round_cents(total_units * price);
    let buffer = round_cents(required * 0.2);
    CapitalEstimate {
        required_capital: required,
        margin_buffer: buffer,
        total_recommended: round_cents(required + buffer),
        max_positions,
    }
}

/// Projected profit for one day of trading.
pub fn daily_projection(net_profit_per_cycle: f64, cycles_per_day: u32) -> f64 {
    round_cents(net_profit_per_cycle * cycles_per_day as f64)
}

/// Projected profit for a trading month.
pub fn monthly_projection(daily_profit: f64, trading_days: u32) -> f64 {
    round_cents(daily_profit * trading_days as f64)
}

/// Monthly return on investment as a percentage; 0 for non-positive capital.
pub fn return_on_investment(capital: f64, monthly_profit: f64) -> f64 {
    if capital > 0.0 {
        round_cents(monthly_profit / capital * 100.0)
    } else {
        0.0
    }
}

/// Everything the `plan` command needs to render a grid report.
#[derive(Debug, Clone)]
pub struct GridReport {
    pub instrument: String,
    pub current_price: f64,
    pub lower_level: f64,
    pub upper_level: f64,
    pub number_of_grids: usize,
    pub spacing_pips: f64,
    pub buy_levels: Vec<f64>,
    pub sell_levels: Vec<f64>,
    pub units_per_trade: u32,
    pub gross_profit_per_cycle: f64,
    pub spread_cost_per_cycle: f64,
    pub net_profit_per_cycle: f64,
    pub expected_daily_profit: f64,
    pub expected_monthly_profit: f64,
    pub monthly_roi_percent: f64,
    pub capital: CapitalEstimate,
    pub warnings: Vec<String>,
}

/// Build the full grid configuration report for the given market reading.
pub fn grid_report(
    instrument: &str,
    lower: f64,
    upper: f64,
    count: usize,
    units: u32,
    current_price: f64,
    spread_pips: f64,
) -> Result<GridReport, InvalidRangeError> {
    let levels = compute_levels(lower, upper, count, current_price)?;
    let spacing_pips = spacing_pips(lower, upper, count);

    let gross = round_cents(spacing_pips * units as f64 * PIP);
    let spread_cost = round_cents(spread_pips * units as f64 * PIP);
    let net = profit_per_cycle(spacing_pips, spread_pips, units);

    // A full range traversal completes roughly one cycle per level pair;
    // assume half of those complete in a typical ranging day.
    let cycles_per_day = ((to_pips(upper - lower) / spacing_pips) / 2.0).max(1.0) as u32;
    let daily = daily_projection(net, cycles_per_day);
    let monthly = monthly_projection(daily, 20);

    let capital = required_capital(units, current_price, count);
    let roi = return_on_investment(capital.required_capital, monthly);

    let mut warnings = Vec::new();
    if spacing_pips < 1.0 {
        warnings.push(format!("very small grid spacing: {:.2} pips", spacing_pips));
    }
    if spread_cost >= gross && gross > 0.0 {
        warnings.push(format!(
            "spread cost (${:.2}) eats the whole gross profit (${:.2})",
            spread_cost, gross
        ));
    }
    if count > 100 {
        warnings.push(format!("large number of grids: {}", count));
    }

    Ok(GridReport {
        instrument: instrument.to_string(),
        current_price,
        lower_level: lower,
        upper_level: upper,
        number_of_grids: count,
        spacing_pips,
        buy_levels: levels
            .iter()
            .filter(|l| l.side == Side::Buy)
            .map(|l| l.price)
            .collect(),
        sell_levels: levels
            .iter()
            .filter(|l| l.side == Side::Sell)
            .map(|l| l.price)
            .collect(),
        units_per_trade: units,
        gross_profit_per_cycle: gross,
        spread_cost_per_cycle: spread_cost,
        net_profit_per_cycle: net,
        expected_daily_profit: daily,
        expected_monthly_profit: monthly,
        monthly_roi_percent: roi,
        capital,
        warnings,
    })
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_inverted_range() {
        assert_eq!(
            compute_levels(1.09, 1.07, 20, 1.08),
            Err(InvalidRangeError::Inverted {
                lower: 1.09,
                upper: 1.07
            })
        );
    }

    #[test]
    fn test_rejects_single_grid() {
        assert_eq!(
            compute_levels(1.07, 1.09, 1, 1.08),
            Err(InvalidRangeError::TooFewGrids(1))
        );
    }

    #[test]
    fn test_count_and_monotonicity() {
        let levels = compute_levels(1.0700, 1.0900, 20, 1.0800).unwrap();
        assert_eq!(levels.len(), 20);
        for pair in levels.windows(2) {
            assert!(pair[0].price < pair[1].price);
        }
        assert!(levels.iter().all(|l| l.price >= 1.0700 && l.price <= 1.0900));
    }

    #[test]
    fn test_inclusive_endpoints() {
        let levels = compute_levels(1.0700, 1.0900, 20, 1.0800).unwrap();
        assert_relative_eq!(levels.first().unwrap().price, 1.0700, epsilon = 1e-9);
        assert_relative_eq!(levels.last().unwrap().price, 1.0900, epsilon = 1e-9);
    }

    #[test]
    fn test_spacing_for_reference_grid() {
        // 200 pips over 19 gaps.
        assert_relative_eq!(
            spacing_pips(1.0700, 1.0900, 20),
            10.5263,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_side_classification() {
        let levels = compute_levels(1.0700, 1.0900, 20, 1.0800).unwrap();
        let buys = levels.iter().filter(|l| l.side == Side::Buy).count();
        let sells = levels.iter().filter(|l| l.side == Side::Sell).count();
        assert_eq!(buys + sells, 20);
        // 1.0800 falls between levels 9 and 10, so the split is 10/10.
        assert_eq!(buys, 10);
        assert_eq!(sells, 10);
        for level in &levels {
            if level.price < 1.0800 {
                assert_eq!(level.side, Side::Buy, "level {} below price", level.price);
            } else {
                assert_eq!(level.side, Side::Sell, "level {} above price", level.price);
            }
        }
    }

    #[test]
    fn test_level_equal_to_price_breaks_tie_to_buy() {
        // 3 levels at 1.07/1.08/1.09, price exactly on the middle one:
        // one buy below, one sell above, so the tie goes to Buy.
        let levels = compute_levels(1.07, 1.09, 3, 1.08).unwrap();
        assert_eq!(levels[0].side, Side::Buy);
        assert_eq!(levels[1].side, Side::Buy);
        assert_eq!(levels[2].side, Side::Sell);
    }

    #[test]
    fn test_level_equal_to_price_joins_smaller_side() {
        // Levels 1.0700 / 1.0710 / 1.0720 / 1.0730 with the price on index 2:
        // two buys below, one sell above, so the equal level joins the sells.
        let levels = compute_levels(1.0700, 1.0730, 4, 1.0720).unwrap();
        assert_eq!(levels[2].side, Side::Sell);
    }

    #[test]
    fn test_deterministic() {
        let a = compute_levels(1.0700, 1.0900, 20, 1.0800).unwrap();
        let b = compute_levels(1.0700, 1.0900, 20, 1.0800).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_profit_per_cycle() {
        // 10 pips spacing, 1 pip spread, 1000 units: (10 - 1) * 1000 * 0.0001.
        assert_relative_eq!(profit_per_cycle(10.0, 1.0, 1000), 0.90, epsilon = 1e-9);
    }

    #[test]
    fn test_profit_per_cycle_negative_when_spread_dominates() {
        assert!(profit_per_cycle(1.0, 2.5, 1000) < 0.0);
    }

    #[test]
    fn test_required_capital() {
        let estimate = required_capital(1000, 1.08, 20);
        assert_eq!(estimate.max_positions, 10);
        assert_relative_eq!(estimate.required_capital, 10_800.0, epsilon = 1e-6);
        assert_relative_eq!(estimate.margin_buffer, 2_160.0, epsilon = 1e-6);
        assert_relative_eq!(estimate.total_recommended, 12_960.0, epsilon = 1e-6);
    }

    #[test]
    fn test_projections() {
        assert_relative_eq!(daily_projection(0.9, 10), 9.0, epsilon = 1e-9);
        assert_relative_eq!(monthly_projection(9.0, 20), 180.0, epsilon = 1e-9);
        assert_relative_eq!(return_on_investment(10_800.0, 180.0), 1.67, epsilon = 1e-9);
        assert_eq!(return_on_investment(0.0, 180.0), 0.0);
    }

    #[test]
    fn test_grid_report_warns_on_wide_spread() {
        let report = grid_report("EUR_USD", 1.0700, 1.0710, 11, 1000, 1.0705, 3.0).unwrap();
        // 1 pip spacing, 3 pip spread: the cycle loses money.
        assert!(report.net_profit_per_cycle < 0.0);
        assert!(!report.warnings.is_empty());
    }
}
