//! Risk management
//!
//! Account-level checks that run after every reconciliation cycle. Any
//! breach latches [`RiskState::halted`]; from then on the scheduler issues
//! only cancel actions for the rest of the run. The spread check is the one
//! exception: it suppresses placement for the current cycle only and never
//! touches the persistent risk state.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::RiskConfig;
use crate::types::{AccountSnapshot, PriceTick};

/// A halting risk breach, carrying the values that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskBreach {
    #[error("max loss exceeded: unrealized P&L {unrealized_pnl:.2} breaches limit -{limit:.2}")]
    MaxLossExceeded { unrealized_pnl: f64, limit: f64 },

    #[error("too many open positions: {count} filled slots exceed limit {limit}")]
    TooManyPositions { count: usize, limit: usize },

    #[error("margin critical: {usage:.1}% of equity in use (threshold {threshold:.1}%)")]
    MarginCritical { usage: f64, threshold: f64 },
}

/// Transient per-cycle condition. Suppresses placement for the cycle that
/// observed it and is never latched into [`RiskState`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("spread too wide: {spread_pips:.1} pips exceeds limit {limit:.1}")]
pub struct SpreadTooWide {
    pub spread_pips: f64,
    pub limit: f64,
}

/// Process-wide halt latch. Monotonic: once set it stays set for the run.
#[derive(Debug, Clone, Default)]
pub struct RiskState {
    pub halted: bool,
    pub halt_reason: Option<RiskBreach>,
    pub halted_at: Option<DateTime<Utc>>,
}

/// Evaluates account state against configured limits.
#[derive(Debug)]
pub struct RiskController {
    config: RiskConfig,
    state: RiskState,
}

impl RiskController {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            state: RiskState::default(),
        }
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted
    }

    /// Fails when the unrealized loss has reached the configured maximum.
    pub fn check_max_loss(&self, snapshot: &AccountSnapshot) -> Result<(), RiskBreach> {
        if snapshot.unrealized_pnl <= -self.config.max_loss {
            return Err(RiskBreach::MaxLossExceeded {
                unrealized_pnl: snapshot.unrealized_pnl,
                limit: self.config.max_loss,
            });
        }
        Ok(())
    }

    /// Fails when more slots hold filled positions than allowed.
    pub fn check_position_count(&self, filled_slots: usize) -> Result<(), RiskBreach> {
        if filled_slots > self.config.max_open_positions {
            return Err(RiskBreach::TooManyPositions {
                count: filled_slots,
                limit: self.config.max_open_positions,
            });
        }
        Ok(())
    }

    /// Fails when margin in use exceeds the critical fraction of equity.
    pub fn check_margin(&self, snapshot: &AccountSnapshot) -> Result<(), RiskBreach> {
        let usage = snapshot.margin_usage();
        if usage > self.config.margin_critical_ratio {
            return Err(RiskBreach::MarginCritical {
                usage: usage * 100.0,
                threshold: self.config.margin_critical_ratio * 100.0,
            });
        }
        Ok(())
    }

    /// Transient check: a wide spread suppresses new orders for this cycle
    /// only. Does not halt and is not recorded in [`RiskState`].
    pub fn check_spread(&self, tick: &PriceTick) -> Result<(), SpreadTooWide> {
        if tick.spread_pips > self.config.max_spread_pips {
            warn!(
                spread_pips = tick.spread_pips,
                max_spread_pips = self.config.max_spread_pips,
                "spread too wide, suppressing new orders this cycle"
            );
            return Err(SpreadTooWide {
                spread_pips: tick.spread_pips,
                limit: self.config.max_spread_pips,
            });
        }
        Ok(())
    }

    /// Run all halting checks against the cycle's fresh snapshot, latching
    /// the halt on the first breach. Returns the breach that fired, if any.
    pub fn evaluate(
        &mut self,
        snapshot: &AccountSnapshot,
        filled_slots: usize,
    ) -> Option<&RiskBreach> {
        if self.state.halted {
            return self.state.halt_reason.as_ref();
        }

        let breach = self
            .check_max_loss(snapshot)
            .and_then(|()| self.check_position_count(filled_slots))
            .and_then(|()| self.check_margin(snapshot))
            .err();

        match breach {
            Some(breach) => {
                error!(
                    balance = snapshot.balance,
                    equity = snapshot.equity,
                    unrealized_pnl = snapshot.unrealized_pnl,
                    margin_used = snapshot.margin_used,
                    filled_slots,
                    "risk breach, halting: {breach}"
                );
                self.state.halted = true;
                self.state.halted_at = Some(Utc::now());
                self.state.halt_reason = Some(breach);
                self.state.halt_reason.as_ref()
            }
            None => {
                debug!(
                    unrealized_pnl = snapshot.unrealized_pnl,
                    filled_slots, "risk checks passed"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn controller() -> RiskController {
        RiskController::new(RiskConfig {
            max_loss: 50.0,
            max_open_positions: 10,
            max_spread_pips: 2.0,
            margin_critical_ratio: 0.5,
        })
    }

    fn snapshot(unrealized_pnl: f64, margin_used: f64) -> AccountSnapshot {
        AccountSnapshot {
            balance: 1000.0,
            equity: 1000.0 + unrealized_pnl,
            unrealized_pnl,
            margin_used,
            open_position_count: 0,
        }
    }

    #[test]
    fn test_max_loss_breach() {
        let rc = controller();
        assert!(rc.check_max_loss(&snapshot(-49.0, 0.0)).is_ok());
        // The limit itself breaches: P&L <= -limit.
        assert_eq!(
            rc.check_max_loss(&snapshot(-50.0, 0.0)),
            Err(RiskBreach::MaxLossExceeded {
                unrealized_pnl: -50.0,
                limit: 50.0
            })
        );
        assert!(rc.check_max_loss(&snapshot(-51.0, 0.0)).is_err());
    }

    #[test]
    fn test_position_count_breach() {
        let rc = controller();
        assert!(rc.check_position_count(10).is_ok());
        assert_eq!(
            rc.check_position_count(11),
            Err(RiskBreach::TooManyPositions {
                count: 11,
                limit: 10
            })
        );
    }

    #[test]
    fn test_margin_breach() {
        let rc = controller();
        assert!(rc.check_margin(&snapshot(0.0, 400.0)).is_ok());
        assert!(rc.check_margin(&snapshot(0.0, 600.0)).is_err());
    }

    #[test]
    fn test_spread_check_is_transient() {
        let mut rc = controller();
        let wide = PriceTick::from_quotes(1.07982, 1.08017, Utc::now());
        assert!(wide.spread_pips > 2.0);
        let err = rc.check_spread(&wide).unwrap_err();
        assert!((err.spread_pips - 3.5).abs() < 1e-6);
        // The spread check never halts.
        assert!(!rc.is_halted());
        rc.evaluate(&snapshot(-10.0, 0.0), 3);
        assert!(!rc.is_halted());

        let tight = PriceTick::from_quotes(1.07995, 1.08005, Utc::now());
        assert!(rc.check_spread(&tight).is_ok());
    }

    #[test]
    fn test_evaluate_latches_halt() {
        let mut rc = controller();
        assert!(rc.evaluate(&snapshot(-10.0, 0.0), 3).is_none());
        assert!(!rc.is_halted());

        let breach = rc.evaluate(&snapshot(-51.0, 0.0), 3).cloned();
        assert!(matches!(breach, Some(RiskBreach::MaxLossExceeded { .. })));
        assert!(rc.is_halted());
        assert!(rc.state().halted_at.is_some());
    }

    #[test]
    fn test_halt_is_monotonic() {
        let mut rc = controller();
        rc.evaluate(&snapshot(-51.0, 0.0), 3);
        assert!(rc.is_halted());

        // A later healthy snapshot does not clear the halt.
        let reason = rc.evaluate(&snapshot(5.0, 0.0), 0).cloned();
        assert!(rc.is_halted());
        assert!(matches!(reason, Some(RiskBreach::MaxLossExceeded { .. })));
    }

    #[test]
    fn test_check_order() {
        // Max loss fires before position count when both are breached.
        let mut rc = controller();
        let breach = rc.evaluate(&snapshot(-100.0, 900.0), 20).cloned();
        assert!(matches!(breach, Some(RiskBreach::MaxLossExceeded { .. })));
    }
}
