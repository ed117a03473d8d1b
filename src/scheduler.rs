//! Scheduler Loop
//!
//! Drives one reconciliation + risk-check transaction per fixed interval:
//! `Starting -> Running -> (Halted | Stopped)`. Preflight failures are
//! fatal; a transient failure inside a cycle is logged and the loop simply
//! waits for the next tick. Everything runs on one task, so slot state is
//! only ever mutated between ticks, never concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::gateway::{FeedUnavailable, GatewayError, OrderGateway, PriceFeed};
use crate::ledger::GridLedger;
use crate::planner::{self, InvalidRangeError};
use crate::risk::{RiskController, RiskState};
use crate::types::{GridSlot, SlotState};

/// Lifecycle phase of one bot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotPhase {
    Starting,
    Running,
    Halted,
    Stopped,
}

impl std::fmt::Display for BotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BotPhase::Starting => "starting",
            BotPhase::Running => "running",
            BotPhase::Halted => "halted",
            BotPhase::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Errors that end the run. Everything else is cycle-local.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("preflight failed: {0}")]
    Preflight(#[source] GatewayError),

    #[error("preflight failed: {0}")]
    PreflightFeed(#[source] FeedUnavailable),

    #[error("fatal broker error: {0}")]
    Fatal(#[source] GatewayError),

    #[error("grid configuration rejected: {0}")]
    Grid(#[from] InvalidRangeError),
}

/// Owns the bot's run: planner inputs, ledger, risk controller, and phase.
///
/// Explicitly constructed and passed around; there is no process-wide bot
/// singleton.
pub struct Scheduler<C> {
    config: Config,
    client: Arc<C>,
    ledger: GridLedger,
    risk: RiskController,
    phase: BotPhase,
    cycle_count: u64,
}

impl<C> Scheduler<C>
where
    C: PriceFeed + OrderGateway,
{
    pub fn new(config: Config, client: Arc<C>) -> Self {
        let ledger = GridLedger::new(
            config.trading.instrument.clone(),
            config.trading.units_per_trade,
        );
        let risk = RiskController::new(config.risk.clone());
        Self {
            config,
            client,
            ledger,
            risk,
            phase: BotPhase::Starting,
            cycle_count: 0,
        }
    }

    pub fn phase(&self) -> BotPhase {
        self.phase
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Read-only view of the slot records.
    pub fn slots(&self) -> &[GridSlot] {
        self.ledger.slots()
    }

    pub fn risk_state(&self) -> &RiskState {
        self.risk.state()
    }

    /// Operator action: return parked slots to rotation.
    pub fn clear_cooldowns(&mut self) -> usize {
        self.ledger.clear_cooldowns()
    }

    /// One-time startup checks: connectivity and auth, a first quote, and
    /// the initial ladder. Any failure here is fatal.
    pub async fn preflight(&mut self) -> Result<(), SchedulerError> {
        info!(
            instrument = %self.config.trading.instrument,
            "running preflight checks"
        );

        let snapshot = self
            .client
            .get_account_snapshot()
            .await
            .map_err(SchedulerError::Preflight)?;
        info!(
            balance = snapshot.balance,
            equity = snapshot.equity,
            margin_used = snapshot.margin_used,
            "account reachable"
        );

        let tick = self
            .client
            .get_price(&self.config.trading.instrument)
            .await
            .map_err(SchedulerError::PreflightFeed)?;
        info!(
            bid = tick.bid,
            ask = tick.ask,
            spread_pips = tick.spread_pips,
            "price feed reachable"
        );

        let trading = &self.config.trading;
        let levels = planner::compute_levels(
            trading.lower_level,
            trading.upper_level,
            trading.number_of_grids,
            tick.mid,
        )?;
        info!(
            levels = levels.len(),
            spacing_pips = planner::spacing_pips(
                trading.lower_level,
                trading.upper_level,
                trading.number_of_grids
            ),
            "initial ladder computed"
        );

        self.phase = BotPhase::Running;
        info!("preflight passed");
        Ok(())
    }

    /// One full transaction: fetch price and snapshot, reconcile the ladder,
    /// evaluate risk. Transient failures skip the cycle; only auth-level
    /// failures propagate.
    pub async fn run_once(&mut self) -> Result<(), SchedulerError> {
        self.cycle_count += 1;

        let tick = match self.client.get_price(&self.config.trading.instrument).await {
            Ok(tick) => tick,
            Err(err) => {
                warn!(cycle = self.cycle_count, "skipping cycle: {err}");
                return Ok(());
            }
        };

        let snapshot = match self.client.get_account_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_fatal() => return Err(SchedulerError::Fatal(err)),
            Err(err) => {
                warn!(cycle = self.cycle_count, "skipping cycle: {err}");
                return Ok(());
            }
        };

        let trading = &self.config.trading;
        let targets = planner::compute_levels(
            trading.lower_level,
            trading.upper_level,
            trading.number_of_grids,
            tick.mid,
        )?;

        let halted = self.risk.is_halted();
        let spread_suppressed = !halted && self.risk.check_spread(&tick).is_err();
        let allow_placement = !halted && !spread_suppressed;

        let stats = match self
            .ledger
            .reconcile(self.client.as_ref(), &targets, allow_placement, halted)
            .await
        {
            Ok(stats) => stats,
            Err(err) if err.is_fatal() => return Err(SchedulerError::Fatal(err)),
            Err(err) => {
                warn!(cycle = self.cycle_count, "reconciliation aborted: {err}");
                return Ok(());
            }
        };

        if self.risk.evaluate(&snapshot, self.ledger.filled_count()).is_some()
            && self.phase == BotPhase::Running
        {
            self.phase = BotPhase::Halted;
        }

        info!(
            cycle = self.cycle_count,
            phase = %self.phase,
            mid = tick.mid,
            unrealized_pnl = snapshot.unrealized_pnl,
            %stats,
            "cycle complete"
        );
        Ok(())
    }

    /// Run preflight and then the interval loop until `shutdown` is set or a
    /// fatal error surfaces. Cancellation is cooperative: checked at the top
    /// of every tick, never mid-call.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<(), SchedulerError> {
        self.preflight().await?;

        let mut ticker = interval(Duration::from_secs(
            self.config.monitoring.check_interval_seconds,
        ));
        info!(
            interval_secs = self.config.monitoring.check_interval_seconds,
            "entering trading loop"
        );

        loop {
            ticker.tick().await;

            if shutdown.load(Ordering::SeqCst) {
                self.phase = BotPhase::Stopped;
                break;
            }

            if let Err(err) = self.run_once().await {
                error!("fatal error, stopping: {err}");
                self.phase = BotPhase::Stopped;
                return Err(err);
            }
        }

        self.drain();
        Ok(())
    }

    /// Best-effort shutdown report. Resting orders are intentionally left on
    /// the book; the grid resumes against them on the next run.
    fn drain(&self) {
        let resting = self
            .ledger
            .slots()
            .iter()
            .filter(|s| s.state == SlotState::PendingOrder)
            .count();
        let filled = self.ledger.filled_count();
        info!(
            cycles = self.cycle_count,
            resting_orders = resting,
            filled_slots = filled,
            "stopped; resting orders left on the book"
        );
        if let Some(reason) = &self.risk.state().halt_reason {
            warn!("run ended while halted: {reason}");
        }
    }
}
