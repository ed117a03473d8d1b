//! Grid Ledger
//!
//! One persistent slot per grid level, tracking the order lifecycle
//! `Empty -> PendingOrder -> Filled -> Empty`, with `Cooldown` for slots a
//! risk halt (or a ladder edge) has taken out of rotation.
//!
//! The ledger is an advisory cache over the broker's records. Each cycle it
//! re-syncs against `list_open_orders` / `list_open_positions`, diffs the
//! planner's target ladder against slot state by price-level identity, and
//! emits a worklist of place/cancel actions. A failed or timed-out broker
//! call leaves the slot exactly as it was, so the next cycle's diff retries
//! it naturally.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::gateway::{GatewayError, OrderGateway};
use crate::types::{
    GridLevel, GridSlot, OpenOrder, OpenPosition, OrderRequest, OrderState, Side, SlotState,
};

/// One entry in the reconciliation worklist.
#[derive(Debug, Clone)]
pub enum SlotAction {
    Place {
        slot_index: usize,
        request: OrderRequest,
    },
    Cancel {
        slot_index: usize,
        order_id: String,
    },
}

/// What one reconciliation cycle did, for the scheduler's log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub placed: usize,
    pub cancelled: usize,
    pub filled: usize,
    pub freed: usize,
    pub parked: usize,
    pub failures: usize,
}

impl std::fmt::Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "placed={} cancelled={} filled={} freed={} parked={} failures={}",
            self.placed, self.cancelled, self.filled, self.freed, self.parked, self.failures
        )
    }
}

/// Slot state machine plus the per-cycle reconciliation that drives it.
#[derive(Debug)]
pub struct GridLedger {
    instrument: String,
    units: u32,
    slots: Vec<GridSlot>,
    /// Slots targeted by the current ladder; duplicates after rounding are
    /// dropped here (higher index loses) and never receive entry orders.
    targeted: Vec<bool>,
}

impl GridLedger {
    pub fn new(instrument: impl Into<String>, units: u32) -> Self {
        Self {
            instrument: instrument.into(),
            units,
            slots: Vec::new(),
            targeted: Vec::new(),
        }
    }

    pub fn slots(&self) -> &[GridSlot] {
        &self.slots
    }

    /// Number of slots currently holding a filled position.
    pub fn filled_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Filled)
            .count()
    }

    /// Operator action: return parked slots to rotation.
    pub fn clear_cooldowns(&mut self) -> usize {
        let mut cleared = 0;
        for slot in &mut self.slots {
            if slot.state == SlotState::Cooldown {
                info!(
                    slot = slot.level.index,
                    price = slot.level.price,
                    "cooldown cleared by operator"
                );
                slot.state = SlotState::Empty;
                slot.order_id = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// One full {observe, diff, act} pass against the broker.
    ///
    /// `allow_placement` is false while the spread is too wide; `halted`
    /// switches the cycle to cancel-only and parks every slot.
    pub async fn reconcile<G: OrderGateway + ?Sized>(
        &mut self,
        gateway: &G,
        targets: &[GridLevel],
        allow_placement: bool,
        halted: bool,
    ) -> Result<CycleStats, GatewayError> {
        let open_orders = gateway.list_open_orders(&self.instrument).await?;
        let open_positions = gateway.list_open_positions(&self.instrument).await?;

        let mut stats = CycleStats::default();
        self.retarget(targets);
        self.observe(&open_orders, &open_positions, &mut stats);
        let actions = self.plan_actions(allow_placement, halted, &mut stats);
        self.execute(gateway, actions, halted, &mut stats).await;
        Ok(stats)
    }

    /// Bind the freshly computed ladder to slots by index, queuing cancels
    /// for pendings whose target price moved and dropping duplicate rounded
    /// prices (spacing below the quote tick is a configuration error worth
    /// surfacing, not silently merging).
    fn retarget(&mut self, targets: &[GridLevel]) {
        while self.slots.len() < targets.len() {
            let index = self.slots.len();
            self.slots.push(GridSlot::new(targets[index]));
        }
        self.targeted = vec![false; self.slots.len()];

        let mut last_price: Option<f64> = None;
        for level in targets {
            if last_price == Some(level.price) {
                warn!(
                    slot = level.index,
                    price = level.price,
                    "duplicate rounded grid price, dropping higher-index slot"
                );
                continue;
            }
            last_price = Some(level.price);
            self.targeted[level.index] = true;

            let slot = &mut self.slots[level.index];
            match slot.state {
                // Empty slots adopt the new level wholesale.
                SlotState::Empty => slot.level = *level,
                // A pending order whose target price moved is treated as
                // untargeted: the diff cancels it, and the freed slot adopts
                // the new level on the next cycle.
                SlotState::PendingOrder if slot.level.price != level.price => {
                    self.targeted[level.index] = false;
                }
                SlotState::PendingOrder | SlotState::Filled | SlotState::Cooldown => {}
            }
        }
    }

    /// Sync slot state with broker-reported reality.
    ///
    /// A pending order that left the book filled only if the broker also
    /// reports open position units; otherwise something cancelled it behind
    /// our back and the slot goes back to Empty.
    fn observe(
        &mut self,
        open_orders: &[OpenOrder],
        open_positions: &[OpenPosition],
        stats: &mut CycleStats,
    ) {
        let position_units: i64 = open_positions.iter().map(|p| p.units.abs()).sum();

        for slot in &mut self.slots {
            if slot.state != SlotState::PendingOrder {
                continue;
            }
            let order_id = match &slot.order_id {
                Some(id) => id.clone(),
                None => continue,
            };

            let resting = open_orders
                .iter()
                .find(|o| o.order_id == order_id)
                .map(|o| o.state);

            match resting {
                Some(OrderState::Pending) => {}
                Some(OrderState::Cancelled) => {
                    warn!(
                        slot = slot.level.index,
                        price = slot.level.price,
                        order_id = %order_id,
                        "order cancelled externally, slot back to empty"
                    );
                    slot.state = SlotState::Empty;
                    slot.order_id = None;
                }
                Some(OrderState::Filled) => {
                    Self::mark_filled(slot, stats);
                }
                None => {
                    if position_units != 0 {
                        Self::mark_filled(slot, stats);
                    } else {
                        warn!(
                            slot = slot.level.index,
                            price = slot.level.price,
                            order_id = %order_id,
                            "order left the book with no position, treating as external cancel"
                        );
                        slot.state = SlotState::Empty;
                        slot.order_id = None;
                    }
                }
            }
        }
    }

    fn mark_filled(slot: &mut GridSlot, stats: &mut CycleStats) {
        info!(
            slot = slot.level.index,
            price = slot.level.price,
            side = %slot.level.side,
            "entry order filled"
        );
        slot.state = SlotState::Filled;
        slot.filled_at = Some(Utc::now());
        stats.filled += 1;
    }

    /// Diff target ladder against slot states and emit the worklist.
    fn plan_actions(
        &mut self,
        allow_placement: bool,
        halted: bool,
        stats: &mut CycleStats,
    ) -> Vec<SlotAction> {
        if halted {
            return self.plan_halted(stats);
        }

        let mut actions = Vec::new();
        let mut claimed = vec![false; self.slots.len()];

        // Opposing legs first: every filled slot needs its profit-taking
        // counterpart one spacing away before anything else happens to it.
        for i in 0..self.slots.len() {
            if self.slots[i].state != SlotState::Filled {
                continue;
            }
            let fill_side = self.slots[i].level.side;
            let opposing = match fill_side {
                Side::Buy => i.checked_add(1).filter(|j| *j < self.slots.len()),
                Side::Sell => i.checked_sub(1),
            };

            match opposing {
                None => {
                    warn!(
                        slot = i,
                        price = self.slots[i].level.price,
                        "fill at ladder edge has no opposing level, parking slot"
                    );
                    self.slots[i].state = SlotState::Cooldown;
                    stats.parked += 1;
                }
                Some(j) => match self.slots[j].state {
                    SlotState::PendingOrder | SlotState::Filled => {
                        // Opposing leg confirmed on the book: free the slot.
                        info!(
                            slot = i,
                            price = self.slots[i].level.price,
                            opposing = j,
                            "opposing order confirmed, slot freed"
                        );
                        self.slots[i].state = SlotState::Empty;
                        self.slots[i].order_id = None;
                        self.slots[i].filled_at = None;
                        stats.freed += 1;
                    }
                    SlotState::Empty if allow_placement => {
                        let request = OrderRequest::limit(
                            self.instrument.clone(),
                            fill_side.opposite(),
                            self.slots[j].level.price,
                            self.units,
                        );
                        claimed[j] = true;
                        actions.push(SlotAction::Place {
                            slot_index: j,
                            request,
                        });
                    }
                    SlotState::Empty | SlotState::Cooldown => {}
                },
            }
        }

        // Cancel pendings whose level fell out of the target ladder or whose
        // target price moved under them.
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.state != SlotState::PendingOrder {
                continue;
            }
            let stale = !self.targeted[i];
            if stale {
                if let Some(order_id) = &slot.order_id {
                    debug!(slot = i, price = slot.level.price, "pending order no longer targeted");
                    actions.push(SlotAction::Cancel {
                        slot_index: i,
                        order_id: order_id.clone(),
                    });
                }
            }
        }

        // Entry orders for every targeted empty slot.
        if allow_placement {
            for (i, slot) in self.slots.iter().enumerate() {
                if slot.state == SlotState::Empty && self.targeted[i] && !claimed[i] {
                    actions.push(SlotAction::Place {
                        slot_index: i,
                        request: OrderRequest::limit(
                            self.instrument.clone(),
                            slot.level.side,
                            slot.level.price,
                            self.units,
                        ),
                    });
                }
            }
        }

        actions
    }

    /// Halted cycles cancel every resting order and park every slot.
    fn plan_halted(&mut self, stats: &mut CycleStats) -> Vec<SlotAction> {
        let mut actions = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot.state {
                SlotState::PendingOrder => {
                    if let Some(order_id) = &slot.order_id {
                        actions.push(SlotAction::Cancel {
                            slot_index: i,
                            order_id: order_id.clone(),
                        });
                    }
                }
                SlotState::Empty | SlotState::Filled => {
                    info!(slot = i, price = slot.level.price, from = %slot.state, "halt: parking slot");
                    slot.state = SlotState::Cooldown;
                    stats.parked += 1;
                }
                SlotState::Cooldown => {}
            }
        }
        actions
    }

    /// Run the worklist through the gateway one action at a time.
    ///
    /// Slot state mutates only on a confirmed response; an error leaves the
    /// slot untouched for the next cycle to retry.
    async fn execute<G: OrderGateway + ?Sized>(
        &mut self,
        gateway: &G,
        actions: Vec<SlotAction>,
        halted: bool,
        stats: &mut CycleStats,
    ) {
        for action in actions {
            match action {
                SlotAction::Place { slot_index, request } => {
                    match gateway.place_order(&request).await {
                        Ok(order_id) => {
                            let slot = &mut self.slots[slot_index];
                            info!(
                                slot = slot_index,
                                price = request.price,
                                side = %request.side,
                                order_id = %order_id,
                                "order resting"
                            );
                            slot.state = SlotState::PendingOrder;
                            slot.order_id = Some(order_id);
                            slot.opened_at = Some(Utc::now());
                            stats.placed += 1;
                        }
                        Err(err) => {
                            warn!(
                                slot = slot_index,
                                price = request.price,
                                "place failed, will retry next cycle: {err}"
                            );
                            stats.failures += 1;
                        }
                    }
                }
                SlotAction::Cancel { slot_index, order_id } => {
                    match gateway.cancel_order(&order_id).await {
                        Ok(()) => {
                            let slot = &mut self.slots[slot_index];
                            info!(
                                slot = slot_index,
                                price = slot.level.price,
                                order_id = %order_id,
                                "order cancelled"
                            );
                            slot.state = if halted {
                                stats.parked += 1;
                                SlotState::Cooldown
                            } else {
                                SlotState::Empty
                            };
                            slot.order_id = None;
                            stats.cancelled += 1;
                        }
                        Err(err) => {
                            warn!(
                                slot = slot_index,
                                order_id = %order_id,
                                "cancel failed, will retry next cycle: {err}"
                            );
                            stats.failures += 1;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::compute_levels;

    fn ladder() -> Vec<GridLevel> {
        compute_levels(1.0700, 1.0900, 20, 1.0800).unwrap()
    }

    fn ledger_with_targets(targets: &[GridLevel]) -> GridLedger {
        let mut ledger = GridLedger::new("EUR_USD", 1000);
        ledger.retarget(targets);
        ledger
    }

    #[test]
    fn test_retarget_creates_one_slot_per_level() {
        let targets = ladder();
        let ledger = ledger_with_targets(&targets);
        assert_eq!(ledger.slots().len(), 20);
        assert!(ledger.slots().iter().all(|s| s.state == SlotState::Empty));
    }

    #[test]
    fn test_first_cycle_places_entry_at_every_level() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();
        let actions = ledger.plan_actions(true, false, &mut stats);
        assert_eq!(actions.len(), 20);
        assert!(actions
            .iter()
            .all(|a| matches!(a, SlotAction::Place { .. })));
    }

    #[test]
    fn test_duplicate_rounded_price_drops_higher_index() {
        // Spacing far below one tick collapses neighboring levels.
        let targets = compute_levels(1.07000, 1.07001, 5, 1.070005).unwrap();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();
        let actions = ledger.plan_actions(true, false, &mut stats);
        // Only the unique rounded prices get entry orders.
        let mut prices: Vec<f64> = actions
            .iter()
            .map(|a| match a {
                SlotAction::Place { request, .. } => request.price,
                SlotAction::Cancel { .. } => unreachable!(),
            })
            .collect();
        prices.dedup();
        assert!(prices.len() < 5);
        assert_eq!(
            prices.len(),
            actions.len(),
            "no two entries share a price"
        );
    }

    #[test]
    fn test_fill_requests_opposing_at_adjacent_level() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        // Slot 5 holds a filled buy.
        ledger.slots[5].state = SlotState::Filled;

        let actions = ledger.plan_actions(true, false, &mut stats);
        let opposing: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                SlotAction::Place { slot_index: 6, request } => Some(request.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(opposing.len(), 1);
        assert_eq!(opposing[0].side, Side::Sell);
        assert_eq!(opposing[0].price, targets[6].price);
        assert_eq!(opposing[0].units, 1000);
    }

    #[test]
    fn test_sell_fill_opposing_is_below() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        ledger.slots[12].state = SlotState::Filled;
        // Occupy every other slot so only the opposing leg is planned.
        for (i, slot) in ledger.slots.iter_mut().enumerate() {
            if i != 12 && i != 11 {
                slot.state = SlotState::PendingOrder;
                slot.order_id = Some(format!("o-{i}"));
            }
        }

        let actions = ledger.plan_actions(true, false, &mut stats);
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            SlotAction::Place { slot_index, request } => {
                assert_eq!(*slot_index, 11);
                assert_eq!(request.side, Side::Buy);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_filled_slot_freed_once_opposing_rests() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        ledger.slots[5].state = SlotState::Filled;
        ledger.slots[6].state = SlotState::PendingOrder;
        ledger.slots[6].order_id = Some("opp-1".to_string());

        ledger.plan_actions(false, false, &mut stats);
        assert_eq!(ledger.slots[5].state, SlotState::Empty);
        assert_eq!(stats.freed, 1);
    }

    #[test]
    fn test_edge_fill_parks_in_cooldown() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        // A sell fill at the bottom of the ladder has no level below it.
        ledger.slots[0].level.side = Side::Sell;
        ledger.slots[0].state = SlotState::Filled;

        ledger.plan_actions(true, false, &mut stats);
        assert_eq!(ledger.slots[0].state, SlotState::Cooldown);
        assert_eq!(stats.parked, 1);
    }

    #[test]
    fn test_spread_suppression_plans_no_placements() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();
        ledger.slots[3].state = SlotState::Filled;

        let actions = ledger.plan_actions(false, false, &mut stats);
        assert!(actions.is_empty());
        // The filled slot is untouched, not parked.
        assert_eq!(ledger.slots[3].state, SlotState::Filled);
    }

    #[test]
    fn test_halted_cycle_cancels_and_parks() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        ledger.slots[2].state = SlotState::PendingOrder;
        ledger.slots[2].order_id = Some("o-2".to_string());
        ledger.slots[7].state = SlotState::Filled;

        let actions = ledger.plan_actions(true, true, &mut stats);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], SlotAction::Cancel { slot_index: 2, .. }));
        assert_eq!(ledger.slots[7].state, SlotState::Cooldown);
        assert!(ledger
            .slots
            .iter()
            .enumerate()
            .all(|(i, s)| i == 2 || s.state == SlotState::Cooldown));
    }

    #[test]
    fn test_observe_fill_requires_position_units() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        ledger.slots[5].state = SlotState::PendingOrder;
        ledger.slots[5].order_id = Some("gone".to_string());

        // Order left the book but the broker reports no position: external
        // cancel, not a fill.
        ledger.observe(&[], &[], &mut stats);
        assert_eq!(ledger.slots[5].state, SlotState::Empty);
        assert_eq!(stats.filled, 0);

        // Same disappearance with position units present: a fill.
        ledger.slots[5].state = SlotState::PendingOrder;
        ledger.slots[5].order_id = Some("gone".to_string());
        let position = OpenPosition {
            position_id: "p-1".to_string(),
            instrument: "EUR_USD".to_string(),
            side: Side::Buy,
            units: 1000,
            unrealized_pnl: -0.4,
        };
        ledger.observe(&[], &[position], &mut stats);
        assert_eq!(ledger.slots[5].state, SlotState::Filled);
        assert_eq!(stats.filled, 1);
    }

    #[test]
    fn test_observe_keeps_resting_orders_pending() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        ledger.slots[4].state = SlotState::PendingOrder;
        ledger.slots[4].order_id = Some("o-4".to_string());
        let open = OpenOrder {
            order_id: "o-4".to_string(),
            instrument: "EUR_USD".to_string(),
            side: Side::Buy,
            price: targets[4].price,
            units: 1000,
            state: OrderState::Pending,
        };
        ledger.observe(&[open], &[], &mut stats);
        assert_eq!(ledger.slots[4].state, SlotState::PendingOrder);
    }

    #[test]
    fn test_retarget_cancels_pending_at_moved_price() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        let mut stats = CycleStats::default();

        ledger.slots[5].state = SlotState::PendingOrder;
        ledger.slots[5].order_id = Some("o-5".to_string());

        // The ladder shifts up by 10 pips; slot 5's resting order now sits
        // at a price the planner no longer targets.
        let shifted = compute_levels(1.0710, 1.0910, 20, 1.0800).unwrap();
        ledger.retarget(&shifted);
        let actions = ledger.plan_actions(false, false, &mut stats);
        assert!(actions
            .iter()
            .any(|a| matches!(a, SlotAction::Cancel { slot_index: 5, .. })));
        // Until the cancel lands the slot is untouched.
        assert_eq!(ledger.slots[5].state, SlotState::PendingOrder);
    }

    #[test]
    fn test_clear_cooldowns() {
        let targets = ladder();
        let mut ledger = ledger_with_targets(&targets);
        ledger.slots[1].state = SlotState::Cooldown;
        ledger.slots[9].state = SlotState::Cooldown;
        assert_eq!(ledger.clear_cooldowns(), 2);
        assert_eq!(ledger.slots[1].state, SlotState::Empty);
        assert_eq!(ledger.slots[9].state, SlotState::Empty);
    }
}
