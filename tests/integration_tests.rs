//! Integration tests for the grid engine
//!
//! Drives the scheduler against an in-memory mock broker and checks that
//! reconciliation, fill handling, and risk halting behave end to end.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use forex_gridbot::config::{
    AccountConfig, Config, Environment, MonitoringConfig, RiskConfig, TradingConfig,
};
use forex_gridbot::gateway::{FeedUnavailable, GatewayError, OrderGateway, PriceFeed};
use forex_gridbot::scheduler::{BotPhase, Scheduler, SchedulerError};
use forex_gridbot::types::{
    AccountSnapshot, OpenOrder, OpenPosition, OrderRequest, OrderState, PriceTick, Side, SlotState,
};

// =============================================================================
// Test Utilities
// =============================================================================

/// In-memory broker: orders rest on a book, fills are scripted by tests.
struct MockBroker {
    book: Mutex<Vec<OpenOrder>>,
    positions: Mutex<Vec<OpenPosition>>,
    snapshot: Mutex<AccountSnapshot>,
    quote: Mutex<(f64, f64)>,
    snapshot_error: Mutex<Option<u16>>,
    next_order_id: AtomicUsize,
    place_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    fail_places: AtomicBool,
    fail_price: AtomicBool,
}

impl MockBroker {
    fn new() -> Self {
        Self {
            book: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            snapshot: Mutex::new(AccountSnapshot {
                balance: 1000.0,
                equity: 1000.0,
                unrealized_pnl: 0.0,
                margin_used: 50.0,
                open_position_count: 0,
            }),
            // 1 pip spread around 1.0800.
            quote: Mutex::new((1.07995, 1.08005)),
            snapshot_error: Mutex::new(None),
            next_order_id: AtomicUsize::new(0),
            place_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            fail_places: AtomicBool::new(false),
            fail_price: AtomicBool::new(false),
        }
    }

    fn set_unrealized_pnl(&self, pnl: f64) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.unrealized_pnl = pnl;
        snapshot.equity = snapshot.balance + pnl;
    }

    fn set_quote(&self, bid: f64, ask: f64) {
        *self.quote.lock().unwrap() = (bid, ask);
    }

    fn set_snapshot_error(&self, code: Option<u16>) {
        *self.snapshot_error.lock().unwrap() = code;
    }

    fn places(&self) -> usize {
        self.place_calls.load(Ordering::SeqCst)
    }

    fn cancels(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    fn resting_orders(&self) -> usize {
        self.book.lock().unwrap().len()
    }

    /// Script a fill: the order leaves the book and a position appears.
    fn fill_order_at(&self, price: f64) {
        let mut book = self.book.lock().unwrap();
        let index = book
            .iter()
            .position(|o| (o.price - price).abs() < 1e-9)
            .expect("no resting order at that price");
        let order = book.remove(index);
        drop(book);

        self.positions.lock().unwrap().push(OpenPosition {
            position_id: format!("pos-{}", order.order_id),
            instrument: order.instrument,
            side: order.side,
            units: match order.side {
                Side::Buy => order.units as i64,
                Side::Sell => -(order.units as i64),
            },
            unrealized_pnl: -0.5,
        });
    }
}

#[async_trait]
impl PriceFeed for MockBroker {
    async fn get_price(&self, _instrument: &str) -> Result<PriceTick, FeedUnavailable> {
        if self.fail_price.load(Ordering::SeqCst) {
            return Err(FeedUnavailable::new("feed offline"));
        }
        let (bid, ask) = *self.quote.lock().unwrap();
        Ok(PriceTick::from_quotes(bid, ask, Utc::now()))
    }
}

#[async_trait]
impl OrderGateway for MockBroker {
    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_places.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection reset".to_string()));
        }
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let order_id = format!("order-{id}");
        self.book.lock().unwrap().push(OpenOrder {
            order_id: order_id.clone(),
            instrument: request.instrument.clone(),
            side: request.side,
            price: request.price,
            units: request.units,
            state: OrderState::Pending,
        });
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.book.lock().unwrap().retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn list_open_orders(&self, _instrument: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        Ok(self.book.lock().unwrap().clone())
    }

    async fn list_open_positions(
        &self,
        _instrument: &str,
    ) -> Result<Vec<OpenPosition>, GatewayError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, GatewayError> {
        if let Some(code) = *self.snapshot_error.lock().unwrap() {
            return Err(GatewayError::Api {
                code,
                message: "scripted failure".to_string(),
            });
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

fn test_config() -> Config {
    Config {
        account: AccountConfig {
            account_id: Some("101-004-1234567-001".to_string()),
            access_token: Some("test-token".to_string()),
            environment: Environment::Practice,
        },
        trading: TradingConfig {
            instrument: "EUR_USD".to_string(),
            lower_level: 1.0700,
            upper_level: 1.0900,
            number_of_grids: 20,
            units_per_trade: 1000,
        },
        risk: RiskConfig::default(),
        monitoring: MonitoringConfig {
            check_interval_seconds: 1,
            request_timeout_seconds: 1,
        },
    }
}

async fn started_scheduler(broker: std::sync::Arc<MockBroker>) -> Scheduler<MockBroker> {
    let mut scheduler = Scheduler::new(test_config(), broker);
    scheduler.preflight().await.expect("preflight should pass");
    scheduler
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_first_cycle_places_the_full_ladder() {
    let broker = std::sync::Arc::new(MockBroker::new());
    let mut scheduler = started_scheduler(broker.clone()).await;

    scheduler.run_once().await.unwrap();

    assert_eq!(broker.places(), 20);
    assert_eq!(broker.cancels(), 0);
    assert_eq!(broker.resting_orders(), 20);
    assert_eq!(scheduler.slots().len(), 20);
    assert!(scheduler
        .slots()
        .iter()
        .all(|s| s.state == SlotState::PendingOrder && s.order_id.is_some()));
}

#[tokio::test]
async fn test_second_cycle_is_a_no_op_when_nothing_changed() {
    let broker = std::sync::Arc::new(MockBroker::new());
    let mut scheduler = started_scheduler(broker.clone()).await;

    scheduler.run_once().await.unwrap();
    scheduler.run_once().await.unwrap();

    // Ladder already matches the book: no further orders.
    assert_eq!(broker.places(), 20);
    assert_eq!(broker.cancels(), 0);
}

#[tokio::test]
async fn test_fill_frees_the_slot_and_rearms_the_entry() {
    let broker = std::sync::Arc::new(MockBroker::new());
    let mut scheduler = started_scheduler(broker.clone()).await;
    scheduler.run_once().await.unwrap();

    // A buy entry fills; its neighbor above already rests as the profit leg.
    let fill_price = scheduler.slots()[5].level.price;
    assert_eq!(scheduler.slots()[5].level.side, Side::Buy);
    broker.fill_order_at(fill_price);

    scheduler.run_once().await.unwrap();

    // The opposing leg at slot 6 was already confirmed, so the slot is freed
    // and re-armed with a fresh entry order in the same cycle.
    assert_eq!(broker.places(), 21);
    assert_eq!(scheduler.slots()[5].state, SlotState::PendingOrder);
    assert_eq!(scheduler.slots()[6].state, SlotState::PendingOrder);
}

#[tokio::test]
async fn test_failed_placement_leaves_slots_empty_and_retries() {
    let broker = std::sync::Arc::new(MockBroker::new());
    broker.fail_places.store(true, Ordering::SeqCst);
    let mut scheduler = started_scheduler(broker.clone()).await;

    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 20);
    assert!(scheduler.slots().iter().all(|s| s.state == SlotState::Empty));
    assert_eq!(broker.resting_orders(), 0);

    // Broker recovers: the next cycle's diff retries every placement.
    broker.fail_places.store(false, Ordering::SeqCst);
    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 40);
    assert!(scheduler
        .slots()
        .iter()
        .all(|s| s.state == SlotState::PendingOrder));
}

// =============================================================================
// Risk halting
// =============================================================================

#[tokio::test]
async fn test_max_loss_breach_halts_and_goes_cancel_only() {
    let broker = std::sync::Arc::new(MockBroker::new());
    let mut scheduler = started_scheduler(broker.clone()).await;
    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 20);

    // Unrealized loss crosses the 50 limit.
    broker.set_unrealized_pnl(-51.0);
    scheduler.run_once().await.unwrap();
    assert!(scheduler.risk_state().halted);
    assert_eq!(scheduler.phase(), BotPhase::Halted);

    // Halted cycles cancel the book and never place again.
    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 20);
    assert_eq!(broker.cancels(), 20);
    assert_eq!(broker.resting_orders(), 0);

    // A healthy snapshot later does not clear the halt.
    broker.set_unrealized_pnl(0.0);
    scheduler.run_once().await.unwrap();
    assert!(scheduler.risk_state().halted);
    assert_eq!(broker.places(), 20);
}

#[tokio::test]
async fn test_wide_spread_suppresses_placement_without_halting() {
    let broker = std::sync::Arc::new(MockBroker::new());
    let mut scheduler = started_scheduler(broker.clone()).await;
    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 20);

    // 3.5 pips against a 2.0 pip limit.
    broker.set_quote(1.07982, 1.08017);
    scheduler.run_once().await.unwrap();

    assert_eq!(broker.places(), 20);
    assert!(!scheduler.risk_state().halted);
    assert_eq!(scheduler.phase(), BotPhase::Running);
    // Existing slots are untouched, not cancelled or parked.
    assert!(scheduler
        .slots()
        .iter()
        .all(|s| s.state == SlotState::PendingOrder));
}

// =============================================================================
// Failure classification
// =============================================================================

#[tokio::test]
async fn test_transient_failures_skip_the_cycle() {
    let broker = std::sync::Arc::new(MockBroker::new());
    let mut scheduler = started_scheduler(broker.clone()).await;

    broker.fail_price.store(true, Ordering::SeqCst);
    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 0);

    broker.fail_price.store(false, Ordering::SeqCst);
    broker.set_snapshot_error(Some(500));
    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 0);

    // Both failures were cycle-local; trading resumes untouched.
    broker.set_snapshot_error(None);
    scheduler.run_once().await.unwrap();
    assert_eq!(broker.places(), 20);
    assert_eq!(scheduler.phase(), BotPhase::Running);
}

#[tokio::test]
async fn test_auth_failure_is_fatal() {
    let broker = std::sync::Arc::new(MockBroker::new());
    let mut scheduler = started_scheduler(broker.clone()).await;

    broker.set_snapshot_error(Some(401));
    let err = scheduler.run_once().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Fatal(_)));
}

#[tokio::test]
async fn test_preflight_fails_on_unreachable_account() {
    let broker = std::sync::Arc::new(MockBroker::new());
    broker.set_snapshot_error(Some(401));

    let mut scheduler = Scheduler::new(test_config(), broker);
    assert!(scheduler.preflight().await.is_err());
    assert_eq!(scheduler.phase(), BotPhase::Starting);
}
