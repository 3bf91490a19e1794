//! Integration Tests - End-to-end Engine Flows
//!
//! Drives placement, cancellation and settlement through the public
//! use cases over the in-memory and file ledgers, and uses mockall
//! mocks of the ports to inject failures.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mockall::mock;
use mockall::predicate::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use timed_position_engine::adapters::feeds::PriceCache;
use timed_position_engine::adapters::metrics::EngineMetrics;
use timed_position_engine::adapters::persistence::{FileLedger, MemoryLedger};
use timed_position_engine::config::{PositionsConfig, SettlementConfig};
use timed_position_engine::domain::pricing::placement_terms;
use timed_position_engine::domain::{
    Account, Direction, EntryKind, LedgerEntry, Position, PositionId, PositionStatus, Quote,
    TickerUpdate, TradeResult,
};
use timed_position_engine::ports::ledger::{
    CloseOutcome, LedgerError, PositionClose, PositionLedger,
};
use timed_position_engine::ports::price_source::PriceSource;
use timed_position_engine::usecases::{
    AccountService, PlaceRequest, PositionLifecycle, SettlementProcessor, SettlementStatus,
    SweepOutcome, SweepReport,
};

// ---- Mock Definitions ----

mock! {
    pub Ledger {}

    #[async_trait::async_trait]
    impl PositionLedger for Ledger {
        async fn account(&self, id: &str) -> anyhow::Result<Option<Account>>;
        async fn ensure_account(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<Account>;
        async fn deposit(
            &self,
            account_id: &str,
            asset: &str,
            amount: Decimal,
            at: DateTime<Utc>,
        ) -> Result<LedgerEntry, LedgerError>;
        async fn set_blocked(&self, account_id: &str, blocked: bool) -> Result<Account, LedgerError>;
        async fn open_position(&self, position: &Position, asset: &str) -> Result<LedgerEntry, LedgerError>;
        async fn close_position(
            &self,
            id: PositionId,
            close: PositionClose,
        ) -> Result<CloseOutcome, LedgerError>;
        async fn position(&self, id: PositionId) -> anyhow::Result<Option<Position>>;
        async fn positions_for(&self, owner: &str) -> anyhow::Result<Vec<Position>>;
        async fn due_positions(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Position>>;
        async fn entries_for(&self, position_id: PositionId) -> anyhow::Result<Vec<LedgerEntry>>;
        async fn is_healthy(&self) -> bool;
    }
}

mock! {
    pub Prices {}

    impl PriceSource for Prices {
        fn get_price(&self, instrument: &str) -> Option<Quote>;
        fn instruments(&self) -> Vec<String>;
    }
}

// ---- Helpers ----

struct Engine {
    ledger: Arc<MemoryLedger>,
    cache: Arc<PriceCache>,
    accounts: AccountService<MemoryLedger>,
    lifecycle: PositionLifecycle<MemoryLedger, PriceCache>,
    processor: SettlementProcessor<MemoryLedger, PriceCache>,
}

fn engine() -> Engine {
    let ledger = Arc::new(MemoryLedger::new());
    let cache = Arc::new(PriceCache::new(vec!["BTC".to_string(), "ETH".to_string()]));
    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let positions = PositionsConfig::default();
    let settlement = SettlementConfig::default();

    Engine {
        accounts: AccountService::new(Arc::clone(&ledger), "USDT"),
        lifecycle: PositionLifecycle::new(
            Arc::clone(&ledger),
            Arc::clone(&cache),
            Arc::clone(&metrics),
            positions.clone(),
            &settlement,
        ),
        processor: SettlementProcessor::new(
            Arc::clone(&ledger),
            Arc::clone(&cache),
            metrics,
            &positions,
            &settlement,
        ),
        ledger,
        cache,
    }
}

fn tick(cache: &PriceCache, instrument: &str, price: Decimal, at: DateTime<Utc>) {
    cache.apply_tick(TickerUpdate {
        instrument: instrument.to_string(),
        last_price: price,
        open_24h: price,
        high_24h: price,
        low_24h: price,
        volume_24h: dec!(10),
        timestamp: at,
    });
}

fn buy_btc(stake: Decimal, duration_secs: u32) -> PlaceRequest {
    PlaceRequest {
        account_id: "alice".to_string(),
        instrument: Some("BTC".to_string()),
        direction: Some("buy".to_string()),
        stake: Some(stake),
        duration_secs: Some(duration_secs),
        leverage: Some(1),
        entry_price: None,
    }
}

fn completed(outcome: SweepOutcome) -> SweepReport {
    match outcome {
        SweepOutcome::Completed(report) => report,
        other => panic!("unexpected sweep outcome: {other:?}"),
    }
}

fn quote(price: Decimal, at: DateTime<Utc>) -> Quote {
    Quote {
        instrument: "BTC".to_string(),
        price,
        open_24h: price,
        high_24h: price,
        low_24h: price,
        volume_24h: dec!(1),
        change_24h_pct: Decimal::ZERO,
        timestamp: at,
    }
}

fn active_position(stake: Decimal, entry: Decimal, start: DateTime<Utc>) -> Position {
    let terms = placement_terms(stake, 30).unwrap();
    Position::open(
        "alice".to_string(),
        "BTC".to_string(),
        Direction::Long,
        stake,
        1,
        entry,
        &terms,
        start,
    )
}

// ---- End-to-end Tests ----

#[tokio::test]
async fn test_end_to_end_losing_long() {
    let start = Utc::now();
    let e = engine();
    e.accounts.open_account("alice").await.unwrap();
    e.accounts.deposit("alice", dec!(1000)).await.unwrap();
    tick(&e.cache, "BTC", dec!(50000), start);

    let position = e.lifecycle.place_at(buy_btc(dec!(100), 30), start).await.unwrap();
    assert_eq!(position.fee, dec!(2.0));
    assert_eq!(position.expected_return, dec!(12.0));
    assert_eq!(position.total_payout, dec!(110.0));
    assert_eq!(position.status, PositionStatus::Active);
    assert_eq!(position.end_time, start + Duration::seconds(30));
    assert_eq!(e.accounts.balance("alice").await.unwrap(), dec!(898));

    let expiry = start + Duration::seconds(30);
    tick(&e.cache, "BTC", dec!(45000), expiry);
    let report = completed(e.processor.sweep_at(expiry).await);
    assert_eq!(report.settled, 1);
    assert_eq!(report.total_paid_out, dec!(90.0));

    let settled = e.lifecycle.position("alice", position.id).await.unwrap();
    assert_eq!(settled.status, PositionStatus::Completed);
    assert_eq!(settled.profit, Some(dec!(-10.0)));
    assert_eq!(settled.profit_percent, Some(dec!(-10)));
    assert_eq!(settled.result, Some(TradeResult::Loss));
    assert_eq!(settled.exit_price, Some(dec!(45000)));

    // 898 + 90
    assert_eq!(e.accounts.balance("alice").await.unwrap(), dec!(988));
    let stats = e.accounts.account("alice").await.unwrap().stats;
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.losses, 1);
}

#[tokio::test]
async fn test_double_settlement_credits_once() {
    let start = Utc::now();
    let e = engine();
    e.accounts.open_account("alice").await.unwrap();
    e.accounts.deposit("alice", dec!(1000)).await.unwrap();
    tick(&e.cache, "BTC", dec!(50000), start);
    let position = e.lifecycle.place_at(buy_btc(dec!(100), 30), start).await.unwrap();

    let expiry = start + Duration::seconds(30);
    tick(&e.cache, "BTC", dec!(51000), expiry);

    // Simulate a racing second settlement of the same position
    let close = PositionClose::Settle {
        exit_price: dec!(51000),
        amounts: timed_position_engine::domain::pricing::settle_at(&position, dec!(51000)).unwrap(),
        status: PositionStatus::Completed,
        asset: "USDT".to_string(),
        at: expiry,
    };
    let (a, b) = tokio::join!(
        e.ledger.close_position(position.id, close.clone()),
        e.ledger.close_position(position.id, close),
    );
    let applied = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(|o| matches!(o, CloseOutcome::Applied { .. }))
        .count();
    assert_eq!(applied, 1);

    // A later sweep sees nothing due
    let report = completed(e.processor.sweep_at(expiry).await);
    assert!(report.results.is_empty());

    let credits: Vec<_> = e
        .ledger
        .entries_for(position.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::Credit)
        .collect();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount, dec!(102));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_racing_sweep_applies_exactly_once() {
    let start = Utc::now();
    let e = Arc::new(engine());
    e.accounts.open_account("alice").await.unwrap();
    e.accounts.deposit("alice", dec!(10000)).await.unwrap();
    tick(&e.cache, "BTC", dec!(50000), start);

    let mut ids = Vec::new();
    for _ in 0..20 {
        let p = e.lifecycle.place_at(buy_btc(dec!(100), 30), start).await.unwrap();
        ids.push(p.id);
    }

    let expiry = start + Duration::seconds(30);
    tick(&e.cache, "BTC", dec!(50500), expiry);

    let sweeper = {
        let e = Arc::clone(&e);
        tokio::spawn(async move { e.processor.sweep_at(expiry).await })
    };
    let cancels: Vec<_> = ids
        .iter()
        .map(|id| {
            let e = Arc::clone(&e);
            let id = *id;
            // Cancel is judged at a time when 20s remain
            tokio::spawn(async move {
                e.lifecycle
                    .cancel_at(id, "alice", None, start + Duration::seconds(10))
                    .await
            })
        })
        .collect();

    sweeper.await.unwrap();
    for handle in cancels {
        if let Err(err) = handle.await.unwrap() {
            assert_eq!(err.code(), "position_not_active");
        }
    }

    for id in ids {
        let entries = e.ledger.entries_for(id).await.unwrap();
        let closes = entries
            .iter()
            .filter(|entry| matches!(entry.kind, EntryKind::Credit | EntryKind::Refund))
            .count();
        assert_eq!(closes, 1, "position {id} closed {closes} times");

        let stored = e.lifecycle.position("alice", id).await.unwrap();
        assert!(matches!(
            stored.status,
            PositionStatus::Completed | PositionStatus::Cancelled
        ));
    }
}

#[tokio::test]
async fn test_cancelled_position_never_settles() {
    let start = Utc::now();
    let e = engine();
    e.accounts.open_account("alice").await.unwrap();
    e.accounts.deposit("alice", dec!(500)).await.unwrap();
    tick(&e.cache, "BTC", dec!(50000), start);
    let position = e.lifecycle.place_at(buy_btc(dec!(100), 30), start).await.unwrap();

    let too_late = e
        .lifecycle
        .cancel_at(position.id, "alice", None, start + Duration::seconds(27))
        .await
        .unwrap_err();
    assert_eq!(too_late.code(), "cancel_window_closed");

    let receipt = e
        .lifecycle
        .cancel_at(position.id, "alice", None, start + Duration::seconds(20))
        .await
        .unwrap();
    assert_eq!(receipt.refunded, dec!(102));
    assert_eq!(e.accounts.balance("alice").await.unwrap(), dec!(500));

    let expiry = start + Duration::seconds(30);
    tick(&e.cache, "BTC", dec!(60000), expiry);
    let report = completed(e.processor.sweep_at(expiry).await);
    assert!(report.results.is_empty());
    assert_eq!(e.accounts.balance("alice").await.unwrap(), dec!(500));
}

#[tokio::test]
async fn test_price_outage_defers_then_expires() {
    let start = Utc::now();
    let e = engine();
    e.accounts.open_account("alice").await.unwrap();
    e.accounts.deposit("alice", dec!(500)).await.unwrap();
    tick(&e.cache, "BTC", dec!(50000), start);
    let position = e.lifecycle.place_at(buy_btc(dec!(100), 30), start).await.unwrap();

    // The last quote is 35s old at the first sweep
    let first = completed(e.processor.sweep_at(start + Duration::seconds(35)).await);
    assert_eq!(first.deferred, 1);
    assert!(matches!(
        first.results[0].status,
        SettlementStatus::Deferred
    ));

    let second = completed(e.processor.sweep_at(start + Duration::seconds(45)).await);
    assert_eq!(second.settled, 1);

    let stored = e.lifecycle.position("alice", position.id).await.unwrap();
    assert_eq!(stored.status, PositionStatus::Expired);
    assert_eq!(stored.exit_price, Some(dec!(50000)));
    assert_eq!(stored.result, Some(TradeResult::BreakEven));
    assert_eq!(e.accounts.balance("alice").await.unwrap(), dec!(498));
}

#[tokio::test]
async fn test_history_lists_settled_and_cancelled() {
    let start = Utc::now();
    let e = engine();
    e.accounts.open_account("alice").await.unwrap();
    e.accounts.deposit("alice", dec!(1000)).await.unwrap();
    tick(&e.cache, "BTC", dec!(50000), start);

    let kept = e.lifecycle.place_at(buy_btc(dec!(100), 30), start).await.unwrap();
    let dropped = e.lifecycle.place_at(buy_btc(dec!(100), 60), start).await.unwrap();
    e.lifecycle
        .cancel_at(dropped.id, "alice", None, start + Duration::seconds(5))
        .await
        .unwrap();

    let expiry = start + Duration::seconds(30);
    tick(&e.cache, "BTC", dec!(50500), expiry);
    completed(e.processor.sweep_at(expiry).await);

    let history = e
        .lifecycle
        .completed_positions("alice", &Default::default())
        .await
        .unwrap();
    assert_eq!(history.total, 2);
    assert_eq!(history.items[0].id, kept.id);
    assert_eq!(history.items[1].id, dropped.id);
    assert!(e.lifecycle.active_positions("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_ledger_survives_restart() {
    let dir = std::env::temp_dir().join(format!("timed-engine-it-{}", uuid::Uuid::new_v4()));
    let start = Utc::now();
    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let cache = Arc::new(PriceCache::new(vec!["BTC".to_string()]));
    tick(&cache, "BTC", dec!(50000), start);

    let position_id = {
        let ledger = Arc::new(FileLedger::open(&dir).await.unwrap());
        let accounts = AccountService::new(Arc::clone(&ledger), "USDT");
        accounts.open_account("alice").await.unwrap();
        accounts.deposit("alice", dec!(300)).await.unwrap();

        let lifecycle = PositionLifecycle::new(
            ledger,
            Arc::clone(&cache),
            Arc::clone(&metrics),
            PositionsConfig::default(),
            &SettlementConfig::default(),
        );
        lifecycle.place_at(buy_btc(dec!(100), 30), start).await.unwrap().id
    };

    let reopened = Arc::new(FileLedger::open(&dir).await.unwrap());
    let stored = reopened.position(position_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PositionStatus::Active);

    let processor = SettlementProcessor::new(
        Arc::clone(&reopened),
        Arc::clone(&cache),
        metrics,
        &PositionsConfig::default(),
        &SettlementConfig::default(),
    );
    let expiry = start + Duration::seconds(30);
    tick(&cache, "BTC", dec!(55000), expiry);
    let report = completed(processor.sweep_at(expiry).await);
    assert_eq!(report.settled, 1);

    // 300 - 102 + 110
    let account = reopened.account("alice").await.unwrap().unwrap();
    assert_eq!(account.balance("USDT"), dec!(308));

    let kinds: Vec<EntryKind> = reopened
        .entries_for(position_id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.kind)
        .collect();
    assert_eq!(kinds, vec![EntryKind::Debit, EntryKind::Credit]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_extreme_entry_price_does_not_strand_other_positions() {
    let start = Utc::now();
    let e = engine();
    e.accounts.open_account("alice").await.unwrap();
    e.accounts.deposit("alice", dec!(1000)).await.unwrap();
    tick(&e.cache, "BTC", dec!(50000), start);

    // Placement refuses it outright
    let mut request = buy_btc(dec!(100), 30);
    request.entry_price = Some(Decimal::new(1, 28));
    let err = e.lifecycle.place_at(request, start).await.unwrap_err();
    assert_eq!(err.code(), "invalid_price");

    // One already on the books expires first, ahead of a normal position
    let extreme = active_position(dec!(100), Decimal::new(1, 28), start);
    e.ledger.open_position(&extreme, "USDT").await.unwrap();
    let normal = e
        .lifecycle
        .place_at(buy_btc(dec!(100), 50), start)
        .await
        .unwrap();

    let later = start + Duration::seconds(50);
    tick(&e.cache, "BTC", dec!(50000), later);
    let report = completed(e.processor.sweep_at(later).await);
    assert_eq!(report.settled, 2);
    assert_eq!(report.failed, 0);

    let extreme = e.lifecycle.position("alice", extreme.id).await.unwrap();
    assert_eq!(extreme.status, PositionStatus::Expired);
    assert_eq!(extreme.result, Some(TradeResult::BreakEven));
    let normal = e.lifecycle.position("alice", normal.id).await.unwrap();
    assert_eq!(normal.status, PositionStatus::Completed);

    // Two stakes back, two fees kept
    assert_eq!(e.accounts.balance("alice").await.unwrap(), dec!(996));
}

// ---- Mocked Port Tests ----

#[tokio::test]
async fn test_unreadable_ledger_fails_the_sweep() {
    let mut ledger = MockLedger::new();
    ledger
        .expect_due_positions()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("snapshot unreadable")));
    ledger.expect_close_position().never();

    let mut prices = MockPrices::new();
    prices.expect_get_price().never();

    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let processor = SettlementProcessor::new(
        Arc::new(ledger),
        Arc::new(prices),
        Arc::clone(&metrics),
        &PositionsConfig::default(),
        &SettlementConfig::default(),
    );

    match processor.sweep_now().await {
        SweepOutcome::Failed(error) => assert!(error.contains("snapshot unreadable")),
        other => panic!("expected a failed sweep, got {other:?}"),
    }
    assert_eq!(metrics.settlement_failures.get(), 1);
    assert!(!processor.is_sweeping());
}

#[tokio::test]
async fn test_one_failed_close_does_not_stop_the_sweep() {
    let start = Utc::now() - Duration::seconds(30);
    let now = start + Duration::seconds(30);
    let failing = active_position(dec!(100), dec!(100), start);
    let healthy = active_position(dec!(100), dec!(100), start);
    let failing_id = failing.id;
    let healthy_id = healthy.id;

    let mut ledger = MockLedger::new();
    let due = vec![failing.clone(), healthy.clone()];
    ledger
        .expect_due_positions()
        .times(1)
        .returning(move |_| Ok(due.clone()));
    ledger
        .expect_close_position()
        .with(eq(failing_id), always())
        .times(1)
        .returning(|_, _| Err(LedgerError::Storage(anyhow::anyhow!("disk full"))));
    ledger
        .expect_close_position()
        .with(eq(healthy_id), always())
        .times(1)
        .returning(move |_, close| {
            let PositionClose::Settle { amounts, at, .. } = close else {
                panic!("expected a settlement");
            };
            let mut position = healthy.clone();
            position.status = PositionStatus::Completed;
            Ok(CloseOutcome::Applied {
                position,
                account: Account::new("alice", at),
                entry: LedgerEntry {
                    position_id: Some(healthy_id),
                    account_id: "alice".to_string(),
                    kind: EntryKind::Credit,
                    asset: "USDT".to_string(),
                    amount: amounts.payout,
                    balance_after: amounts.payout,
                    timestamp: at,
                },
            })
        });

    let mut prices = MockPrices::new();
    prices
        .expect_get_price()
        .with(eq("BTC"))
        .returning(move |_| Some(quote(dec!(110), now)));

    let metrics = Arc::new(EngineMetrics::new().unwrap());
    let processor = SettlementProcessor::new(
        Arc::new(ledger),
        Arc::new(prices),
        Arc::clone(&metrics),
        &PositionsConfig::default(),
        &SettlementConfig::default(),
    );

    let report = completed(processor.sweep_at(now).await);
    assert_eq!(report.failed, 1);
    assert_eq!(report.settled, 1);
    assert_eq!(report.total_paid_out, dec!(110));
    assert!(matches!(
        report.results[0].status,
        SettlementStatus::Failed { .. }
    ));
    assert_eq!(metrics.settlement_failures.get(), 1);
}

#[tokio::test]
async fn test_lost_race_reported_as_already_terminal() {
    let start = Utc::now() - Duration::seconds(30);
    let now = start + Duration::seconds(30);
    let position = active_position(dec!(50), dec!(100), start);

    let mut ledger = MockLedger::new();
    let due = vec![position];
    ledger
        .expect_due_positions()
        .returning(move |_| Ok(due.clone()));
    ledger
        .expect_close_position()
        .times(1)
        .returning(|_, _| Ok(CloseOutcome::AlreadyClosed(PositionStatus::Cancelled)));

    let mut prices = MockPrices::new();
    prices
        .expect_get_price()
        .returning(move |_| Some(quote(dec!(99), now)));

    let processor = SettlementProcessor::new(
        Arc::new(ledger),
        Arc::new(prices),
        Arc::new(EngineMetrics::new().unwrap()),
        &PositionsConfig::default(),
        &SettlementConfig::default(),
    );

    let report = completed(processor.sweep_at(now).await);
    assert_eq!(report.already_terminal, 1);
    assert_eq!(report.total_paid_out, Decimal::ZERO);
}

#[tokio::test]
async fn test_placement_storage_failure_is_not_a_rejection() {
    let now = Utc::now();
    let mut ledger = MockLedger::new();
    ledger
        .expect_account()
        .with(eq("alice"))
        .returning(move |_| Ok(Some(Account::new("alice", now))));
    ledger
        .expect_open_position()
        .times(1)
        .returning(|_, _| Err(LedgerError::Storage(anyhow::anyhow!("snapshot write failed"))));

    let mut prices = MockPrices::new();
    prices
        .expect_instruments()
        .returning(|| vec!["BTC".to_string()]);
    prices
        .expect_get_price()
        .returning(move |_| Some(quote(dec!(50000), now)));

    let lifecycle = PositionLifecycle::new(
        Arc::new(ledger),
        Arc::new(prices),
        Arc::new(EngineMetrics::new().unwrap()),
        PositionsConfig::default(),
        &SettlementConfig::default(),
    );

    let err = lifecycle.place_at(buy_btc(dec!(100), 30), now).await.unwrap_err();
    assert_eq!(err.code(), "storage");
    assert!(!err.is_rejection());
}

#[tokio::test]
async fn test_manual_trigger_during_sweep_is_skipped() {
    let start = Utc::now() - Duration::seconds(30);
    let now = start + Duration::seconds(30);

    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);

    let mut ledger = MockLedger::new();
    ledger.expect_due_positions().times(1).returning(move |_| {
        // Hold the sweep open until the test has fired a second trigger
        let _ = release_rx
            .lock()
            .unwrap()
            .recv_timeout(std::time::Duration::from_secs(5));
        Ok(Vec::new())
    });
    let prices = MockPrices::new();

    let processor = Arc::new(SettlementProcessor::new(
        Arc::new(ledger),
        Arc::new(prices),
        Arc::new(EngineMetrics::new().unwrap()),
        &PositionsConfig::default(),
        &SettlementConfig::default(),
    ));

    let first = {
        let processor = Arc::clone(&processor);
        tokio::task::spawn_blocking(move || {
            tokio::runtime::Handle::current().block_on(processor.sweep_at(now))
        })
    };

    while !processor.is_sweeping() {
        tokio::task::yield_now().await;
    }
    assert!(matches!(processor.sweep_at(now).await, SweepOutcome::Skipped));

    release_tx.send(()).unwrap();
    assert!(matches!(first.await.unwrap(), SweepOutcome::Completed(_)));
    assert!(!processor.is_sweeping());
}
