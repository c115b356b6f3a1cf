mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use propcopy::adapters::{AdapterRegistry, AdapterSettings};
use propcopy::db::{copier_repo, mapping_repo, trade_repo};
use propcopy::engine::{CopierEngine, EngineSettings};
use propcopy::models::{
    CopierStatus, Firm, MappingStatus, Platform, ScalingType, Side, TradeStatus,
};

use common::FollowerSpec;

fn engine_settings() -> EngineSettings {
    EngineSettings {
        heartbeat_interval: Duration::from_secs(30),
        stop_timeout: Duration::from_secs(2),
    }
}

fn mock_registry() -> Arc<AdapterRegistry> {
    Arc::new(AdapterRegistry::new(AdapterSettings::default()))
}

#[tokio::test]
async fn test_happy_path_copies_fill_to_follower() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        Some(Decimal::from(50_000)),
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(
        &pool,
        copier.id,
        follower.id,
        FollowerSpec {
            fixed_contracts: Some(2),
            ..Default::default()
        },
    )
    .await;

    engine.start(copier.id, user).await.expect("start should succeed");

    let mock = registry.mock();
    mock.emit_trade(common::make_fill(&master.account_number, "ES", Side::Buy, 1));

    let synced = common::wait_for_mappings(&pool, copier.id, 1).await;
    assert!(synced, "expected a synced mapping");

    // One master trade at qty 1, one follower trade at qty 2.
    assert_eq!(common::count_trades(&pool, master.id).await, 1);
    assert_eq!(common::count_trades(&pool, follower.id).await, 1);

    let placed = mock.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].quantity, 2);
    assert_eq!(placed[0].account_id, follower.account_number);
    assert_eq!(placed[0].symbol, "ES");

    let mappings = mapping_repo::list_for_copier(&pool, copier.id).await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].status, MappingStatus::Synced);
    assert!(mappings[0].slave_trade_id.is_some());

    // The follower trade row carries the fill as reported by the broker.
    let slave_trade = trade_repo::get_trade(&pool, mappings[0].slave_trade_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(slave_trade.quantity, 2);
    assert_eq!(slave_trade.status, TradeStatus::Filled);

    // Start log + copy log.
    assert!(common::count_logs(&pool, copier.id, "info").await >= 2);

    engine.stop(copier.id, user).await.expect("stop should succeed");
}

#[tokio::test]
async fn test_percentage_scaling_rounds_down() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::MyfundedFutures,
        Platform::Tradovate,
        None,
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(
        &pool,
        copier.id,
        follower.id,
        FollowerSpec {
            scaling_type: ScalingType::Percentage,
            fixed_contracts: None,
            percentage_scale: Some(Decimal::new(5, 1)), // 0.5
            ..Default::default()
        },
    )
    .await;

    engine.start(copier.id, user).await.unwrap();

    let mock = registry.mock();
    mock.emit_trade(common::make_fill(&master.account_number, "NQ", Side::Buy, 3));

    let synced = common::wait_for_trades(&pool, follower.id, 1).await;
    assert!(synced, "expected follower trade");

    let placed = mock.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].quantity, 1); // floor(3 * 0.5)

    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_balance_based_scaling() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Ninjatrader,
        Some(Decimal::from(25_000)),
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(
        &pool,
        copier.id,
        follower.id,
        FollowerSpec {
            scaling_type: ScalingType::BalanceBased,
            fixed_contracts: None,
            ..Default::default()
        },
    )
    .await;

    engine.start(copier.id, user).await.unwrap();

    let mock = registry.mock();
    mock.emit_trade(common::make_fill(&master.account_number, "ES", Side::Buy, 4));

    let synced = common::wait_for_trades(&pool, follower.id, 1).await;
    assert!(synced, "expected follower trade");

    let placed = mock.placed_orders();
    // floor(4 * 25000 / 50000) = 2
    assert_eq!(placed[0].quantity, 2);

    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_risk_gate_trips_and_auto_disables() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        Some(Decimal::from(50_000)),
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(
        &pool,
        copier.id,
        follower.id,
        FollowerSpec {
            fixed_contracts: Some(1),
            daily_loss_limit: Some(Decimal::from(500)),
            auto_disable: true,
            ..Default::default()
        },
    )
    .await;

    // Today's realised P&L sits exactly at the limit: -500.
    common::seed_realized_pnl(&pool, follower.id, Decimal::from(-500)).await;

    engine.start(copier.id, user).await.unwrap();

    let mock = registry.mock();
    mock.emit_trade(common::make_fill(&master.account_number, "ES", Side::Buy, 1));

    let disabled = common::wait_for_disabled(&pool, copier.id, follower.id).await;
    assert!(disabled, "follower should be auto-disabled");

    let config = copier_repo::get_config(&pool, copier.id, follower.id)
        .await
        .unwrap()
        .unwrap();
    assert!(config.disabled_reason.as_deref().unwrap_or("").contains("-500"));

    // No follower order was placed; the seeded loss trade is the only row.
    assert!(mock.placed_orders().is_empty());
    assert_eq!(common::count_trades(&pool, follower.id).await, 1);
    assert_eq!(common::count_logs(&pool, copier.id, "warn").await, 1);

    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_follower_failure_is_isolated() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower_a = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        None,
    )
    .await;
    let follower_b = common::seed_account(
        &pool,
        user,
        Firm::MyfundedFutures,
        Platform::Ninjatrader,
        None,
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(&pool, copier.id, follower_a.id, FollowerSpec::default()).await;
    common::seed_follower(&pool, copier.id, follower_b.id, FollowerSpec::default()).await;

    engine.start(copier.id, user).await.unwrap();

    let mock = registry.mock();
    // Exactly one of the two concurrent placements hits the outage.
    mock.fail_next_place();
    mock.emit_trade(common::make_fill(&master.account_number, "ES", Side::Sell, 1));

    let settled = common::wait_for_mappings(&pool, copier.id, 2).await;
    assert!(settled, "expected two mappings");

    let mappings = mapping_repo::list_for_copier(&pool, copier.id).await.unwrap();
    let synced: Vec<_> = mappings.iter().filter(|m| m.status == MappingStatus::Synced).collect();
    let failed: Vec<_> = mappings.iter().filter(|m| m.status == MappingStatus::Failed).collect();

    assert_eq!(synced.len(), 1, "sibling follower must be unaffected");
    assert_eq!(failed.len(), 1);
    assert!(failed[0].slave_trade_id.is_none());
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("transport"));

    // No follower trade row for the failed path, exactly one for the sibling.
    let follower_trades = common::count_trades(&pool, follower_a.id).await
        + common::count_trades(&pool, follower_b.id).await;
    assert_eq!(follower_trades, 1);

    assert_eq!(common::count_logs(&pool, copier.id, "error").await, 1);

    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_replayed_execution_is_idempotent() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        None,
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(&pool, copier.id, follower.id, FollowerSpec::default()).await;

    engine.start(copier.id, user).await.unwrap();

    let mock = registry.mock();
    let fill = common::make_fill(&master.account_number, "ES", Side::Buy, 1);
    mock.emit_trade(fill.clone());
    mock.emit_trade(fill);

    let settled = common::wait_for_mappings(&pool, copier.id, 1).await;
    assert!(settled);
    // Let the replayed delivery drain through the worker.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Exactly one master trade, one mapping, one follower order.
    assert_eq!(common::count_trades(&pool, master.id).await, 1);
    assert_eq!(common::count_trades(&pool, follower.id).await, 1);
    assert_eq!(
        mapping_repo::list_for_copier(&pool, copier.id).await.unwrap().len(),
        1
    );
    assert_eq!(mock.placed_orders().len(), 1);

    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_max_contracts_zero_skips_follower() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        None,
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(
        &pool,
        copier.id,
        follower.id,
        FollowerSpec {
            fixed_contracts: Some(5),
            max_contracts: Some(0),
            ..Default::default()
        },
    )
    .await;

    engine.start(copier.id, user).await.unwrap();

    let mock = registry.mock();
    mock.emit_trade(common::make_fill(&master.account_number, "ES", Side::Buy, 1));

    // The master trade lands; the follower is skipped entirely.
    let recorded = common::wait_for_trades(&pool, master.id, 1).await;
    assert!(recorded);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(mock.placed_orders().is_empty());
    assert_eq!(common::count_trades(&pool, follower.id).await, 0);
    assert!(mapping_repo::list_for_copier(&pool, copier.id).await.unwrap().is_empty());

    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        None,
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(&pool, copier.id, follower.id, FollowerSpec::default()).await;

    // Pause from STOPPED is not a legal transition.
    assert!(engine.pause(copier.id, user).await.is_err());

    engine.start(copier.id, user).await.unwrap();
    let status = copier_repo::get_copier(&pool, copier.id).await.unwrap().unwrap().status;
    assert_eq!(status, CopierStatus::Active);

    // Starting an active copier reports AlreadyRunning.
    assert!(matches!(
        engine.start(copier.id, user).await,
        Err(propcopy::engine::EngineError::AlreadyRunning)
    ));

    engine.pause(copier.id, user).await.unwrap();
    let status = copier_repo::get_copier(&pool, copier.id).await.unwrap().unwrap().status;
    assert_eq!(status, CopierStatus::Paused);
    assert!(!engine.is_running(copier.id).await);

    // PAUSED -> ACTIVE via start, then stop.
    engine.start(copier.id, user).await.unwrap();
    engine.stop(copier.id, user).await.unwrap();
    let status = copier_repo::get_copier(&pool, copier.id).await.unwrap().unwrap().status;
    assert_eq!(status, CopierStatus::Stopped);

    // Stop is idempotent.
    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_recovery_resubscribes_active_copiers() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        None,
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(&pool, copier.id, follower.id, FollowerSpec::default()).await;

    // Simulate a crash: status persisted ACTIVE with no live worker.
    copier_repo::set_status(&pool, copier.id, CopierStatus::Active)
        .await
        .unwrap();

    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());
    engine.recover().await.unwrap();

    assert!(engine.is_running(copier.id).await);

    // The revived subscription still copies.
    let mock = registry.mock();
    mock.emit_trade(common::make_fill(&master.account_number, "ES", Side::Buy, 1));
    let synced = common::wait_for_trades(&pool, follower.id, 1).await;
    assert!(synced, "recovered copier should fan out");

    engine.stop(copier.id, user).await.unwrap();
}

#[tokio::test]
async fn test_start_requires_connected_master_and_followers() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();
    let engine = CopierEngine::new(pool.clone(), Arc::clone(&registry), engine_settings());

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let copier = common::seed_copier(&pool, user, master.id).await;

    // No follower configs yet.
    assert!(matches!(
        engine.start(copier.id, user).await,
        Err(propcopy::engine::EngineError::NoActiveFollowers)
    ));

    // Disconnected master is rejected.
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        None,
    )
    .await;
    common::seed_follower(&pool, copier.id, follower.id, FollowerSpec::default()).await;
    propcopy::db::account_repo::set_connection_state(&pool, master.id, false, None)
        .await
        .unwrap();

    assert!(matches!(
        engine.start(copier.id, user).await,
        Err(propcopy::engine::EngineError::MasterNotConnected)
    ));

    // Another user cannot start someone else's copier.
    let stranger = common::seed_user(&pool).await;
    assert!(matches!(
        engine.start(copier.id, stranger).await,
        Err(propcopy::engine::EngineError::NotFound)
    ));
}

#[tokio::test]
async fn test_duplicate_follower_binding_conflicts() {
    let pool = common::setup_test_db().await;

    let user = common::seed_user(&pool).await;
    let master = common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;
    let follower = common::seed_account(
        &pool,
        user,
        Firm::TakeprofitTrader,
        Platform::Tradovate,
        None,
    )
    .await;
    let copier = common::seed_copier(&pool, user, master.id).await;
    common::seed_follower(&pool, copier.id, follower.id, FollowerSpec::default()).await;

    let err = copier_repo::insert_config(
        &pool,
        copier.id,
        &propcopy::db::copier_repo::NewFollowerConfig {
            slave_account_id: follower.id,
            scaling_type: ScalingType::Fixed,
            fixed_contracts: Some(1),
            percentage_scale: None,
            max_contracts: None,
            daily_loss_limit: None,
            auto_disable: false,
        },
    )
    .await
    .expect_err("duplicate binding must violate uniqueness");

    assert!(propcopy::db::is_unique_violation(&err));
}
