mod common;

use rust_decimal::Decimal;

use propcopy::adapters::{AccountSnapshot, AdapterRegistry, AdapterSettings, BrokerAdapter};
use propcopy::db::account_repo;
use propcopy::errors::AppError;
use propcopy::models::{Firm, Platform};
use propcopy::services::account_manager::{self, DiscoveredAccount, PlatformCredentials};

fn mock_registry() -> AdapterRegistry {
    AdapterRegistry::new(AdapterSettings::default())
}

fn credentials() -> PlatformCredentials {
    PlatformCredentials {
        email: Some("trader@example.com".into()),
        password: Some("hunter2".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_connect_platform_discovers_and_masks_credentials() {
    let registry = mock_registry();
    registry.mock().set_accounts(vec![
        AccountSnapshot {
            account_id: "TSX-001".into(),
            name: Some("Combine 50K".into()),
            balance: Decimal::from(50_000),
            equity: Decimal::from(50_000),
            margin_used: Decimal::ZERO,
            positions: Vec::new(),
        },
        AccountSnapshot {
            account_id: "TSX-002".into(),
            name: Some("Express 100K".into()),
            balance: Decimal::from(100_000),
            equity: Decimal::from(100_000),
            margin_used: Decimal::ZERO,
            positions: Vec::new(),
        },
    ]);

    let summary = account_manager::connect_platform(
        &registry,
        Firm::Topstepx,
        Platform::Projectx,
        &credentials(),
    )
    .await
    .expect("platform connect should succeed");

    assert_eq!(summary.accounts.len(), 2);
    assert_eq!(summary.accounts[0].account_number, "TSX-001");

    // Echo exposes presence only.
    assert!(summary.credentials.has_email);
    assert!(summary.credentials.has_password);
    assert!(!summary.credentials.has_api_key);

    // Transient session: the adapter is left disconnected.
    assert!(!registry.mock().is_connected());
}

#[tokio::test]
async fn test_create_accounts_upsert_is_stable() {
    let pool = common::setup_test_db().await;

    let user = common::seed_user(&pool).await;
    let discovered = vec![DiscoveredAccount {
        account_number: format!("TSX-{}", uuid::Uuid::new_v4()),
        name: Some("Combine 50K".into()),
        balance: Decimal::from(50_000),
    }];

    let first = account_manager::create_accounts_from_platform(
        &pool,
        user,
        Firm::Topstepx,
        Platform::Projectx,
        &discovered,
        &credentials(),
    )
    .await
    .expect("import should succeed");
    assert_eq!(first.len(), 1);
    assert!(first[0].is_connected);

    // Re-importing the same discovery updates in place.
    let second = account_manager::create_accounts_from_platform(
        &pool,
        user,
        Firm::Topstepx,
        Platform::Projectx,
        &discovered,
        &credentials(),
    )
    .await
    .expect("re-import should succeed");
    assert_eq!(second[0].id, first[0].id);

    let all = account_repo::list_accounts(&pool, user).await.unwrap();
    let matching: Vec<_> = all
        .iter()
        .filter(|a| a.account_number == discovered[0].account_number)
        .collect();
    assert_eq!(matching.len(), 1);
}

#[tokio::test]
async fn test_connect_account_persists_failure_message() {
    let pool = common::setup_test_db().await;
    let registry = mock_registry();

    let user = common::seed_user(&pool).await;
    let account =
        common::seed_account(&pool, user, Firm::Topstepx, Platform::Projectx, None).await;

    registry.mock().set_fail_connect(true);
    let err = account_manager::connect_account(&pool, &registry, account.id, user)
        .await
        .expect_err("connect should fail");
    assert!(matches!(err, AppError::BadRequest(_)));

    let reloaded = account_repo::get_account(&pool, account.id).await.unwrap().unwrap();
    assert!(!reloaded.is_connected);
    assert!(reloaded.error_message.as_deref().unwrap_or("").contains("auth"));

    // A successful connect clears the error and refreshes the balance.
    registry.mock().set_fail_connect(false);
    let reconnected = account_manager::connect_account(&pool, &registry, account.id, user)
        .await
        .expect("connect should succeed");
    assert!(reconnected.is_connected);
    assert!(reconnected.error_message.is_none());
}

#[tokio::test]
async fn test_test_connection_reports_without_persisting() {
    let registry = mock_registry();

    let ok = account_manager::test_connection(
        &registry,
        Firm::Topstepx,
        Platform::Projectx,
        &credentials(),
    )
    .await;
    assert!(ok.success);
    assert!(ok.account.is_some());

    registry.mock().set_fail_connect(true);
    let failed = account_manager::test_connection(
        &registry,
        Firm::Topstepx,
        Platform::Projectx,
        &credentials(),
    )
    .await;
    assert!(!failed.success);
    assert!(failed.account.is_none());
}

#[tokio::test]
async fn test_delete_guard_names_referencing_copiers() {
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
    common::seed_follower(&pool, copier.id, follower.id, common::FollowerSpec::default()).await;

    // Master is referenced.
    let err = account_manager::delete_account(&pool, master.id, user)
        .await
        .expect_err("master delete must be blocked");
    match err {
        AppError::Conflict(msg) => assert!(msg.contains(&copier.name)),
        other => panic!("expected conflict, got {other:?}"),
    }

    // Follower is referenced through its config.
    assert!(matches!(
        account_manager::delete_account(&pool, follower.id, user).await,
        Err(AppError::Conflict(_))
    ));

    // Unbinding the follower frees it for deletion.
    propcopy::db::copier_repo::delete_config(&pool, copier.id, follower.id)
        .await
        .unwrap();
    account_manager::delete_account(&pool, follower.id, user)
        .await
        .expect("unreferenced account deletes cleanly");
}

#[tokio::test]
async fn test_unknown_adapter_pair_is_rejected() {
    let registry = mock_registry();

    let result = account_manager::connect_platform(
        &registry,
        Firm::Tradefy,
        Platform::Ninjatrader,
        &credentials(),
    )
    .await;

    assert!(matches!(result, Err(AppError::BadRequest(_))));
}
