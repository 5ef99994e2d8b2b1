//! Behaviour tests for per-identity session caching and reset.

#[path = "common/store_fixture.rs"]
mod store_fixture;

use std::sync::Arc;

use cinder_store::{CinderStoreConfig, StoreError};
use store_fixture::{catalog_context, fixture, fixture_with_config};

#[tokio::test]
async fn repeated_calls_for_one_identity_share_a_handle() {
    let fx = fixture();
    let ctx = catalog_context();

    let first = fx
        .store
        .get_client(Some(&ctx))
        .await
        .expect("client should build");
    let second = fx
        .store
        .get_client(Some(&ctx))
        .await
        .expect("client should be cached");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fx.provider.build_count(), 1);
}

#[tokio::test]
async fn reset_forces_a_fresh_handle() {
    let fx = fixture();
    let ctx = catalog_context();

    let before = fx
        .store
        .get_client(Some(&ctx))
        .await
        .expect("client should build");
    fx.store.reset_sessions().await;
    let after = fx
        .store
        .get_client(Some(&ctx))
        .await
        .expect("client should rebuild");

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(fx.provider.build_count(), 2);
}

#[tokio::test]
async fn distinct_identities_build_distinct_handles() {
    let fx = fixture();
    let ctx_a = catalog_context();
    let mut ctx_b = catalog_context();
    ctx_b.project_id = String::from("other_project");

    fx.store
        .get_client(Some(&ctx_a))
        .await
        .expect("client should build");
    fx.store
        .get_client(Some(&ctx_b))
        .await
        .expect("client should build");

    assert_eq!(fx.provider.build_count(), 2);
}

#[tokio::test]
async fn static_credentials_build_without_a_context() {
    let fx = fixture_with_config(CinderStoreConfig {
        store_user_name: Some(String::from("test_user")),
        store_password: Some(String::from("test_password")),
        store_project_name: Some(String::from("test_project")),
        store_auth_address: Some(String::from("http://identity.test")),
        ..CinderStoreConfig::default()
    });

    let context_free = fx
        .store
        .get_client(None)
        .await
        .expect("static credentials should not need a context");

    // The override also wins over a supplied context: same identity,
    // same cached handle.
    let ctx = catalog_context();
    let with_context = fx
        .store
        .get_client(Some(&ctx))
        .await
        .expect("client should be cached");
    assert!(Arc::ptr_eq(&context_free, &with_context));
    assert_eq!(fx.provider.build_count(), 1);
}

#[tokio::test]
async fn missing_credentials_and_context_is_a_configuration_error() {
    let fx = fixture();

    let err = fx
        .store
        .get_client(None)
        .await
        .expect_err("no credentials and no context should fail");
    assert!(matches!(err, StoreError::BadStoreConfiguration { .. }));
    assert_eq!(fx.provider.build_count(), 0);
}

#[tokio::test]
async fn provider_failures_propagate_and_are_not_cached() {
    let fx = fixture();
    fx.provider.fail_builds();
    let ctx = catalog_context();

    let err = fx
        .store
        .get_client(Some(&ctx))
        .await
        .expect_err("scripted build failure should surface");
    assert!(matches!(err, StoreError::Backend { .. }));
    assert_eq!(fx.provider.build_count(), 1);
}
