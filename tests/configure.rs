//! Behaviour tests for eager configuration validation.

#[path = "common/store_fixture.rs"]
mod store_fixture;

use std::io::Cursor;

use uuid::Uuid;

use cinder_store::test_support::ControlPlaneCall;
use cinder_store::{CinderStoreConfig, StoreError};
use store_fixture::{catalog_context, fixture_with_config};

fn static_credentials() -> CinderStoreConfig {
    CinderStoreConfig {
        store_user_name: Some(String::from("test_user")),
        store_password: Some(String::from("test_password")),
        store_project_name: Some(String::from("test_project")),
        store_auth_address: Some(String::from("http://identity.test")),
        ..CinderStoreConfig::default()
    }
}

#[tokio::test]
async fn partial_static_credentials_are_rejected() {
    let mut fx = fixture_with_config(CinderStoreConfig {
        store_password: None,
        ..static_credentials()
    });

    let err = fx
        .store
        .configure()
        .await
        .expect_err("partial credentials should fail");
    assert!(matches!(err, StoreError::BadStoreConfiguration { .. }));
}

#[tokio::test]
async fn known_volume_type_is_kept_and_requested() {
    let mut fx = fixture_with_config(CinderStoreConfig {
        volume_type: Some(String::from("some_type")),
        ..static_credentials()
    });
    fx.control_plane
        .set_volume_types(vec![String::from("some_type")]);

    fx.store.configure().await.expect("configure should succeed");

    let ctx = catalog_context();
    let data = vec![0_u8; 100];
    fx.store
        .add(Uuid::new_v4(), &mut Cursor::new(&data), 100, Some(&ctx), None)
        .await
        .expect("add should succeed");

    assert!(fx.control_plane.calls().iter().any(|call| matches!(
        call,
        ControlPlaneCall::Create { volume_type: Some(t), .. } if t == "some_type"
    )));
}

#[tokio::test]
async fn unknown_volume_type_is_warned_about_and_unset() {
    let mut fx = fixture_with_config(CinderStoreConfig {
        volume_type: Some(String::from("some_random_type")),
        ..static_credentials()
    });
    fx.control_plane
        .set_volume_types(vec![String::from("some_type")]);

    fx.store.configure().await.expect("configure should succeed");

    let ctx = catalog_context();
    let data = vec![0_u8; 100];
    fx.store
        .add(Uuid::new_v4(), &mut Cursor::new(&data), 100, Some(&ctx), None)
        .await
        .expect("add should succeed");

    assert!(fx.control_plane.calls().iter().any(|call| matches!(
        call,
        ControlPlaneCall::Create {
            volume_type: None,
            ..
        }
    )));
}

#[tokio::test]
async fn volume_type_survives_when_it_cannot_be_verified() {
    // Without static credentials there is no context-free client, so the
    // configured type is kept as-is.
    let mut fx = fixture_with_config(CinderStoreConfig {
        volume_type: Some(String::from("some_type")),
        ..CinderStoreConfig::default()
    });

    fx.store.configure().await.expect("configure should succeed");
    assert!(
        !fx.control_plane
            .calls()
            .iter()
            .any(|call| matches!(call, ControlPlaneCall::ListTypes)),
        "no verification call should be made without credentials"
    );

    let ctx = catalog_context();
    let data = vec![0_u8; 100];
    fx.store
        .add(Uuid::new_v4(), &mut Cursor::new(&data), 100, Some(&ctx), None)
        .await
        .expect("add should succeed");

    assert!(fx.control_plane.calls().iter().any(|call| matches!(
        call,
        ControlPlaneCall::Create { volume_type: Some(t), .. } if t == "some_type"
    )));
}
