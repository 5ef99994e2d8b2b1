//! Shared fixture wiring a store to scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use cinder_store::test_support::{FakeAttacher, FakeControlPlane, FakeProvider};
use cinder_store::{CatalogEndpoint, CatalogEntry, CinderStoreConfig, RequestContext, Store};

/// Store under test plus handles to its scripted collaborators.
pub struct StoreFixture {
    pub store: Store<Arc<FakeProvider>, Arc<FakeAttacher>>,
    pub control_plane: Arc<FakeControlPlane>,
    pub provider: Arc<FakeProvider>,
    pub attacher: Arc<FakeAttacher>,
    // Held so the device files outlive the test body.
    pub device_dir: TempDir,
}

pub fn fixture() -> StoreFixture {
    fixture_with_config(CinderStoreConfig::default())
}

pub fn fixture_with_config(config: CinderStoreConfig) -> StoreFixture {
    let device_dir = tempfile::tempdir().expect("tempdir should be creatable");
    let device_path = Utf8PathBuf::from_path_buf(device_dir.path().to_path_buf())
        .expect("tempdir path should be UTF-8");

    let control_plane = Arc::new(FakeControlPlane::new());
    let provider = Arc::new(FakeProvider::new(Arc::clone(&control_plane)));
    let attacher = Arc::new(FakeAttacher::new(device_path));

    let store = Store::new(config, Arc::clone(&provider), Arc::clone(&attacher))
        .with_read_chunk_size(1024)
        .with_write_chunk_size(1024)
        .with_poll_interval(Duration::from_millis(1))
        .with_wait_timeout(Duration::from_millis(250));

    StoreFixture {
        store,
        control_plane,
        provider,
        attacher,
        device_dir,
    }
}

/// Context whose catalog publishes one block-storage endpoint.
pub fn catalog_context() -> RequestContext {
    RequestContext {
        user_id: String::from("fake_user"),
        project_id: String::from("fake_project"),
        auth_token: String::from("fake_token"),
        service_catalog: vec![CatalogEntry {
            name: String::from("cinder"),
            service_type: String::from("volumev3"),
            endpoints: vec![CatalogEndpoint {
                public_url: String::from("http://foo/public_url"),
                region: None,
            }],
        }],
    }
}
