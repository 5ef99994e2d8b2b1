//! Test support utilities shared across unit and integration tests.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8PathBuf;
use uuid::Uuid;

use crate::attach::{AttachError, AttachFuture, AttachedDevice, DeviceAttacher};
use crate::controlplane::{
    ControlPlaneError, ControlPlaneFuture, Volume, VolumeControlPlane, VolumeSpec, VolumeStatus,
};
use crate::error::StoreError;
use crate::io::Verifier;
use crate::session::{ControlPlaneProvider, ProviderFuture, Session};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded control-plane invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlPlaneCall {
    /// `create_volume` with the requested size and type.
    Create {
        /// Requested capacity in GiB.
        size_gib: u64,
        /// Volume type passed by the driver, when any.
        volume_type: Option<String>,
    },
    /// `get_volume` for the given id.
    Get(Uuid),
    /// `extend_volume` to the given size.
    Extend {
        /// Volume being grown.
        volume_id: Uuid,
        /// Requested capacity in GiB.
        new_size_gib: u64,
    },
    /// `delete_volume` for the given id.
    Delete(Uuid),
    /// `update_volume_metadata` for the given id.
    UpdateMetadata(Uuid),
    /// `list_volume_types`.
    ListTypes,
}

#[derive(Debug, Default)]
struct ControlPlaneState {
    volumes: HashMap<Uuid, Volume>,
    created_order: Vec<Uuid>,
    calls: Vec<ControlPlaneCall>,
    delete_counts: HashMap<Uuid, usize>,
    created_size_override: Option<u64>,
    hold_status: Option<VolumeStatus>,
    fail_extend: bool,
    fail_delete: bool,
    volume_types: Vec<String>,
}

/// Scripted control plane that records every call.
///
/// Created volumes become `available` immediately unless a held status is
/// scripted; extends apply instantly.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    state: Mutex<ControlPlaneState>,
}

impl FakeControlPlane {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes newly created volumes report the given capacity instead of
    /// the requested one. A zero override exercises the resize path with
    /// small payloads.
    pub fn override_created_size_gib(&self, size_gib: u64) {
        lock(&self.state).created_size_override = Some(size_gib);
    }

    /// Pins every status snapshot to `status`, preventing transitions.
    pub fn hold_in_status(&self, status: VolumeStatus) {
        lock(&self.state).hold_status = Some(status);
    }

    /// Makes `extend_volume` fail with a backend rejection.
    pub fn fail_extend(&self) {
        lock(&self.state).fail_extend = true;
    }

    /// Makes `delete_volume` fail with a backend rejection.
    pub fn fail_delete(&self) {
        lock(&self.state).fail_delete = true;
    }

    /// Sets the volume types the backend reports.
    pub fn set_volume_types(&self, types: Vec<String>) {
        lock(&self.state).volume_types = types;
    }

    /// Seeds a pre-existing volume.
    pub fn insert_volume(&self, volume: Volume) {
        lock(&self.state).volumes.insert(volume.id, volume);
    }

    /// Snapshot of every recorded call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        lock(&self.state).calls.clone()
    }

    /// How often `delete_volume` was invoked for the volume.
    #[must_use]
    pub fn delete_count(&self, volume_id: Uuid) -> usize {
        lock(&self.state)
            .delete_counts
            .get(&volume_id)
            .copied()
            .unwrap_or(0)
    }

    /// Ids of all volumes ever created, in creation order.
    #[must_use]
    pub fn created_ids(&self) -> Vec<Uuid> {
        lock(&self.state).created_order.clone()
    }

    /// Current snapshot of a volume, if it still exists.
    #[must_use]
    pub fn volume(&self, volume_id: Uuid) -> Option<Volume> {
        lock(&self.state).volumes.get(&volume_id).cloned()
    }
}

impl VolumeControlPlane for FakeControlPlane {
    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> ControlPlaneFuture<'a, Volume> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(ControlPlaneCall::Create {
                size_gib: spec.size_gib,
                volume_type: spec.volume_type.clone(),
            });
            let size_gib = state.created_size_override.unwrap_or(spec.size_gib);
            let status = state
                .hold_status
                .clone()
                .unwrap_or(VolumeStatus::Available);
            let volume = Volume {
                id: Uuid::new_v4(),
                status,
                size_gib,
                metadata: spec.metadata.clone(),
            };
            state.created_order.push(volume.id);
            state.volumes.insert(volume.id, volume.clone());
            Ok(volume)
        };
        Box::pin(async move { result })
    }

    fn get_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, Volume> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(ControlPlaneCall::Get(volume_id));
            let held = state.hold_status.clone();
            state
                .volumes
                .get(&volume_id)
                .cloned()
                .map(|mut volume| {
                    if let Some(status) = held {
                        volume.status = status;
                    }
                    volume
                })
                .ok_or(ControlPlaneError::NotFound { volume_id })
        };
        Box::pin(async move { result })
    }

    fn extend_volume(&self, volume_id: Uuid, new_size_gib: u64) -> ControlPlaneFuture<'_, ()> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(ControlPlaneCall::Extend {
                volume_id,
                new_size_gib,
            });
            if state.fail_extend {
                Err(ControlPlaneError::Api {
                    status: 500,
                    message: String::from("resize rejected"),
                })
            } else {
                match state.volumes.get_mut(&volume_id) {
                    Some(volume) => {
                        volume.size_gib = new_size_gib;
                        Ok(())
                    }
                    None => Err(ControlPlaneError::NotFound { volume_id }),
                }
            }
        };
        Box::pin(async move { result })
    }

    fn delete_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, ()> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(ControlPlaneCall::Delete(volume_id));
            *state.delete_counts.entry(volume_id).or_insert(0) += 1;
            if state.fail_delete {
                Err(ControlPlaneError::Api {
                    status: 500,
                    message: String::from("delete rejected"),
                })
            } else if state.volumes.remove(&volume_id).is_some() {
                Ok(())
            } else {
                Err(ControlPlaneError::NotFound { volume_id })
            }
        };
        Box::pin(async move { result })
    }

    fn update_volume_metadata<'a>(
        &'a self,
        volume_id: Uuid,
        metadata: &'a HashMap<String, String>,
    ) -> ControlPlaneFuture<'a, ()> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(ControlPlaneCall::UpdateMetadata(volume_id));
            match state.volumes.get_mut(&volume_id) {
                Some(volume) => {
                    volume
                        .metadata
                        .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Ok(())
                }
                None => Err(ControlPlaneError::NotFound { volume_id }),
            }
        };
        Box::pin(async move { result })
    }

    fn list_volume_types(&self) -> ControlPlaneFuture<'_, Vec<String>> {
        let result = {
            let mut state = lock(&self.state);
            state.calls.push(ControlPlaneCall::ListTypes);
            Ok(state.volume_types.clone())
        };
        Box::pin(async move { result })
    }
}

/// Provider handing out one shared [`FakeControlPlane`], counting builds.
#[derive(Debug)]
pub struct FakeProvider {
    control_plane: Arc<FakeControlPlane>,
    build_count: Mutex<usize>,
    fail_build: Mutex<bool>,
}

impl FakeProvider {
    /// Wraps the given fake.
    #[must_use]
    pub fn new(control_plane: Arc<FakeControlPlane>) -> Self {
        Self {
            control_plane,
            build_count: Mutex::new(0),
            fail_build: Mutex::new(false),
        }
    }

    /// How many times a client was built (cache misses).
    #[must_use]
    pub fn build_count(&self) -> usize {
        *lock(&self.build_count)
    }

    /// Makes subsequent builds fail.
    pub fn fail_builds(&self) {
        *lock(&self.fail_build) = true;
    }
}

impl ControlPlaneProvider for FakeProvider {
    type Client = Arc<FakeControlPlane>;

    fn build<'a>(&'a self, _session: &'a Session) -> ProviderFuture<'a, Self::Client> {
        let result = {
            *lock(&self.build_count) += 1;
            if *lock(&self.fail_build) {
                Err(StoreError::backend("scripted session build failure"))
            } else {
                Ok(Arc::clone(&self.control_plane))
            }
        };
        Box::pin(async move { result })
    }
}

#[derive(Debug, Default)]
struct AttacherState {
    multipath_supported: bool,
    fail_attach: bool,
    fail_detach: bool,
    fixed_device_path: Option<Utf8PathBuf>,
    attach_calls: Vec<(Uuid, bool)>,
    detach_calls: Vec<Uuid>,
}

/// Attacher double backed by plain files under a caller-supplied directory.
#[derive(Debug)]
pub struct FakeAttacher {
    device_dir: Utf8PathBuf,
    state: Mutex<AttacherState>,
}

impl FakeAttacher {
    /// Creates an attacher whose device files live under `device_dir`.
    #[must_use]
    pub fn new(device_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            device_dir: device_dir.into(),
            state: Mutex::new(AttacherState::default()),
        }
    }

    /// Scripts the host's multipath capability.
    pub fn set_multipath_supported(&self, supported: bool) {
        lock(&self.state).multipath_supported = supported;
    }

    /// Makes subsequent attach calls fail.
    pub fn fail_attach(&self) {
        lock(&self.state).fail_attach = true;
    }

    /// Makes subsequent detach calls fail.
    pub fn fail_detach(&self) {
        lock(&self.state).fail_detach = true;
    }

    /// Routes every attachment to a fixed device path (for example
    /// `/dev/full`).
    pub fn use_device_path(&self, path: impl Into<Utf8PathBuf>) {
        lock(&self.state).fixed_device_path = Some(path.into());
    }

    /// Pre-populates a volume's device file with image bytes.
    ///
    /// # Panics
    ///
    /// Panics when the device file cannot be written; tests treat that as
    /// a harness failure.
    pub fn seed_device(&self, volume_id: Uuid, payload: &[u8]) {
        let path = self.device_path(volume_id);
        if let Err(err) = fs::write(path.as_std_path(), payload) {
            panic!("failed to seed fake device {path}: {err}");
        }
    }

    /// Path of the device file backing a volume.
    #[must_use]
    pub fn device_path(&self, volume_id: Uuid) -> Utf8PathBuf {
        lock(&self.state).fixed_device_path.clone().unwrap_or_else(|| {
            self.device_dir.join(format!("vol-{volume_id}"))
        })
    }

    /// Every attach call as `(volume_id, use_multipath)`, in order.
    #[must_use]
    pub fn attach_calls(&self) -> Vec<(Uuid, bool)> {
        lock(&self.state).attach_calls.clone()
    }

    /// Every detached volume id, in order.
    #[must_use]
    pub fn detach_calls(&self) -> Vec<Uuid> {
        lock(&self.state).detach_calls.clone()
    }
}

impl DeviceAttacher for FakeAttacher {
    fn multipath_supported(&self) -> bool {
        lock(&self.state).multipath_supported
    }

    fn attach(&self, volume_id: Uuid, use_multipath: bool) -> AttachFuture<'_, AttachedDevice> {
        let result = {
            let path = self.device_path(volume_id);
            let mut state = lock(&self.state);
            state.attach_calls.push((volume_id, use_multipath));
            if state.fail_attach {
                Err(AttachError::Failed {
                    volume_id,
                    message: String::from("scripted attach failure"),
                })
            } else if !path.as_std_path().exists() && fs::write(path.as_std_path(), b"").is_err()
            {
                Err(AttachError::DeviceMissing { volume_id, path })
            } else {
                Ok(AttachedDevice {
                    volume_id,
                    device_path: path,
                    multipath: use_multipath,
                })
            }
        };
        Box::pin(async move { result })
    }

    fn detach<'a>(&'a self, device: &'a AttachedDevice) -> AttachFuture<'a, ()> {
        let result = {
            let mut state = lock(&self.state);
            state.detach_calls.push(device.volume_id);
            if state.fail_detach {
                Err(AttachError::Failed {
                    volume_id: device.volume_id,
                    message: String::from("scripted detach failure"),
                })
            } else {
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

/// Verifier double that captures every chunk it is fed.
#[derive(Debug, Default)]
pub struct CollectingVerifier {
    chunks: Vec<Vec<u8>>,
}

impl CollectingVerifier {
    /// Creates an empty verifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured chunks, in feed order.
    #[must_use]
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    /// Total bytes fed to the verifier.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

impl Verifier for CollectingVerifier {
    fn update(&mut self, chunk: &[u8]) {
        self.chunks.push(chunk.to_vec());
    }
}
