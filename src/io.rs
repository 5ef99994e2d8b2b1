//! Streaming I/O against attached devices.
//!
//! Writes consume the caller's stream in fixed-size chunks, growing the
//! backing volume when the payload outruns it; reads expose a pull-based
//! finite chunk sequence that releases its attachment once exhausted.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::io::Write as _;
use std::sync::Arc;

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::attach::{AttachedDevice, DeviceAttacher};
use crate::controlplane::{Volume, VolumeControlPlane};
use crate::error::StoreError;
use crate::lifecycle::{VolumeLifecycle, gib_for_bytes};

/// Incremental integrity accumulator fed one chunk at a time during write.
///
/// The engine feeds every chunk it writes but does not own the verifier's
/// lifecycle; the caller finalizes it after `add` returns.
pub trait Verifier {
    /// Absorbs one written chunk.
    fn update(&mut self, chunk: &[u8]);
}

impl Verifier for Sha256 {
    fn update(&mut self, chunk: &[u8]) {
        Digest::update(self, chunk);
    }
}

/// Result of streaming an image onto a device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct WriteSummary {
    /// Total payload bytes written.
    pub bytes_written: u64,
    /// Hex sha256 digest of the payload.
    pub checksum_hex: String,
}

/// Streams `image` onto the device in `chunk_size` chunks.
///
/// The volume snapshot is kept current across resizes so the caller sees
/// the final capacity. A no-space write surfaces as
/// [`StoreError::StorageFull`]; other I/O errors pass through unmasked.
/// Cleanup (detach, delete) is the caller's responsibility.
pub(crate) async fn copy_to_device<C>(
    client: &C,
    lifecycle: &VolumeLifecycle,
    volume: &mut Volume,
    device_path: &Utf8Path,
    image: &mut dyn Read,
    chunk_size: usize,
    mut verifier: Option<&mut dyn Verifier>,
) -> Result<WriteSummary, StoreError>
where
    C: VolumeControlPlane + ?Sized,
{
    let mut device = OpenOptions::new().write(true).open(device_path)?;
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;

    loop {
        let mut chunk = vec![0_u8; chunk_size];
        let read = image.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        chunk.truncate(read);

        let projected = bytes_written + chunk.len() as u64;
        if projected > volume.capacity_bytes() {
            let new_size_gib = gib_for_bytes(projected);
            lifecycle.extend(client, volume.id, new_size_gib).await?;
            volume.size_gib = new_size_gib;
        }

        match device.write_all(&chunk) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::StorageFull => {
                return Err(StoreError::StorageFull {
                    volume_id: volume.id,
                });
            }
            Err(err) => return Err(err.into()),
        }

        Digest::update(&mut hasher, &chunk);
        if let Some(v) = verifier.as_deref_mut() {
            v.update(&chunk);
        }
        bytes_written = projected;
    }

    device.flush()?;
    device.sync_all()?;

    Ok(WriteSummary {
        bytes_written,
        checksum_hex: format!("{:x}", hasher.finalize()),
    })
}

/// Lazy, finite, non-restartable chunk sequence over an attached volume.
///
/// The caller drives consumption; the attachment is released when the
/// sequence is exhausted or [`ImageStream::close`] is called. A stream
/// dropped while still attached cannot detach (detaching needs an await
/// point) and logs a warning instead.
#[derive(Debug)]
pub struct ImageStream<A: DeviceAttacher> {
    attacher: Arc<A>,
    device: Option<(AttachedDevice, File)>,
    total: u64,
    remaining: u64,
    chunk_size: usize,
}

impl<A: DeviceAttacher> ImageStream<A> {
    pub(crate) const fn new(
        attacher: Arc<A>,
        device: AttachedDevice,
        file: File,
        total: u64,
        chunk_size: usize,
    ) -> Self {
        Self {
            attacher,
            device: Some((device, file)),
            total,
            remaining: total,
            chunk_size,
        }
    }

    /// Total byte size of the image this stream produces.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.total
    }

    /// Produces the next chunk, or `None` once the image is exhausted.
    ///
    /// Exhaustion detaches the device; the first `None` is only returned
    /// after a successful detach.
    ///
    /// # Errors
    ///
    /// Device read failures propagate as [`StoreError::Io`] after a
    /// best-effort detach; detach failures surface as
    /// [`StoreError::Backend`].
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        if self.remaining == 0 {
            self.close().await?;
            return Ok(None);
        }
        let Some((_, file)) = self.device.as_mut() else {
            return Ok(None);
        };

        let want = usize::try_from(self.remaining.min(self.chunk_size as u64))
            .unwrap_or(self.chunk_size);
        let mut chunk = vec![0_u8; want];
        if let Err(err) = file.read_exact(&mut chunk) {
            self.abandon().await;
            return Err(err.into());
        }

        self.remaining -= chunk.len() as u64;
        Ok(Some(chunk))
    }

    /// Releases the attachment early when the caller abandons the stream.
    ///
    /// # Errors
    ///
    /// Surfaces detach failures as [`StoreError::Backend`].
    pub async fn close(&mut self) -> Result<(), StoreError> {
        if let Some((device, file)) = self.device.take() {
            drop(file);
            self.attacher.detach(&device).await?;
        }
        Ok(())
    }

    async fn abandon(&mut self) {
        if let Err(err) = self.close().await {
            warn!("failed to detach device after read error: {err}");
        }
    }
}

impl<A: DeviceAttacher> Drop for ImageStream<A> {
    fn drop(&mut self) {
        if let Some((device, _)) = self.device.as_ref() {
            warn!(
                "image stream for volume {} dropped while attached; call close() to detach",
                device.volume_id
            );
        }
    }
}
