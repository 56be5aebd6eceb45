//! Single-file move engine: copy, validate, commit, cleanup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use filetime::FileTime;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::volume::SpaceProbe;

use super::error::TransferError;

/// Copy buffer size.
pub const COPY_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Suffix of the in-flight destination file.
pub const MOVING_SUFFIX: &str = ".moving";

/// Number of sampled validation windows.
const SAMPLE_WINDOWS: u64 = 200;

/// Size of each validation window.
const SAMPLE_WINDOW_SIZE: u64 = 4 * 1024;

/// Poll interval while the pause flag is set.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Progress logging granularity, in percent.
const PROGRESS_LOG_STEP: u64 = 10;

/// Shared pause/cancel flags for one transfer.
///
/// The engine only reads these; they exist for an external controller.
/// Flag changes wake a paused copy loop early; the loop still re-checks
/// on a bounded interval.
#[derive(Debug, Clone, Default)]
pub struct TransferControls {
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    changed: Arc<Notify>,
}

impl TransferControls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Waits for a flag change, bounded by `bound`.
    async fn wait_changed(&self, bound: Duration) {
        tokio::select! {
            _ = self.changed.notified() => {}
            _ = tokio::time::sleep(bound) => {}
        }
    }
}

/// Moves one file into a destination directory.
///
/// The operation is sequential; callers run it inside their own task.
/// After the copy begins, any failure leaves the destination directory
/// either without the file or with the fully validated final file.
pub struct FileMover {
    space: Arc<dyn SpaceProbe>,
    throttle: Duration,
}

impl FileMover {
    pub fn new(space: Arc<dyn SpaceProbe>) -> Self {
        Self {
            space,
            throttle: Duration::ZERO,
        }
    }

    /// Sleep inserted after each copied chunk, for rate limiting.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Moves `source` into `dest_dir`, reporting cumulative copied bytes
    /// through `on_progress` after each chunk. Returns the final path.
    pub async fn move_file(
        &self,
        source: &Path,
        dest_dir: &Path,
        controls: &TransferControls,
        mut on_progress: impl FnMut(u64) + Send,
    ) -> Result<PathBuf, TransferError> {
        let meta = fs::metadata(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransferError::NotFound {
                    path: source.to_path_buf(),
                }
            } else {
                TransferError::Io(e)
            }
        })?;
        if !meta.is_file() {
            return Err(TransferError::NotFound {
                path: source.to_path_buf(),
            });
        }
        let size = meta.len();

        if let Some(space) = self.space.space_for(dest_dir) {
            if space.total > 0 && space.usable < size {
                return Err(TransferError::InsufficientSpace {
                    path: dest_dir.to_path_buf(),
                    required: size,
                    available: space.usable,
                });
            }
        }

        let file_name = source
            .file_name()
            .ok_or_else(|| TransferError::Unexpected(format!("source has no file name: {}", source.display())))?
            .to_os_string();
        let mut temp_name = file_name.clone();
        temp_name.push(MOVING_SUFFIX);
        let temp_path = dest_dir.join(&temp_name);

        info!(
            "Copying file (size: {} bytes) {} ==> {}",
            size,
            source.display(),
            temp_path.display()
        );
        if let Err(e) = self
            .copy(source, &temp_path, size, controls, &mut on_progress)
            .await
        {
            debug!("Deleting unfinished file: {}", temp_path.display());
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        debug!("Validating file {}", temp_path.display());
        if let Err(e) = validate(source, &temp_path, size).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        let final_path = dest_dir.join(&file_name);
        debug!(
            "Renaming file {} ==> {}",
            temp_path.display(),
            final_path.display()
        );
        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(TransferError::Io(e));
        }
        if !final_path.exists() {
            return Err(TransferError::Unexpected(format!(
                "destination file not found after rename: {}",
                final_path.display()
            )));
        }

        // Carry the source's modification time over to the new copy.
        match std::fs::metadata(source) {
            Ok(src_meta) => {
                let mtime = FileTime::from_last_modification_time(&src_meta);
                if let Err(e) = filetime::set_file_mtime(&final_path, mtime) {
                    warn!(
                        "Failed to set modification time on {}: {}",
                        final_path.display(),
                        e
                    );
                }
            }
            Err(e) => warn!("Failed to read source metadata: {}", e),
        }

        debug!("Deleting source file {}", source.display());
        let _ = fs::remove_file(source).await;
        if source.exists() {
            return Err(TransferError::Unexpected(format!(
                "cannot delete source file: {}",
                source.display()
            )));
        }

        Ok(final_path)
    }

    async fn copy(
        &self,
        source: &Path,
        temp_path: &Path,
        size: u64,
        controls: &TransferControls,
        on_progress: &mut (impl FnMut(u64) + Send),
    ) -> Result<(), TransferError> {
        let mut reader = File::open(source).await?;
        let mut writer = File::create(temp_path).await?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut copied = 0u64;
        let mut next_logged_pct = PROGRESS_LOG_STEP;

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }

            while controls.is_paused() {
                controls.wait_changed(PAUSE_POLL_INTERVAL).await;
                if controls.is_cancelled() {
                    debug!("Cancelled during paused copy of {}", source.display());
                    return Err(TransferError::Cancelled);
                }
            }

            writer.write_all(&buffer[..n]).await?;
            copied += n as u64;
            on_progress(copied);

            if size > 0 {
                let pct = copied * 100 / size;
                if pct >= next_logged_pct {
                    debug!("Copying file {}: {}%", source.display(), next_logged_pct);
                    next_logged_pct += PROGRESS_LOG_STEP;
                }
            }

            if !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
            if controls.is_cancelled() {
                debug!("Cancelled during copy of {}", source.display());
                return Err(TransferError::Cancelled);
            }
        }

        writer.flush().await?;
        Ok(())
    }
}

/// Compares the copy against the source: sizes must match, then either a
/// full comparison (small files) or 200 evenly spaced 4 KiB windows.
async fn validate(source: &Path, copy: &Path, size: u64) -> Result<(), TransferError> {
    let copy_meta = fs::metadata(copy).await.map_err(|_| {
        TransferError::Unexpected(format!("destination temp file not found: {}", copy.display()))
    })?;
    if copy_meta.len() != size {
        return Err(TransferError::ValidationFailed {
            path: copy.to_path_buf(),
            reason: format!("size mismatch: {} <> {}", copy_meta.len(), size),
        });
    }

    if size <= SAMPLE_WINDOWS * SAMPLE_WINDOW_SIZE {
        // Sampling degenerates at this size; compare everything.
        let a = fs::read(source).await?;
        let b = fs::read(copy).await?;
        if a != b {
            return Err(TransferError::ValidationFailed {
                path: copy.to_path_buf(),
                reason: "content mismatch".to_string(),
            });
        }
        return Ok(());
    }

    sampled_compare(source, copy, size).await
}

/// Compares 200 evenly spaced 4 KiB windows; the last window is clamped so
/// it always fits inside the file.
async fn sampled_compare(source: &Path, copy: &Path, size: u64) -> Result<(), TransferError> {
    let step = size / SAMPLE_WINDOWS;
    let window = SAMPLE_WINDOW_SIZE as usize;

    let mut src = File::open(source).await?;
    let mut dst = File::open(copy).await?;
    let mut src_buf = vec![0u8; window];
    let mut dst_buf = vec![0u8; window];

    let mut pos = 0u64;
    loop {
        let start = pos.min(size - SAMPLE_WINDOW_SIZE);
        src.seek(std::io::SeekFrom::Start(start)).await?;
        dst.seek(std::io::SeekFrom::Start(start)).await?;
        src.read_exact(&mut src_buf).await?;
        dst.read_exact(&mut dst_buf).await?;
        if src_buf != dst_buf {
            return Err(TransferError::ValidationFailed {
                path: copy.to_path_buf(),
                reason: format!("content mismatch near offset {}", start),
            });
        }
        if pos >= size {
            break;
        }
        pos += step;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSpaceProbe;
    use tempfile::TempDir;

    fn mover() -> FileMover {
        FileMover::new(Arc::new(MockSpaceProbe::unlimited()))
    }

    #[tokio::test]
    async fn test_move_file_success() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("plot-1.plot");
        let dest_dir = temp.path().join("dest");
        fs::create_dir_all(&dest_dir).await.unwrap();
        fs::write(&source, b"plot data".repeat(1000)).await.unwrap();

        let mut seen = 0u64;
        let moved = mover()
            .move_file(&source, &dest_dir, &TransferControls::new(), |bytes| {
                seen = bytes;
            })
            .await
            .unwrap();

        assert_eq!(moved, dest_dir.join("plot-1.plot"));
        assert!(moved.exists());
        assert!(!source.exists());
        assert_eq!(seen, 9000);
        assert_eq!(fs::read(&moved).await.unwrap(), b"plot data".repeat(1000));
    }

    #[tokio::test]
    async fn test_move_file_preserves_mtime() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("plot-1.plot");
        let dest_dir = temp.path().join("dest");
        fs::create_dir_all(&dest_dir).await.unwrap();
        fs::write(&source, b"data").await.unwrap();

        let stamp = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, stamp).unwrap();

        let moved = mover()
            .move_file(&source, &dest_dir, &TransferControls::new(), |_| {})
            .await
            .unwrap();

        let meta = std::fs::metadata(&moved).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
    }

    #[tokio::test]
    async fn test_move_file_source_missing() {
        let temp = TempDir::new().unwrap();
        let result = mover()
            .move_file(
                &temp.path().join("absent.plot"),
                temp.path(),
                &TransferControls::new(),
                |_| {},
            )
            .await;
        assert!(matches!(result, Err(TransferError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_move_file_insufficient_space() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("big.plot");
        fs::write(&source, vec![0u8; 4096]).await.unwrap();

        let probe = MockSpaceProbe::unlimited();
        probe.set_default(1_000_000, 100);
        let mover = FileMover::new(Arc::new(probe));

        let result = mover
            .move_file(&source, temp.path(), &TransferControls::new(), |_| {})
            .await;
        assert!(matches!(
            result,
            Err(TransferError::InsufficientSpace { available: 100, .. })
        ));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_cancel_mid_copy_cleans_up() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("plot.plot");
        let dest_dir = temp.path().join("dest");
        fs::create_dir_all(&dest_dir).await.unwrap();
        fs::write(&source, vec![7u8; 64 * 1024]).await.unwrap();

        let controls = TransferControls::new();
        controls.pause();

        let mover = mover();
        let task = {
            let source = source.clone();
            let dest_dir = dest_dir.clone();
            let controls = controls.clone();
            tokio::spawn(async move {
                mover
                    .move_file(&source, &dest_dir, &controls, |_| {})
                    .await
            })
        };

        // Let the copy reach the pause loop, then cancel.
        tokio::time::sleep(Duration::from_millis(120)).await;
        controls.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(source.exists());
        assert!(!dest_dir.join("plot.plot.moving").exists());
        assert!(!dest_dir.join("plot.plot").exists());
    }

    #[tokio::test]
    async fn test_validate_identical_small_files_pass() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"tiny").await.unwrap();
        fs::write(&b, b"tiny").await.unwrap();
        assert!(validate(&a, &b, 4).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_small_file_difference_fails() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"tiny").await.unwrap();
        fs::write(&b, b"tinz").await.unwrap();
        assert!(matches!(
            validate(&a, &b, 4).await,
            Err(TransferError::ValidationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_sampled_detects_single_byte_flip() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        // Larger than 200 * 4 KiB so the sampled path runs.
        let size = (SAMPLE_WINDOWS * SAMPLE_WINDOW_SIZE + 4096) as usize;
        let data = vec![0xabu8; size];
        fs::write(&a, &data).await.unwrap();

        let mut corrupted = data.clone();
        // Inside the first sampled window.
        corrupted[100] ^= 0xff;
        fs::write(&b, &corrupted).await.unwrap();

        assert!(matches!(
            validate(&a, &b, size as u64).await,
            Err(TransferError::ValidationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_sampled_identical_pass() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        let size = (SAMPLE_WINDOWS * SAMPLE_WINDOW_SIZE + 12345) as usize;
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(&a, &data).await.unwrap();
        fs::write(&b, &data).await.unwrap();
        assert!(validate(&a, &b, size as u64).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_size_mismatch() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"12345").await.unwrap();
        fs::write(&b, b"1234").await.unwrap();
        assert!(matches!(
            validate(&a, &b, 5).await,
            Err(TransferError::ValidationFailed { .. })
        ));
    }
}
