use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::codec::{self, SWAP_FILE_HEADER_LEN, SwapFileHeader};
use super::{SwapLocation, SwapManager};
use crate::accounting::QueueSize;
use crate::config::FlowFileId;
use crate::error::{QueueError, QueueResult};
use crate::flowfile::FlowFileRecord;

const SWAP_FILE_EXTENSION: &str = "swap";
const PARTIAL_SUFFIX: &str = ".partial";

/// File-backed [`SwapManager`].
///
/// Each batch becomes one file under `<root>/<queue id>/`, named with a
/// zero-padded sequence number so a plain sorted directory listing yields
/// the original swap-out order. Files are written to a `.partial` sibling,
/// fsynced, and renamed into place, so a batch either exists completely or
/// not at all; the sequence counter is reseeded from surviving file names
/// at construction.
pub struct FileSwapManager {
    root: PathBuf,
    sequence: AtomicU64,
}

impl FileSwapManager {
    pub fn new(root: impl Into<PathBuf>) -> QueueResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let next_sequence = max_existing_sequence(&root)?.map_or(0, |max| max + 1);
        debug!(
            root = %root.display(),
            next_sequence,
            "initialized file swap manager"
        );
        Ok(Self {
            root,
            sequence: AtomicU64::new(next_sequence),
        })
    }

    fn queue_dir(&self, queue_identifier: &str) -> PathBuf {
        self.root.join(sanitize_identifier(queue_identifier))
    }
}

impl SwapManager for FileSwapManager {
    fn swap_out(
        &self,
        records: &[Arc<FlowFileRecord>],
        queue_identifier: &str,
    ) -> QueueResult<SwapLocation> {
        let dir = self.queue_dir(queue_identifier);
        fs::create_dir_all(&dir)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{sequence:020}.{SWAP_FILE_EXTENSION}");
        let final_path = dir.join(&file_name);
        let partial_path = dir.join(format!("{file_name}{PARTIAL_SUFFIX}"));

        let image = codec::encode_batch(records);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)?;
        file.write_all(&image)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&partial_path, &final_path)?;
        sync_dir(&dir)?;

        debug!(
            queue = queue_identifier,
            location = %final_path.display(),
            records = records.len(),
            "wrote swap file"
        );
        Ok(SwapLocation::new(final_path.to_string_lossy().into_owned()))
    }

    fn swap_in(
        &self,
        location: &SwapLocation,
        queue_identifier: &str,
    ) -> QueueResult<Vec<Arc<FlowFileRecord>>> {
        let path = Path::new(location.as_str());
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(QueueError::SwapFileNotFound(location.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let records = codec::decode_batch(&bytes)?;
        if let Err(err) = fs::remove_file(path) {
            warn!(
                location = %location,
                error = %err,
                "failed to remove consumed swap file"
            );
        }
        debug!(
            queue = queue_identifier,
            location = %location,
            records = records.len(),
            "read swap file"
        );
        Ok(records)
    }

    fn swap_size(&self, location: &SwapLocation) -> QueueResult<QueueSize> {
        let header = read_header(location)?;
        Ok(QueueSize::new(
            header.record_count as u64,
            header.total_bytes,
        ))
    }

    fn max_record_id(&self, location: &SwapLocation) -> QueueResult<Option<FlowFileId>> {
        Ok(read_header(location)?.max_flowfile_id())
    }

    fn recover_swap_locations(&self, queue_identifier: &str) -> QueueResult<Vec<SwapLocation>> {
        let dir = self.queue_dir(queue_identifier);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let name = match path.file_name().and_then(|name| name.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                // An interrupted swap-out; the batch never became visible.
                warn!(path = %path.display(), "removing stale partial swap file");
                let _ = fs::remove_file(&path);
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) == Some(SWAP_FILE_EXTENSION) {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths
            .into_iter()
            .map(|path| SwapLocation::new(path.to_string_lossy().into_owned()))
            .collect())
    }

    fn purge(&self) {
        let queue_dirs = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(root = %self.root.display(), error = %err, "failed to list swap root for purge");
                return;
            }
        };

        for queue_dir in queue_dirs.flatten() {
            let dir_path = queue_dir.path();
            if !dir_path.is_dir() {
                continue;
            }
            let files = match fs::read_dir(&dir_path) {
                Ok(files) => files,
                Err(err) => {
                    warn!(dir = %dir_path.display(), error = %err, "failed to list swap directory for purge");
                    continue;
                }
            };
            for file in files.flatten() {
                let path = file.path();
                let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
                if name.ends_with(PARTIAL_SUFFIX)
                    || path.extension().and_then(|ext| ext.to_str()) == Some(SWAP_FILE_EXTENSION)
                {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %err, "failed to purge swap file");
                    }
                }
            }
        }
        debug!(root = %self.root.display(), "purged swap files");
    }
}

fn read_header(location: &SwapLocation) -> QueueResult<SwapFileHeader> {
    let path = Path::new(location.as_str());
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(QueueError::SwapFileNotFound(location.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    let mut header_bytes = [0_u8; SWAP_FILE_HEADER_LEN];
    file.read_exact(&mut header_bytes)
        .map_err(|_| QueueError::corrupt("swap file header truncated"))?;
    SwapFileHeader::read_from(&header_bytes)
}

fn max_existing_sequence(root: &Path) -> QueueResult<Option<u64>> {
    let mut max = None;
    let queue_dirs = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    for queue_dir in queue_dirs.flatten() {
        let dir_path = queue_dir.path();
        if !dir_path.is_dir() {
            continue;
        }
        for file in fs::read_dir(&dir_path)?.flatten() {
            let path = file.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SWAP_FILE_EXTENSION) {
                continue;
            }
            let sequence = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok());
            if let Some(sequence) = sequence {
                max = Some(max.map_or(sequence, |current: u64| current.max(sequence)));
            }
        }
    }
    Ok(max)
}

fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    // Make the rename durable; without this a crash can forget the file.
    File::open(dir)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowfile::{ContentClaim, ResourceClaim};
    use tempfile::TempDir;

    fn record(id: u64, size: u64) -> Arc<FlowFileRecord> {
        Arc::new(
            FlowFileRecord::builder(FlowFileId::new(id))
                .size(size)
                .attribute("uuid", format!("uuid-{id}"))
                .build(),
        )
    }

    fn claimed_record(id: u64, size: u64) -> Arc<FlowFileRecord> {
        let claim = ContentClaim::new(Arc::new(ResourceClaim::new("default", "1", "rc-1")), 0);
        Arc::new(
            FlowFileRecord::builder(FlowFileId::new(id))
                .size(size)
                .content_claim(claim, 0)
                .build(),
        )
    }

    #[test]
    fn swap_out_and_in_round_trips() {
        let dir = TempDir::new().expect("tempdir");
        let manager = FileSwapManager::new(dir.path()).expect("manager");
        let records = vec![record(1, 10), claimed_record(2, 20), record(3, 30)];

        let location = manager.swap_out(&records, "queue-1").expect("swap out");
        assert_eq!(
            manager.swap_size(&location).expect("size"),
            QueueSize::new(3, 60)
        );
        assert_eq!(
            manager.max_record_id(&location).expect("max id"),
            Some(FlowFileId::new(3))
        );

        let restored = manager.swap_in(&location, "queue-1").expect("swap in");
        assert_eq!(restored.len(), 3);
        assert_eq!(*restored[1], *records[1]);

        // The location is consumed.
        assert!(matches!(
            manager.swap_in(&location, "queue-1"),
            Err(QueueError::SwapFileNotFound(_))
        ));
    }

    #[test]
    fn recovery_lists_locations_in_write_order() {
        let dir = TempDir::new().expect("tempdir");
        let manager = FileSwapManager::new(dir.path()).expect("manager");

        let first = manager.swap_out(&[record(1, 1)], "queue-1").expect("swap out");
        let second = manager.swap_out(&[record(2, 1)], "queue-1").expect("swap out");
        let third = manager.swap_out(&[record(3, 1)], "queue-1").expect("swap out");

        let recovered = manager.recover_swap_locations("queue-1").expect("recover");
        assert_eq!(recovered, vec![first, second, third]);
        assert!(manager
            .recover_swap_locations("other-queue")
            .expect("recover")
            .is_empty());
    }

    #[test]
    fn sequence_resumes_after_restart() {
        let dir = TempDir::new().expect("tempdir");
        let manager = FileSwapManager::new(dir.path()).expect("manager");
        let first = manager.swap_out(&[record(1, 1)], "queue-1").expect("swap out");

        let restarted = FileSwapManager::new(dir.path()).expect("manager");
        let second = restarted.swap_out(&[record(2, 1)], "queue-1").expect("swap out");

        let recovered = restarted.recover_swap_locations("queue-1").expect("recover");
        assert_eq!(recovered, vec![first, second]);
    }

    #[test]
    fn corrupt_file_is_detected_and_retained() {
        let dir = TempDir::new().expect("tempdir");
        let manager = FileSwapManager::new(dir.path()).expect("manager");
        let location = manager
            .swap_out(&[record(1, 10), record(2, 20)], "queue-1")
            .expect("swap out");

        let path = PathBuf::from(location.as_str());
        let mut bytes = fs::read(&path).expect("read");
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        fs::write(&path, &bytes).expect("write");

        assert!(matches!(
            manager.swap_in(&location, "queue-1"),
            Err(QueueError::SwapFileCorrupt(_))
        ));
        // A failed swap-in must not consume the file.
        assert!(path.exists());
    }

    #[test]
    fn stale_partials_are_cleaned_during_recovery() {
        let dir = TempDir::new().expect("tempdir");
        let manager = FileSwapManager::new(dir.path()).expect("manager");
        let location = manager.swap_out(&[record(1, 1)], "queue-1").expect("swap out");

        let queue_dir = PathBuf::from(location.as_str())
            .parent()
            .expect("queue dir")
            .to_path_buf();
        let stale = queue_dir.join(format!("99999.{SWAP_FILE_EXTENSION}{PARTIAL_SUFFIX}"));
        fs::write(&stale, b"half a batch").expect("write partial");

        let recovered = manager.recover_swap_locations("queue-1").expect("recover");
        assert_eq!(recovered, vec![location]);
        assert!(!stale.exists());
    }

    #[test]
    fn purge_removes_everything() {
        let dir = TempDir::new().expect("tempdir");
        let manager = FileSwapManager::new(dir.path()).expect("manager");
        manager.swap_out(&[record(1, 1)], "queue-1").expect("swap out");
        manager.swap_out(&[record(2, 1)], "queue-2").expect("swap out");

        manager.purge();

        assert!(manager
            .recover_swap_locations("queue-1")
            .expect("recover")
            .is_empty());
        assert!(manager
            .recover_swap_locations("queue-2")
            .expect("recover")
            .is_empty());
    }
}
