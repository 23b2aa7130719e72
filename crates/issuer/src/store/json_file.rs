//! Domain records persisted as a single JSON document
//!
//! The document maps user id to domain name to record:
//!
//! ```json
//! { "alice": { "foo.example": { "domain_name": "foo.example", ... } } }
//! ```
//!
//! Nothing is cached between calls. Reads take a shared advisory lock on a
//! `.lock` file next to the document; writes take an exclusive one and
//! re-read the document before applying their change, so several handles
//! or processes sharing one file never drop each other's records. A write
//! goes through a uniquely named temporary file and a rename, so a crash
//! mid-write leaves the previous version in place.

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

use dnsproof_common::{DomainRecord, RecordKey, UserId};

use super::{DomainStore, StoreError, StoreResult};

type Document = BTreeMap<UserId, BTreeMap<String, DomainRecord>>;

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// `path` with `suffix` appended to its file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[derive(Debug)]
struct DocumentFile {
    path: PathBuf,
    lock_path: PathBuf,
}

impl DocumentFile {
    fn lock(&self, mode: LockMode) -> StoreResult<File> {
        let io_err = |e| StoreError::io(self.lock_path.display().to_string(), e);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(io_err)?;
        match mode {
            LockMode::Shared => FileExt::lock_shared(&file),
            LockMode::Exclusive => FileExt::lock_exclusive(&file),
        }
        .map_err(io_err)?;

        // released when the handle is dropped
        Ok(file)
    }

    fn read_unlocked(&self) -> StoreResult<Document> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Document::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(StoreError::io(self.path.display().to_string(), e)),
        }
    }

    fn write_unlocked(&self, document: &Document) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(document)?;
        let tmp = sibling(
            &self.path,
            &format!(".{}.{:016x}.tmp", std::process::id(), rand::random::<u64>()),
        );

        if let Err(e) = write_synced(&tmp, &json) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(tmp.display().to_string(), e));
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(self.path.display().to_string(), e));
        }

        trace!(path = %self.path.display(), bytes = json.len(), "Record file rewritten");
        Ok(())
    }

    fn read(&self) -> StoreResult<Document> {
        let _lock = self.lock(LockMode::Shared)?;
        self.read_unlocked()
    }

    /// Apply `change` to the current document under the exclusive lock.
    ///
    /// `change` reports whether it modified the document; untouched
    /// documents are not rewritten.
    fn update<T>(&self, change: impl FnOnce(&mut Document) -> (T, bool)) -> StoreResult<T> {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut document = self.read_unlocked()?;
        let (out, changed) = change(&mut document);
        if changed {
            self.write_unlocked(&document)?;
        }
        Ok(out)
    }
}

/// File-backed [`DomainStore`].
#[derive(Debug)]
pub struct JsonFileDomainStore {
    file: Arc<DocumentFile>,
}

impl JsonFileDomainStore {
    /// Open the store, starting empty if the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }
        if !tokio::fs::try_exists(&path).await.unwrap_or(true) {
            info!(path = %path.display(), "Record file not found, starting empty");
        }

        let store = Self {
            file: Arc::new(DocumentFile {
                lock_path: sibling(&path, ".lock"),
                path,
            }),
        };

        // surface a corrupt document now rather than on first use
        let document = store.blocking(|file| file.read()).await?;
        debug!(
            path = %store.path().display(),
            users = document.len(),
            "Loaded domain records"
        );

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DocumentFile) -> StoreResult<T> + Send + 'static,
    {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || op(&file))
            .await
            .map_err(|e| StoreError::Backend(format!("record file task failed: {}", e)))?
    }
}

#[async_trait]
impl DomainStore for JsonFileDomainStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<DomainRecord>> {
        let key = key.clone();
        self.blocking(move |file| {
            let mut document = file.read()?;
            Ok(document
                .get_mut(&key.user_id)
                .and_then(|domains| domains.remove(&key.domain)))
        })
        .await
    }

    async fn put(&self, record: &DomainRecord) -> StoreResult<()> {
        let record = record.clone();
        self.blocking(move |file| {
            file.update(|document| {
                document
                    .entry(record.user_id().clone())
                    .or_default()
                    .insert(record.domain_name().to_string(), record);
                ((), true)
            })
        })
        .await
    }

    async fn delete(&self, key: &RecordKey) -> StoreResult<bool> {
        let key = key.clone();
        self.blocking(move |file| {
            file.update(|document| {
                let Some(domains) = document.get_mut(&key.user_id) else {
                    return (false, false);
                };
                if domains.remove(&key.domain).is_none() {
                    return (false, false);
                }
                if domains.is_empty() {
                    document.remove(&key.user_id);
                }
                (true, true)
            })
        })
        .await
    }

    async fn list_all(&self) -> StoreResult<Vec<DomainRecord>> {
        self.blocking(|file| {
            Ok(file
                .read()?
                .into_values()
                .flat_map(BTreeMap::into_values)
                .collect())
        })
        .await
    }
}
