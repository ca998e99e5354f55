//! Policy Store
//!
//! Durable storage for the single upload [`Policy`].
//!
//! Readers get the last committed snapshot and only ever wait for a pointer
//! swap, never for validation or disk I/O of a pending write. Writers are
//! serialized process-wide. The file backend replaces the JSON record with an
//! atomic rename on the blocking pool, so a crash mid-write leaves either the old
//! or the new policy.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::policy::{Policy, PolicyDocument, PolicyError};

/// Errors raised by a policy store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The persistence layer failed (I/O, corrupt record)
    #[error("policy store unavailable: {0}")]
    Unavailable(String),

    /// The candidate policy violated an invariant; nothing was written
    #[error(transparent)]
    Validation(#[from] PolicyError),
}

/// Source of truth for the current upload policy
#[async_trait]
pub trait PolicyStore: Send + Sync + std::fmt::Debug {
    /// Current policy (defaults if nothing was ever persisted)
    async fn get(&self) -> Result<Policy, StoreError>;

    /// Validate and persist a new policy, returning what was stored
    async fn set(&self, policy: Policy) -> Result<Policy, StoreError>;
}

/// Policy store holding the committed snapshot in memory, optionally backed
/// by a JSON file
#[derive(Debug, Clone)]
pub struct JsonPolicyStore {
    /// Last committed policy
    current: Arc<RwLock<Arc<Policy>>>,

    /// Serializes writers
    write_lock: Arc<Mutex<()>>,

    /// Backing file (None = memory only)
    path: Option<PathBuf>,
}

impl JsonPolicyStore {
    /// Memory-only store starting from the default policy
    pub fn in_memory() -> Self {
        Self::with_policy(Policy::default())
    }

    /// Memory-only store starting from the given policy
    pub fn with_policy(policy: Policy) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(policy))),
            write_lock: Arc::new(Mutex::new(())),
            path: None,
        }
    }

    /// Open a file-backed store.
    ///
    /// A missing file yields the default policy; the file is only created on
    /// the first successful `set`. A file that exists but cannot be parsed or
    /// fails validation is reported as [`StoreError::Unavailable`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let policy = load_persisted(&path)?.unwrap_or_default();

        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(policy))),
            write_lock: Arc::new(Mutex::new(())),
            path: Some(path),
        })
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl PolicyStore for JsonPolicyStore {
    async fn get(&self) -> Result<Policy, StoreError> {
        let snapshot = self.current.read().await.clone();
        Ok((*snapshot).clone())
    }

    async fn set(&self, policy: Policy) -> Result<Policy, StoreError> {
        let _writer = self.write_lock.lock().await;

        policy.validate()?;

        if let Some(path) = &self.path {
            let path = path.clone();
            let record = policy.clone();
            tokio::task::spawn_blocking(move || write_atomic(&path, &record))
                .await
                .map_err(|e| StoreError::Unavailable(format!("policy write task failed: {}", e)))??;
        }

        *self.current.write().await = Arc::new(policy.clone());
        info!(
            per_minute = policy.max_uploads_per_minute,
            per_hour = policy.max_uploads_per_hour,
            max_file_size_bytes = policy.max_file_size_bytes,
            cooldown_secs = policy.cooldown_seconds,
            blocked = policy.blocked_extensions.len(),
            "Upload policy updated"
        );

        Ok(policy)
    }
}

/// Read a persisted policy record, `None` if the file does not exist
pub fn load_persisted(path: &Path) -> Result<Option<Policy>, StoreError> {
    if !path.exists() {
        debug!("No persisted policy at {:?}, using defaults", path);
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| StoreError::Unavailable(format!("failed to read {:?}: {}", path, e)))?;
    let document: PolicyDocument = serde_json::from_str(&content)
        .map_err(|e| StoreError::Unavailable(format!("failed to parse {:?}: {}", path, e)))?;
    let policy = document
        .into_policy()
        .map_err(|e| StoreError::Unavailable(format!("persisted policy is invalid: {}", e)))?;

    debug!("Loaded persisted policy from {:?}", path);
    Ok(Some(policy))
}

/// Replace the policy file in one rename
fn write_atomic(path: &Path, policy: &Policy) -> Result<(), StoreError> {
    let unavailable = |e: &dyn std::fmt::Display| {
        StoreError::Unavailable(format!("failed to write {:?}: {}", path, e))
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| unavailable(&e))?;

    let json = serde_json::to_vec_pretty(&PolicyDocument::from(policy)).map_err(|e| unavailable(&e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| unavailable(&e))?;
    tmp.write_all(&json).map_err(|e| unavailable(&e))?;
    tmp.as_file().sync_all().map_err(|e| unavailable(&e))?;
    tmp.persist(path).map_err(|e| unavailable(&e.error))?;

    Ok(())
}
