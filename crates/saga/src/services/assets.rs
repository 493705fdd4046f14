//! Binary asset storage for vehicle photos and verification documents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::error::{Result, SagaError};

/// A file to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AssetUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// Which files an upload accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRules {
    pub max_bytes: usize,
    pub content_types: Vec<&'static str>,
}

impl AssetRules {
    const MAX_BYTES: usize = 2 * 1024 * 1024;

    /// Vehicle photos: JPEG or PNG up to 2 MiB.
    pub fn images() -> Self {
        Self {
            max_bytes: Self::MAX_BYTES,
            content_types: vec!["image/jpeg", "image/png"],
        }
    }

    /// Verification documents: images or PDF up to 2 MiB.
    pub fn documents() -> Self {
        Self {
            max_bytes: Self::MAX_BYTES,
            content_types: vec!["image/jpeg", "image/png", "application/pdf"],
        }
    }

    pub fn check(&self, upload: &AssetUpload) -> Result<()> {
        if !self.content_types.contains(&upload.content_type.as_str()) {
            return Err(SagaError::Validation(format!(
                "{}: unsupported content type {}",
                upload.file_name, upload.content_type
            )));
        }
        if upload.bytes.is_empty() || upload.bytes.len() > self.max_bytes {
            return Err(SagaError::Validation(format!(
                "{}: size must be between 1 and {} bytes",
                upload.file_name, self.max_bytes
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Stores a file under `prefix`. Returns its key.
    async fn upload(&self, prefix: &str, upload: &AssetUpload) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Uploads files in parallel.
///
/// If any upload fails, the ones that succeeded are deleted before the
/// first error is returned.
pub async fn upload_all(
    store: &dyn AssetStore,
    prefix: &str,
    uploads: &[AssetUpload],
) -> Result<Vec<String>> {
    let results = join_all(uploads.iter().map(|u| store.upload(prefix, u))).await;

    let mut keys = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(key) => keys.push(key),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        None => Ok(keys),
        Some(e) => {
            if let Err(cleanup) = delete_all(store, &keys).await {
                tracing::warn!(error = %cleanup, "orphaned_assets");
            }
            Err(e)
        }
    }
}

/// Deletes files in parallel. Every key is attempted; failures are
/// reported together.
pub async fn delete_all(store: &dyn AssetStore, keys: &[String]) -> Result<()> {
    let results = join_all(keys.iter().map(|k| store.delete(k))).await;
    let failed: Vec<String> = keys
        .iter()
        .zip(results)
        .filter_map(|(key, result)| result.err().map(|e| format!("{key}: {e}")))
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(SagaError::Assets(failed.join("; ")))
    }
}

#[derive(Debug, Default)]
struct InMemoryAssetState {
    objects: HashMap<String, (String, usize)>,
    next_id: u32,
    fail_upload_of: Option<String>,
    fail_on_delete: bool,
}

/// In-memory asset store for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssetStore {
    state: Arc<Mutex<InMemoryAssetState>>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryAssetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes uploads of the named file fail.
    pub fn set_fail_upload_of(&self, file_name: Option<&str>) {
        self.lock().fail_upload_of = file_name.map(str::to_string);
    }

    pub fn set_fail_on_delete(&self, fail: bool) {
        self.lock().fail_on_delete = fail;
    }

    pub fn asset_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn has_asset(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn upload(&self, prefix: &str, upload: &AssetUpload) -> Result<String> {
        let mut state = self.lock();
        if state.fail_upload_of.as_deref() == Some(upload.file_name.as_str()) {
            return Err(SagaError::Assets(format!(
                "upload of {} failed",
                upload.file_name
            )));
        }

        state.next_id += 1;
        let key = format!("{prefix}/{:04}-{}", state.next_id, upload.file_name);
        state.objects.insert(
            key.clone(),
            (upload.content_type.clone(), upload.bytes.len()),
        );
        Ok(key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.lock();
        if state.fail_on_delete {
            return Err(SagaError::Assets(format!("delete of {key} failed")));
        }
        state.objects.remove(key);
        Ok(())
    }
}
