//! Media store
//!
//! Caches attachments by id and tracks upload progress under temporary
//! `upload_<uuid>` keys, since the server id is only known once the upload
//! finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;

use super::Observable;
use crate::client::GoToSocialClient;
use crate::error::Result;
use crate::types::{MediaAttachment, MediaParams, MediaUpload};

/// How long a finished upload keeps its progress entry
pub const PROGRESS_RETENTION: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaState {
    pub media_map_by_id: HashMap<String, MediaAttachment>,
    /// Percent complete (0-100) per upload key
    pub upload_progress: HashMap<String, u8>,
}

struct Inner {
    client: Arc<GoToSocialClient>,
    state: Observable<MediaState>,
    retention: Duration,
    next_generation: AtomicU64,
    /// Upload generation that currently owns each progress key
    generations: Mutex<HashMap<String, u64>>,
}

#[derive(Clone)]
pub struct MediaStore {
    inner: Arc<Inner>,
}

impl MediaStore {
    pub fn new(client: Arc<GoToSocialClient>) -> Self {
        Self::with_progress_retention(client, PROGRESS_RETENTION)
    }

    pub fn with_progress_retention(client: Arc<GoToSocialClient>, retention: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                state: Observable::default(),
                retention,
                next_generation: AtomicU64::new(0),
                generations: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state(&self) -> Arc<MediaState> {
        self.inner.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MediaState>> {
        self.inner.state.subscribe()
    }

    /// A fresh key for [`upload_media_as`](Self::upload_media_as).
    pub fn new_upload_key() -> String {
        format!("upload_{}", uuid::Uuid::new_v4())
    }

    pub async fn upload_media(&self, upload: &MediaUpload, params: &MediaParams) -> Result<MediaAttachment> {
        self.upload_media_as(&Self::new_upload_key(), upload, params)
            .await
    }

    /// Upload `upload`, reporting progress under `key`.
    ///
    /// The entry reads 0 while the upload runs and 100 once it succeeded,
    /// then disappears after the retention delay. A failed upload removes
    /// it at once. Reusing a key hands the entry to the newest upload;
    /// cleanup from an earlier upload leaves it alone.
    pub async fn upload_media_as(
        &self,
        key: &str,
        upload: &MediaUpload,
        params: &MediaParams,
    ) -> Result<MediaAttachment> {
        let api = self.inner.client.client()?;
        let generation = self.inner.begin_progress(key);

        let media = match api.upload_media(upload, params).await {
            Ok(media) => media,
            Err(e) => {
                tracing::warn!(upload = %key, error = %e, "Media upload failed");
                self.inner.clear_progress(key, generation);
                return Err(e);
            }
        };

        self.inner.finish_progress(key, generation, &media);
        self.schedule_cleanup(key, generation);

        tracing::info!(media_id = %media.id, kind = ?media.kind, "Uploaded media");
        Ok(media)
    }

    fn schedule_cleanup(&self, key: &str, generation: u64) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let retention = self.inner.retention;
        let key = key.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(inner) = inner.upgrade() {
                inner.clear_progress(&key, generation);
            }
        });
    }

    pub async fn update_media(&self, id: &str, params: &MediaParams) -> Result<MediaAttachment> {
        let media = self.inner.client.client()?.update_media(id, params).await?;
        self.inner.store(id, &media);
        Ok(media)
    }

    /// Cached attachment, fetched from the server on a miss.
    pub async fn get_media(&self, id: &str) -> Result<MediaAttachment> {
        if let Some(media) = self.inner.state.get().media_map_by_id.get(id) {
            return Ok(media.clone());
        }

        let media = self.inner.client.client()?.fetch_media(id).await?;
        self.inner.store(id, &media);
        Ok(media)
    }

    /// Progress of the upload under `key`; 0 when unknown.
    pub fn upload_progress(&self, key: &str) -> u8 {
        self.inner
            .state
            .get()
            .upload_progress
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl Inner {
    /// Claim `key` for a new upload at 0%.
    fn begin_progress(&self, key: &str) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut generations = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        generations.insert(key.to_string(), generation);
        self.state.update(|state| {
            state.upload_progress.insert(key.to_string(), 0);
        });
        generation
    }

    /// Cache `media` and mark `key` complete if `generation` still owns it.
    fn finish_progress(&self, key: &str, generation: u64, media: &MediaAttachment) {
        let generations = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = generations.get(key) == Some(&generation);
        let stored = media.clone();
        self.state.update(|state| {
            if owned {
                state.upload_progress.insert(key.to_string(), 100);
            }
            state.media_map_by_id.insert(stored.id.clone(), stored);
        });
    }

    fn clear_progress(&self, key: &str, generation: u64) {
        let mut generations = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        if generations.get(key) != Some(&generation) {
            return;
        }
        generations.remove(key);
        self.state
            .update_if(|state| state.upload_progress.remove(key).is_some());
    }

    fn store(&self, id: &str, media: &MediaAttachment) {
        let media = media.clone();
        self.state.update(|state| {
            state.media_map_by_id.insert(id.to_string(), media);
        });
    }
}
