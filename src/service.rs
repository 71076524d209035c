use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::Authorizer;
use crate::error::TrackError;
use crate::store::TrackStore;
use crate::track::Track;

/// Response of an upload: the stored track plus the post-upload listing.
#[derive(Debug, Serialize)]
pub struct UploadOutcome {
    #[serde(flatten)]
    pub track: Track,
    pub tracks: Vec<String>,
}

/// Response of a single delete.
#[derive(Debug, Serialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub tracks: Vec<String>,
}

/// Response of a bulk delete. A non-zero `failed` is a partial failure, not an
/// error. `tracks` is left out when the store could not be listed afterwards.
#[derive(Debug, Serialize)]
pub struct DeleteAllOutcome {
    pub deleted: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<String>>,
}

impl DeleteAllOutcome {
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Upload, list and delete over a [`TrackStore`].
///
/// Destructive operations ask the [`Authorizer`] first. Every mutation returns
/// the listing taken right after it, so callers never need a separate refresh.
#[derive(Clone)]
pub struct TrackService {
    store: TrackStore,
    authorizer: Arc<dyn Authorizer>,
}

impl TrackService {
    pub fn new(store: TrackStore, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { store, authorizer }
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    /// Stores an uploaded file under its original name. Same-name uploads
    /// overwrite each other; the last complete write wins.
    pub async fn upload(&self, contents: &[u8], original_name: &str) -> Result<UploadOutcome, TrackError> {
        let name = base_name(original_name);
        if name.is_empty() {
            return Err(TrackError::BadRequest("No file uploaded".to_string()));
        }
        if !self.store.has_track_extension(name) {
            return Err(TrackError::BadRequest(format!(
                "Only .{} files are accepted",
                self.store.extension()
            )));
        }

        self.store.write(name, contents).await?;
        info!("Uploaded {} ({} bytes)", name, contents.len());

        Ok(UploadOutcome {
            track: Track::from_name(name),
            tracks: self.store.list().await?,
        })
    }

    pub async fn list(&self) -> Result<Vec<Track>, TrackError> {
        Ok(self.store.list().await?.into_iter().map(Track::from_name).collect())
    }

    pub async fn delete_one(&self, name: &str, secret: Option<&str>) -> Result<DeleteOutcome, TrackError> {
        // Checked before the store is touched so a bad secret learns nothing.
        if !self.authorizer.authorize(secret) {
            warn!("Rejected delete of {}: bad secret", name);
            return Err(TrackError::Unauthorized);
        }

        self.store.remove(name).await?;
        info!("Deleted {}", name);

        Ok(DeleteOutcome {
            success: true,
            tracks: self.store.list().await?,
        })
    }

    /// Removes every stored track. Each removal stands alone: failures are
    /// counted, never propagated.
    pub async fn delete_all(&self, secret: Option<&str>) -> Result<DeleteAllOutcome, TrackError> {
        if !self.authorizer.authorize(secret) {
            warn!("Rejected delete-all: bad secret");
            return Err(TrackError::Unauthorized);
        }

        let names = self.store.list().await?;
        let (deleted, failed) = self.remove_each(&names).await;
        info!("Delete-all finished: {} deleted, {} failed", deleted, failed);

        Ok(DeleteAllOutcome {
            deleted,
            failed,
            tracks: self.listing_after_mutation().await,
        })
    }

    async fn remove_each(&self, names: &[String]) -> (usize, usize) {
        let results = join_all(names.iter().map(|name| self.store.remove(name))).await;

        let mut deleted = 0;
        let mut failed = 0;
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!("Failed to delete {}: {}", name, e);
                    failed += 1;
                }
            }
        }
        (deleted, failed)
    }

    // The removals already happened; a failed relisting must not hide the counts.
    async fn listing_after_mutation(&self) -> Option<Vec<String>> {
        match self.store.list().await {
            Ok(names) => Some(names),
            Err(e) => {
                error!("Could not list tracks after delete-all: {}", e);
                None
            }
        }
    }

    pub async fn open_track(&self, name: &str) -> Result<(tokio::fs::File, u64), TrackError> {
        self.store.open_track(name).await
    }
}

/// Strips any directory prefix a browser may send along with the file name.
fn base_name(original: &str) -> &str {
    original
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim()
}
