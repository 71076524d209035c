use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::TrackError;

// Uploads land here first and are renamed into place once fully written.
const TEMP_PREFIX: &str = ".upload-";
const TEMP_SUFFIX: &str = ".part";

/// Directory of uploaded audio files.
///
/// There is no index: every listing is a fresh directory scan, so the
/// filesystem is the only source of truth for which tracks exist.
#[derive(Clone, Debug)]
pub struct TrackStore {
    dir: PathBuf,
    extension: String,
}

impl TrackStore {
    /// Opens (creating if needed) the store directory and sweeps temp files
    /// left behind by an interrupted process.
    pub async fn open(dir: impl Into<PathBuf>, extension: &str) -> Result<Self, TrackError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let store = Self {
            dir,
            extension: extension.trim().trim_start_matches('.').to_ascii_lowercase(),
        };
        store.sweep_partial_uploads().await?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// True if `name` carries the supported extension (case-insensitive).
    pub fn has_track_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Maps a track name to its path, or `None` if the name can never refer
    /// to a stored track.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if is_plain_file_name(name) && !is_temp_name(name) && self.has_track_extension(name) {
            Some(self.dir.join(name))
        } else {
            None
        }
    }

    /// Names of all stored tracks, sorted by name.
    pub async fn list(&self) -> Result<Vec<String>, TrackError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    debug!("Skipping non UTF-8 file name {:?}", raw);
                    continue;
                }
            };
            if is_temp_name(&name) || !self.has_track_extension(&name) {
                continue;
            }
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => names.push(name),
                Ok(_) => {}
                Err(e) => warn!("Could not stat {}: {}", name, e),
            }
        }

        // read_dir order is platform dependent
        names.sort();
        Ok(names)
    }

    /// Stores `contents` under `name`, replacing any existing track.
    ///
    /// The bytes go to a hidden temp file which is renamed into place, so a
    /// half-written track is never listed or served. The temp file is removed
    /// on failure.
    pub async fn write(&self, name: &str, contents: &[u8]) -> Result<PathBuf, TrackError> {
        let target = self
            .resolve(name)
            .ok_or_else(|| TrackError::BadRequest(format!("Invalid track name: {}", name)))?;
        let temp = self.dir.join(format!(
            "{}{:016x}{}",
            TEMP_PREFIX,
            rand::thread_rng().gen::<u64>(),
            TEMP_SUFFIX
        ));

        if let Err(e) = write_then_rename(&temp, &target, contents).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove temp upload {}: {}", temp.display(), cleanup);
                }
            }
            return Err(e.into());
        }

        debug!("Stored {} ({} bytes)", name, contents.len());
        Ok(target)
    }

    /// Removes one track.
    pub async fn remove(&self, name: &str) -> Result<(), TrackError> {
        let path = self
            .resolve(name)
            .ok_or_else(|| TrackError::NotFound(name.to_string()))?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TrackError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Opens a track for reading, returning the handle and its length.
    pub async fn open_track(&self, name: &str) -> Result<(fs::File, u64), TrackError> {
        let path = self
            .resolve(name)
            .ok_or_else(|| TrackError::NotFound(name.to_string()))?;
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TrackError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(TrackError::NotFound(name.to_string()));
        }
        Ok((file, meta.len()))
    }

    async fn sweep_partial_uploads(&self) -> Result<(), TrackError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut swept = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let is_temp = entry.file_name().to_str().map(is_temp_name).unwrap_or(false);
            if !is_temp {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => swept += 1,
                Err(e) => warn!("Could not remove stale upload {}: {}", entry.path().display(), e),
            }
        }
        if swept > 0 {
            info!("Removed {} interrupted upload(s) from {}", swept, self.dir.display());
        }
        Ok(())
    }
}

async fn write_then_rename(temp: &Path, target: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp)
        .await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp, target).await
}

/// A single path component that cannot escape the store directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|c| matches!(c, '/' | '\\' | '\0'))
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    fn leftover_temps(dir: &Path) -> Vec<String> {
        stdfs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| is_temp_name(n))
            .collect()
    }

    #[test]
    fn plain_names_reject_traversal() {
        assert!(is_plain_file_name("song.mp3"));
        assert!(is_plain_file_name(".hidden.mp3"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../song.mp3"));
        assert!(!is_plain_file_name("a/b.mp3"));
        assert!(!is_plain_file_name("a\\b.mp3"));
    }

    #[tokio::test]
    async fn list_filters_extension_and_sorts() {
        let dir = tempdir().unwrap();
        stdfs::write(dir.path().join("b.mp3"), b"b").unwrap();
        stdfs::write(dir.path().join("A.MP3"), b"a").unwrap();
        stdfs::write(dir.path().join("notes.txt"), b"ignore").unwrap();
        stdfs::create_dir(dir.path().join("folder.mp3")).unwrap();

        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["A.MP3", "b.mp3"]);
    }

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let dir = tempdir().unwrap();
        let store = TrackStore::open(dir.path(), ".mp3").await.unwrap();
        assert_eq!(store.extension(), "mp3");
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_fails_when_directory_is_gone() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tracks");
        let store = TrackStore::open(&root, "mp3").await.unwrap();
        stdfs::remove_dir_all(&root).unwrap();

        assert!(matches!(store.list().await, Err(TrackError::StoreIo(_))));
    }

    #[tokio::test]
    async fn write_overwrites_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();

        store.write("song.mp3", b"first").await.unwrap();
        store.write("song.mp3", b"second").await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["song.mp3"]);
        assert_eq!(stdfs::read(dir.path().join("song.mp3")).unwrap(), b"second");
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn failed_write_reports_io_error() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("tracks");
        let store = TrackStore::open(&root, "mp3").await.unwrap();
        stdfs::remove_dir_all(&root).unwrap();

        let err = store.write("song.mp3", b"data").await.unwrap_err();
        assert!(matches!(err, TrackError::StoreIo(_)));
    }

    #[tokio::test]
    async fn failed_rename_removes_the_temp_file() {
        let dir = tempdir().unwrap();
        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();
        // The temp file gets written, then the rename onto a directory fails.
        stdfs::create_dir(dir.path().join("song.mp3")).unwrap();

        let err = store.write("song.mp3", b"data").await.unwrap_err();
        assert!(matches!(err, TrackError::StoreIo(_)));
        assert!(leftover_temps(dir.path()).is_empty());
        assert!(dir.path().join("song.mp3").is_dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_same_name_writes_leave_one_whole_file() {
        let dir = tempdir().unwrap();
        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();
        let first = vec![0xAAu8; 4 * 1024 * 1024];
        let second = vec![0x55u8; 4 * 1024 * 1024];

        let (a, b) = tokio::join!(store.write("song.mp3", &first), store.write("song.mp3", &second));
        a.unwrap();
        b.unwrap();

        let stored = stdfs::read(dir.path().join("song.mp3")).unwrap();
        assert!(stored == first || stored == second);
        assert!(leftover_temps(dir.path()).is_empty());
        assert_eq!(store.list().await.unwrap(), vec!["song.mp3"]);
    }

    #[tokio::test]
    async fn write_rejects_unusable_names() {
        let dir = tempdir().unwrap();
        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();

        for name in ["../escape.mp3", "", "cover.jpg", ".upload-1.part"] {
            let err = store.write(name, b"x").await.unwrap_err();
            assert!(matches!(err, TrackError::BadRequest(_)), "{name}");
        }
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_distinguishes_missing_tracks() {
        let dir = tempdir().unwrap();
        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();
        store.write("song.mp3", b"x").await.unwrap();

        store.remove("song.mp3").await.unwrap();
        assert!(matches!(store.remove("song.mp3").await, Err(TrackError::NotFound(_))));
        assert!(matches!(store.remove("../song.mp3").await, Err(TrackError::NotFound(_))));
    }

    #[tokio::test]
    async fn open_track_reports_length() {
        let dir = tempdir().unwrap();
        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();
        store.write("song.mp3", b"12345").await.unwrap();

        let (_file, len) = store.open_track("song.mp3").await.unwrap();
        assert_eq!(len, 5);
        assert!(matches!(store.open_track("missing.mp3").await, Err(TrackError::NotFound(_))));
    }

    #[tokio::test]
    async fn open_sweeps_interrupted_uploads() {
        let dir = tempdir().unwrap();
        stdfs::write(dir.path().join(".upload-00000000deadbeef.part"), b"half").unwrap();
        stdfs::write(dir.path().join("keep.mp3"), b"x").unwrap();

        let store = TrackStore::open(dir.path(), "mp3").await.unwrap();
        assert!(leftover_temps(dir.path()).is_empty());
        assert_eq!(store.list().await.unwrap(), vec!["keep.mp3"]);
    }
}
