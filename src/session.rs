//! Client-side playback session.
//!
//! The session is one JSON record kept under a single key: the cached track
//! list, the selected track, the playback rate and the playback position.
//! The server owns which tracks exist; the session owns their order and
//! everything about playback.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::track::Track;

pub const SESSION_KEY: &str = "audioPlayerSession";

/// Rates the player accepts, in the order they are offered.
pub const ALLOWED_RATES: [f64; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];
pub const DEFAULT_RATE: f64 = 1.0;

pub fn is_allowed_rate(rate: f64) -> bool {
    ALLOWED_RATES.iter().any(|r| (r - rate).abs() < 1e-9)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub track_list: Vec<Track>,
    pub current_track: Option<Track>,
    pub playback_rate: f64,
    /// Seconds into the current track.
    pub audio_time: f64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            track_list: Vec::new(),
            current_track: None,
            playback_rate: DEFAULT_RATE,
            audio_time: 0.0,
        }
    }
}

impl Session {
    /// Replaces values a stored record may carry but the player cannot use.
    fn sanitized(mut self) -> Self {
        if !is_allowed_rate(self.playback_rate) {
            self.playback_rate = DEFAULT_RATE;
        }
        if !self.audio_time.is_finite() || self.audio_time < 0.0 {
            self.audio_time = 0.0;
        }
        let listed = self
            .current_track
            .as_ref()
            .map(|cur| self.track_list.iter().any(|t| t.name == cur.name))
            .unwrap_or(true);
        if !listed {
            self.current_track = None;
            self.audio_time = 0.0;
        }
        self
    }
}

/// A partial update. Fields left as `None` keep their stored value.
#[derive(Clone, Debug, Default)]
pub struct SessionPatch {
    pub track_list: Option<Vec<Track>>,
    pub current_track: Option<Option<Track>>,
    pub playback_rate: Option<f64>,
    pub audio_time: Option<f64>,
}

impl SessionPatch {
    pub fn track_list(mut self, tracks: Vec<Track>) -> Self {
        self.track_list = Some(tracks);
        self
    }

    pub fn current_track(mut self, track: Option<Track>) -> Self {
        self.current_track = Some(track);
        self
    }

    pub fn playback_rate(mut self, rate: f64) -> Self {
        self.playback_rate = Some(rate);
        self
    }

    pub fn audio_time(mut self, seconds: f64) -> Self {
        self.audio_time = Some(seconds);
        self
    }

    fn apply_to(self, session: &mut Session) {
        if let Some(tracks) = self.track_list {
            session.track_list = tracks;
        }
        if let Some(track) = self.current_track {
            session.current_track = track;
        }
        if let Some(rate) = self.playback_rate {
            session.playback_rate = rate;
        }
        if let Some(seconds) = self.audio_time {
            session.audio_time = seconds;
        }
    }
}

/// Merges the server's track set into a cached session.
///
/// Tracks still on the server keep their cached position; new ones are
/// appended in server order. A current track the server no longer has is
/// dropped. The playback rate is never touched.
pub fn reconcile(mut session: Session, server: &[Track]) -> Session {
    let by_name: HashMap<&str, &Track> = server.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut seen: HashSet<&str> = HashSet::with_capacity(server.len());
    let mut merged: Vec<Track> = Vec::with_capacity(server.len());

    for cached in &session.track_list {
        if let Some(fresh) = by_name.get(cached.name.as_str()) {
            if seen.insert(fresh.name.as_str()) {
                merged.push((*fresh).clone());
            }
        }
    }
    for fresh in server {
        if seen.insert(fresh.name.as_str()) {
            merged.push(fresh.clone());
        }
    }

    let stale = session
        .current_track
        .as_ref()
        .map(|cur| !by_name.contains_key(cur.name.as_str()))
        .unwrap_or(false);
    if stale {
        debug!("Current track no longer on the server, clearing selection");
        session.current_track = None;
        session.audio_time = 0.0;
    } else if let Some(cur) = session.current_track.as_mut() {
        if let Some(fresh) = by_name.get(cur.name.as_str()) {
            *cur = (*fresh).clone();
        }
    }

    session.track_list = merged;
    session
}

// --- Storage ---

/// Key-value backend the session is persisted in.
pub trait SessionStorage {
    /// Returns the stored value, or `None` if absent or unreadable.
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> io::Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Keeps each key as `<key>.json` inside a directory.
///
/// Reads and writes are synchronous `std::fs` calls on a few hundred bytes.
/// Playback positions reach it at most once per
/// [`POSITION_WRITE_INTERVAL`](crate::player::POSITION_WRITE_INTERVAL), so the
/// player stays cheap to drive from a UI thread. Code that holds the player
/// inside an async runtime worker should prefer an in-memory storage or wrap
/// this one so writes run on a blocking thread.
#[derive(Clone, Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path_for(key), value)
    }
}

// --- Cache ---

/// Reads and merges the persisted session.
///
/// Loading never fails: a missing or corrupt record yields the default
/// session. Write failures are logged and dropped so playback is never held
/// up by persistence.
pub struct SessionCache<S: SessionStorage> {
    storage: S,
    key: String,
}

impl<S: SessionStorage> SessionCache<S> {
    pub fn new(storage: S) -> Self {
        Self::with_key(storage, SESSION_KEY)
    }

    pub fn with_key(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn load(&self) -> Session {
        let Some(raw) = self.storage.get(&self.key) else {
            return Session::default();
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => session.sanitized(),
            Err(e) => {
                warn!("Discarding unreadable session record: {}", e);
                Session::default()
            }
        }
    }

    /// Merges `patch` into the stored session and returns the result.
    pub fn save(&mut self, patch: SessionPatch) -> Session {
        let mut session = self.load();
        patch.apply_to(&mut session);
        self.store(&session);
        session
    }

    /// Overwrites the stored session.
    pub fn store(&mut self, session: &Session) {
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize session: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.key, &raw) {
            warn!("Failed to persist session: {}", e);
        }
    }

    /// Merges the server's track list into the stored session.
    pub fn reconcile(&mut self, server: &[Track]) -> Session {
        let session = reconcile(self.load(), server);
        self.store(&session);
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(names: &[&str]) -> Vec<Track> {
        names.iter().map(|n| Track::from_name(*n)).collect()
    }

    fn names(list: &[Track]) -> Vec<&str> {
        list.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn load_of_missing_record_is_default() {
        let cache = SessionCache::new(MemoryStorage::default());
        assert_eq!(cache.load(), Session::default());
        assert_eq!(cache.load().playback_rate, 1.0);
    }

    #[test]
    fn load_of_corrupt_record_is_default() {
        let mut storage = MemoryStorage::default();
        storage.set(SESSION_KEY, "{not json").unwrap();
        let cache = SessionCache::new(storage);
        assert_eq!(cache.load(), Session::default());
    }

    #[test]
    fn load_fills_missing_fields_and_ignores_unknown_ones() {
        let mut storage = MemoryStorage::default();
        storage
            .set(SESSION_KEY, r#"{"playbackRate":1.5,"theme":"dark"}"#)
            .unwrap();
        let session = SessionCache::new(storage).load();
        assert_eq!(session.playback_rate, 1.5);
        assert_eq!(session.audio_time, 0.0);
        assert!(session.current_track.is_none());
        assert!(session.track_list.is_empty());
    }

    #[test]
    fn load_repairs_out_of_range_values() {
        let mut storage = MemoryStorage::default();
        let raw = serde_json::json!({
            "trackList": [{ "name": "a.mp3", "url": "/tracks/a.mp3" }],
            "currentTrack": { "name": "gone.mp3", "url": "/tracks/gone.mp3" },
            "playbackRate": 3.0,
            "audioTime": -4.0
        });
        storage.set(SESSION_KEY, &raw.to_string()).unwrap();

        let session = SessionCache::new(storage).load();
        assert_eq!(session.playback_rate, DEFAULT_RATE);
        assert_eq!(session.audio_time, 0.0);
        assert!(session.current_track.is_none());
        assert_eq!(names(&session.track_list), vec!["a.mp3"]);
    }

    #[test]
    fn save_merges_without_dropping_other_fields() {
        let mut cache = SessionCache::new(MemoryStorage::default());
        let list = tracks(&["a.mp3", "b.mp3"]);
        cache.save(
            SessionPatch::default()
                .track_list(list.clone())
                .current_track(Some(list[1].clone()))
                .playback_rate(1.25),
        );
        cache.save(SessionPatch::default().audio_time(42.5));

        let session = cache.load();
        assert_eq!(session.track_list, list);
        assert_eq!(session.current_track, Some(list[1].clone()));
        assert_eq!(session.playback_rate, 1.25);
        assert_eq!(session.audio_time, 42.5);

        cache.save(SessionPatch::default().playback_rate(0.75));
        let session = cache.load();
        assert_eq!(session.audio_time, 42.5);
        assert_eq!(session.current_track, Some(list[1].clone()));
    }

    #[test]
    fn persisted_record_uses_camel_case_keys() {
        let mut cache = SessionCache::new(MemoryStorage::default());
        cache.save(SessionPatch::default().audio_time(3.0));
        let raw = cache.storage().get(SESSION_KEY).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["audioTime"], 3.0);
        assert_eq!(value["playbackRate"], 1.0);
        assert!(value["currentTrack"].is_null());
        assert!(value["trackList"].is_array());
    }

    #[test]
    fn reconcile_clears_a_vanished_current_track() {
        let cached = tracks(&["a.mp3", "b.mp3", "c.mp3"]);
        let session = Session {
            track_list: cached.clone(),
            current_track: Some(cached[1].clone()),
            playback_rate: 1.5,
            audio_time: 12.0,
        };

        let merged = reconcile(session, &tracks(&["a.mp3", "c.mp3", "d.mp3"]));
        assert!(merged.current_track.is_none());
        assert_eq!(merged.audio_time, 0.0);
        assert_eq!(merged.playback_rate, 1.5);
        assert_eq!(names(&merged.track_list), vec!["a.mp3", "c.mp3", "d.mp3"]);
    }

    #[test]
    fn reconcile_keeps_client_order_and_position() {
        let cached = tracks(&["c.mp3", "a.mp3"]);
        let session = Session {
            track_list: cached.clone(),
            current_track: Some(cached[0].clone()),
            playback_rate: 2.0,
            audio_time: 30.0,
        };

        let merged = reconcile(session, &tracks(&["a.mp3", "b.mp3", "c.mp3"]));
        assert_eq!(names(&merged.track_list), vec!["c.mp3", "a.mp3", "b.mp3"]);
        assert_eq!(merged.current_track.as_ref().map(|t| t.name.as_str()), Some("c.mp3"));
        assert_eq!(merged.audio_time, 30.0);
    }

    #[test]
    fn cache_reconcile_persists_the_result() {
        let mut cache = SessionCache::new(MemoryStorage::default());
        cache.save(
            SessionPatch::default()
                .track_list(tracks(&["x.mp3"]))
                .current_track(Some(Track::from_name("x.mp3"))),
        );

        let merged = cache.reconcile(&tracks(&["y.mp3"]));
        assert_eq!(cache.load(), merged);
        assert!(merged.current_track.is_none());
    }

    #[test]
    fn file_storage_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SessionCache::new(FileStorage::new(dir.path().join("state")));
        assert_eq!(cache.load(), Session::default());

        cache.save(SessionPatch::default().playback_rate(0.5));
        assert!(dir.path().join("state").join("audioPlayerSession.json").exists());

        let reopened = SessionCache::new(FileStorage::new(dir.path().join("state")));
        assert_eq!(reopened.load().playback_rate, 0.5);
    }
}
