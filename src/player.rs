use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::session::{self, is_allowed_rate, Session, SessionCache, SessionPatch, SessionStorage};
use crate::track::Track;

/// Minimum spacing between persisted position updates while playing.
pub const POSITION_WRITE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing selected.
    Idle,
    /// A track is chosen but playback has not started yet.
    Selected,
    Playing,
    Paused,
}

#[derive(Debug, PartialEq)]
pub enum PlayerError {
    UnknownTrack(String),
    InvalidRate(f64),
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerError::UnknownTrack(name) => write!(f, "Track not in list: {}", name),
            PlayerError::InvalidRate(rate) => write!(f, "Unsupported playback rate: {}", rate),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Issued when a request that returns a track list is sent. Responses are
/// applied only if their ticket is newer than the last one applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncTicket(u64);

/// Drives playback from the cached session and writes every change back.
pub struct PlayerController<S: SessionStorage> {
    cache: SessionCache<S>,
    state: PlayerState,
    tracks: Vec<Track>,
    current: Option<Track>,
    rate: f64,
    position: f64,
    last_position_write: Option<Instant>,
    issued: u64,
    applied: u64,
}

impl<S: SessionStorage> PlayerController<S> {
    /// Rehydrates from the persisted session. A restored track comes back
    /// paused at its stored position.
    pub fn restore(cache: SessionCache<S>) -> Self {
        let session = cache.load();
        let state = if session.current_track.is_some() {
            PlayerState::Paused
        } else {
            PlayerState::Idle
        };
        Self {
            cache,
            state,
            tracks: session.track_list,
            current: session.current_track,
            rate: session.playback_rate,
            position: session.audio_time,
            last_position_write: None,
            issued: 0,
            applied: 0,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn playback_rate(&self) -> f64 {
        self.rate
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn cache(&self) -> &SessionCache<S> {
        &self.cache
    }

    /// Selects a track from the list and starts it.
    pub fn select(&mut self, name: &str) -> Result<PlayerState, PlayerError> {
        let track = self
            .tracks
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| PlayerError::UnknownTrack(name.to_string()))?;
        self.start(track);
        Ok(self.state)
    }

    pub fn play(&mut self) -> PlayerState {
        if matches!(self.state, PlayerState::Selected | PlayerState::Paused) {
            self.state = PlayerState::Playing;
        }
        self.state
    }

    pub fn pause(&mut self) -> PlayerState {
        if self.state == PlayerState::Playing {
            self.state = PlayerState::Paused;
            self.cache.save(SessionPatch::default().audio_time(self.position));
            self.last_position_write = None;
        }
        self.state
    }

    /// Called when the playing track reaches its end. Moves to the next track
    /// in the current order, or stops after the last one.
    pub fn on_ended(&mut self) -> PlayerState {
        if self.state != PlayerState::Playing {
            return self.state;
        }
        let next = self
            .current
            .as_ref()
            .and_then(|cur| self.tracks.iter().position(|t| t.name == cur.name))
            .and_then(|idx| self.tracks.get(idx + 1))
            .cloned();
        match next {
            Some(track) => self.start(track),
            None => {
                info!("Reached end of track list");
                self.stop();
            }
        }
        self.state
    }

    pub fn change_rate(&mut self, rate: f64) -> Result<(), PlayerError> {
        if !is_allowed_rate(rate) {
            return Err(PlayerError::InvalidRate(rate));
        }
        self.rate = rate;
        self.cache.save(SessionPatch::default().playback_rate(rate));
        Ok(())
    }

    /// Records the playback position. Returns true if it was persisted.
    pub fn on_time_update(&mut self, seconds: f64, now: Instant) -> bool {
        if !seconds.is_finite() || seconds < 0.0 {
            return false;
        }
        self.position = seconds;
        let due = self
            .last_position_write
            .map(|last| now.duration_since(last) >= POSITION_WRITE_INTERVAL)
            .unwrap_or(true);
        if due {
            self.cache.save(SessionPatch::default().audio_time(seconds));
            self.last_position_write = Some(now);
        }
        due
    }

    /// The user confirmed deleting `name`. If it is the current track the
    /// player stops right away; the list itself only changes once the server
    /// confirms.
    pub fn forget(&mut self, name: &str) -> PlayerState {
        if self.current.as_ref().map(|t| t.name == name).unwrap_or(false) {
            self.stop();
        }
        self.state
    }

    /// Moves the track at `from` to `to`.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.tracks.len() || to >= self.tracks.len() {
            return false;
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        self.persist_tracks();
        true
    }

    pub fn sort_by_name(&mut self) {
        self.tracks
            .sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        self.persist_tracks();
    }

    pub fn begin_sync(&mut self) -> SyncTicket {
        self.issued += 1;
        SyncTicket(self.issued)
    }

    /// Reconciles with a track list returned by the server. Stale responses
    /// are dropped and false is returned.
    pub fn apply_server_list(&mut self, ticket: SyncTicket, names: &[String]) -> bool {
        if ticket.0 <= self.applied {
            debug!("Dropping stale track list (ticket {}, applied {})", ticket.0, self.applied);
            return false;
        }
        self.applied = ticket.0;

        let server: Vec<Track> = names.iter().map(Track::from_name).collect();
        let session = session::reconcile(self.snapshot(), &server);
        self.cache.store(&session);

        self.tracks = session.track_list;
        if session.current_track.is_none() && self.current.is_some() {
            info!("Current track was removed from the server");
            self.current = None;
            self.position = 0.0;
            self.state = PlayerState::Idle;
        } else {
            self.current = session.current_track;
        }
        true
    }

    fn start(&mut self, track: Track) {
        debug!("Starting {}", track.name);
        self.state = PlayerState::Selected;
        self.position = 0.0;
        self.last_position_write = None;
        self.cache.save(
            SessionPatch::default()
                .current_track(Some(track.clone()))
                .audio_time(0.0),
        );
        self.current = Some(track);
        self.play();
    }

    fn stop(&mut self) {
        self.state = PlayerState::Idle;
        self.current = None;
        self.position = 0.0;
        self.last_position_write = None;
        self.cache.save(SessionPatch::default().current_track(None).audio_time(0.0));
    }

    fn persist_tracks(&mut self) {
        self.cache
            .save(SessionPatch::default().track_list(self.tracks.clone()));
    }

    fn snapshot(&self) -> Session {
        Session {
            track_list: self.tracks.clone(),
            current_track: self.current.clone(),
            playback_rate: self.rate,
            audio_time: self.position,
        }
    }
}
