use bytes::Bytes;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::player::PlayerController;
use crate::session::SessionStorage;
use crate::track::Track;

#[derive(Debug)]
pub enum ClientError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Server(String),
    Transport(reqwest::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Unauthorized => write!(f, "Wrong password"),
            ClientError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ClientError::BadRequest(msg) => write!(f, "Rejected: {}", msg),
            ClientError::Server(msg) => write!(f, "Server error: {}", msg),
            ClientError::Transport(e) => write!(f, "Request failed: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e)
    }
}

// --- Wire Models ---

#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize, Debug)]
pub struct UploadResponse {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub tracks: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct DeleteResponse {
    pub success: bool,
    #[serde(default)]
    pub tracks: Vec<String>,
}

#[derive(Deserialize, Debug)]
pub struct DeleteAllResponse {
    pub deleted: usize,
    #[serde(default)]
    pub failed: usize,
    /// Absent when the server could not list the store after deleting.
    #[serde(default)]
    pub tracks: Option<Vec<String>>,
}

/// HTTP client for the track API.
#[derive(Clone)]
pub struct TrackClient {
    client: Client,
    base_url: String,
}

impl TrackClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn list(&self) -> Result<Vec<String>, ClientError> {
        let resp = self
            .client
            .get(format!("{}/tracks-list", self.base_url))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn upload(&self, name: &str, contents: Vec<u8>) -> Result<UploadResponse, ClientError> {
        let part = multipart::Part::bytes(contents)
            .file_name(name.to_string())
            .mime_str("audio/mpeg")?;
        let form = multipart::Form::new().part("file", part);
        let resp = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn delete(&self, name: &str, secret: &str) -> Result<DeleteResponse, ClientError> {
        let resp = self
            .client
            .delete(self.track_url(name))
            .query(&[("pw", secret)])
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn delete_all(&self, secret: &str) -> Result<DeleteAllResponse, ClientError> {
        let resp = self
            .client
            .delete(format!("{}/tracks-all", self.base_url))
            .query(&[("pw", secret)])
            .send()
            .await?;
        decode(resp).await
    }

    /// Downloads the raw audio bytes of a track.
    pub async fn fetch(&self, name: &str) -> Result<Bytes, ClientError> {
        let resp = self.client.get(self.track_url(name)).send().await?;
        if !resp.status().is_success() {
            return Err(error_for(resp).await);
        }
        Ok(resp.bytes().await?)
    }

    fn track_url(&self, name: &str) -> String {
        format!("{}{}", self.base_url, Track::from_name(name).url)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    if !resp.status().is_success() {
        return Err(error_for(resp).await);
    }
    Ok(resp.json::<T>().await?)
}

async fn error_for(resp: Response) -> ClientError {
    let status = resp.status();
    let message = resp
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_else(|_| status.to_string());
    match status {
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => ClientError::BadRequest(message),
        _ => ClientError::Server(message),
    }
}

// --- Library ---

/// Runs server mutations and feeds their confirmed results into a player.
///
/// The track list only changes after the server answers. A single delete of
/// the current track stops it as soon as the user confirms; a bulk delete
/// leaves playback alone until the server has accepted it. Failures are
/// handed back to the caller without retrying.
///
/// Calls through one `Library` reach the server one at a time, so the order
/// sync tickets are issued in is also the order the server handled them.
pub struct Library<S: SessionStorage> {
    client: TrackClient,
    player: Mutex<PlayerController<S>>,
    requests: Mutex<()>,
}

impl<S: SessionStorage> Library<S> {
    pub fn new(client: TrackClient, player: PlayerController<S>) -> Self {
        Self {
            client,
            player: Mutex::new(player),
            requests: Mutex::new(()),
        }
    }

    pub fn player(&self) -> &Mutex<PlayerController<S>> {
        &self.player
    }

    /// Pulls the server's list. Returns false if a newer list already won.
    pub async fn refresh(&self) -> Result<bool, ClientError> {
        let _in_flight = self.requests.lock().await;
        self.pull_list().await
    }

    pub async fn upload(&self, name: &str, contents: Vec<u8>) -> Result<Track, ClientError> {
        let _in_flight = self.requests.lock().await;
        let ticket = self.player.lock().await.begin_sync();
        let resp = self.client.upload(name, contents).await?;
        self.player.lock().await.apply_server_list(ticket, &resp.tracks);
        Ok(Track {
            name: resp.name,
            url: resp.url,
        })
    }

    pub async fn delete(&self, name: &str, secret: &str) -> Result<(), ClientError> {
        let _in_flight = self.requests.lock().await;
        let ticket = {
            let mut player = self.player.lock().await;
            player.forget(name);
            player.begin_sync()
        };
        match self.client.delete(name, secret).await {
            Ok(resp) => {
                self.player.lock().await.apply_server_list(ticket, &resp.tracks);
                Ok(())
            }
            Err(ClientError::NotFound(msg)) => {
                // Someone else removed it; bring the cached list back in line.
                debug!("{} already gone on the server, resyncing", name);
                if let Err(e) = self.pull_list().await {
                    warn!("Resync after missing delete failed: {}", e);
                }
                Err(ClientError::NotFound(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes every track. Playback is only touched once the server has
    /// confirmed; a rejected call leaves the player as it was.
    pub async fn delete_all(&self, secret: &str) -> Result<DeleteAllResponse, ClientError> {
        let _in_flight = self.requests.lock().await;
        let ticket = self.player.lock().await.begin_sync();
        let resp = self.client.delete_all(secret).await?;
        if resp.failed > 0 {
            warn!("{} track(s) could not be deleted", resp.failed);
        }
        match &resp.tracks {
            Some(names) => {
                self.player.lock().await.apply_server_list(ticket, names);
            }
            None => {
                if let Err(e) = self.pull_list().await {
                    warn!("Resync after delete-all failed: {}", e);
                }
            }
        }
        Ok(resp)
    }

    async fn pull_list(&self) -> Result<bool, ClientError> {
        let ticket = self.player.lock().await.begin_sync();
        let names = self.client.list().await?;
        Ok(self.player.lock().await.apply_server_list(ticket, &names))
    }
}
