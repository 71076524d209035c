use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::fmt;
use tracing::error;

/// Failures of the track store and the operations built on it.
///
/// A bulk delete where some files could not be removed is not an error: it is
/// reported through the counts of [`crate::service::DeleteAllOutcome`].
#[derive(Debug)]
pub enum TrackError {
    /// Missing or wrong secret on a destructive operation.
    Unauthorized,
    /// The named track is not in the store.
    NotFound(String),
    /// The request carried no usable file or an unusable name.
    BadRequest(String),
    /// Filesystem failure while reading, writing or removing.
    StoreIo(std::io::Error),
}

impl TrackError {
    pub fn status(&self) -> StatusCode {
        match self {
            TrackError::Unauthorized => StatusCode::FORBIDDEN,
            TrackError::NotFound(_) => StatusCode::NOT_FOUND,
            TrackError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TrackError::StoreIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::Unauthorized => write!(f, "Forbidden"),
            TrackError::NotFound(name) => write!(f, "File not found: {}", name),
            TrackError::BadRequest(msg) => write!(f, "{}", msg),
            TrackError::StoreIo(e) => write!(f, "Track store I/O failure: {}", e),
        }
    }
}

impl std::error::Error for TrackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrackError::StoreIo(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrackError {
    fn from(e: std::io::Error) -> Self {
        TrackError::StoreIo(e)
    }
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log, the client gets a generic message.
        let message = match &self {
            TrackError::StoreIo(e) => {
                error!("Store I/O error: {}", e);
                "Track store operation failed".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(TrackError::Unauthorized.status(), StatusCode::FORBIDDEN);
        assert_eq!(TrackError::NotFound("a.mp3".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(TrackError::BadRequest("No file uploaded".into()).status(), StatusCode::BAD_REQUEST);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(TrackError::from(io).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn io_details_are_not_leaked_into_the_body() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "/secret/path exploded");
        let response = TrackError::StoreIo(io).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"error\""));
        assert!(!text.contains("/secret/path"));
    }
}
