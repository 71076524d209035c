use serde::{Deserialize, Serialize};

/// Path prefix under which stored tracks are served.
pub const TRACKS_ROUTE: &str = "/tracks";

/// A stored audio file. The filename is both the identifier and the sort key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub url: String,
}

impl Track {
    /// Builds the descriptor for a stored filename, deriving its servable url.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let url = format!("{}/{}", TRACKS_ROUTE, urlencoding::encode(&name));
        Self { name, url }
    }
}
