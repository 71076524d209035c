use anyhow::Context;
use std::path::PathBuf;
use tracing::warn;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_SECRET: &str = "superadmin";
const DEFAULT_EXTENSION: &str = "mp3";
const DEFAULT_MAX_UPLOAD_MB: usize = 100;

/// Server settings, read from the environment (after `.env` is loaded).
#[derive(Clone, Debug)]
pub struct Config {
    pub tracks_dir: PathBuf,
    pub port: u16,
    pub secret: String,
    pub extension: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(source: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| source(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let tracks_dir = get("TRACKS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("tracks"));

        let port = match get("PORT") {
            Some(v) => v.parse().with_context(|| format!("PORT must be a port number, got {:?}", v))?,
            None => DEFAULT_PORT,
        };

        let secret = match get("TRACKS_SECRET") {
            Some(v) => v,
            None => {
                warn!("TRACKS_SECRET not set, falling back to the built-in default secret");
                DEFAULT_SECRET.to_string()
            }
        };

        let extension = get("TRACKS_EXTENSION")
            .map(|v| v.trim_start_matches('.').to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

        let max_upload_mb: usize = match get("MAX_UPLOAD_MB") {
            Some(v) => v
                .parse()
                .with_context(|| format!("MAX_UPLOAD_MB must be a number, got {:?}", v))?,
            None => DEFAULT_MAX_UPLOAD_MB,
        };

        Ok(Self {
            tracks_dir,
            port,
            secret,
            extension,
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.tracks_dir, PathBuf::from("tracks"));
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.secret, "superadmin");
        assert_eq!(cfg.extension, "mp3");
        assert_eq!(cfg.max_upload_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn values_are_read_and_normalized() {
        let cfg = Config::from_lookup(lookup(&[
            ("TRACKS_DIR", "/srv/music"),
            ("PORT", "8080"),
            ("TRACKS_SECRET", "hunter2"),
            ("TRACKS_EXTENSION", ".OGG"),
            ("MAX_UPLOAD_MB", "5"),
        ]))
        .unwrap();
        assert_eq!(cfg.tracks_dir, PathBuf::from("/srv/music"));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.secret, "hunter2");
        assert_eq!(cfg.extension, "ogg");
        assert_eq!(cfg.max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = Config::from_lookup(lookup(&[("PORT", "  "), ("TRACKS_SECRET", "")])).unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.secret, "superadmin");
    }

    #[test]
    fn malformed_numbers_are_errors() {
        assert!(Config::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MAX_UPLOAD_MB", "-1")])).is_err());
    }
}
