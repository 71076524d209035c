pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod player;
pub mod routes;
pub mod service;
pub mod session;
pub mod store;
pub mod track;

pub use error::TrackError;
pub use track::Track;
