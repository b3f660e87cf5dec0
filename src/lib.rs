//! Web front-end for listing and fetching media formats through yt-dlp.

pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod formats;
pub mod routes;
pub mod scratch;

pub use config::AppConfig;
pub use engine::{MediaEngine, YtDlp};
pub use routes::{AppState, router};
