pub mod app;
pub mod config;
pub mod observability;

pub use app::{AppError, SyncApp, build_engine, build_runner, spawn_shutdown_listener};
pub use config::AppConfig;
