//! Upis: background synchronization daemon for captured recordings.

mod app;
mod config;
mod error;
mod logging;

pub(crate) use {
    app::App,
    error::{AppError, Result as AppResult},
};

use crate::config::Config;

use tracing::error;

/// Application entry point.
fn main() {
    let log_guard = match Config::log_dir().and_then(|dir| logging::init(&dir)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            std::process::exit(1);
        }
    };

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:?}", e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {:?}", e);
            std::process::exit(1);
        }
    };

    let app = App { config };

    if let Err(e) = rt.block_on(app.run()) {
        error!(error = ?e, "App error");
        drop(rt);
        drop(log_guard);
        std::process::exit(1);
    }
}
