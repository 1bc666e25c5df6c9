pub mod channel;
pub mod clock;
pub mod error;
pub mod gateway;
pub mod models;
pub mod session;
pub mod settings;
pub mod stats;
mod utils;

use std::path::PathBuf;

use anyhow::Result;
use log::info;
use session::{commands, SessionController};
use settings::SettingsStore;

pub const DEFAULT_SETTINGS_FILE: &str = "posture-session.json";

pub fn init_logging() {
    // Reads RUST_LOG; defaults to info
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

fn load_settings(config: Option<PathBuf>) -> Result<SettingsStore> {
    let path = config.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    SettingsStore::new(path)
}

/// Runs one monitoring session until Ctrl-C, then prints its report.
pub async fn watch(config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config)?.get();
    let controller = SessionController::from_settings(&settings)?;

    info!("posture session starting, press Ctrl-C to stop");
    let outcome = commands::watch_session(&controller, ctrl_c()).await;
    controller.shutdown().await;

    let report = outcome?;
    for line in commands::report_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn history(config: Option<PathBuf>, follow: bool) -> Result<()> {
    let settings = load_settings(config)?.get();
    let controller = SessionController::from_settings(&settings)?;

    if follow {
        info!(
            "following session history every {:?}, press Ctrl-C to stop",
            settings.history_poll_interval()
        );
        return commands::follow_history(
            &controller,
            settings.history_poll_interval(),
            ctrl_c(),
            |session| println!("{}", commands::history_line(session)),
        )
        .await;
    }

    let sessions = commands::list_history(&controller).await?;
    if sessions.is_empty() {
        println!("no recorded sessions");
    }
    for session in &sessions {
        println!("{}", commands::history_line(session));
    }
    Ok(())
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Ctrl-C handler failed: {err}");
        std::future::pending::<()>().await;
    }
}
