use crate::{AppResult, config::Config};

use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use upis_core::{HttpDirectory, HttpRemote, SyncEngine};

/// The sync daemon: one engine for the verified user, run until Ctrl-C.
pub struct App {
    pub(crate) config: Config,
}

impl App {
    /// Open the engine, report local state, then drive the queue until
    /// interrupted.
    #[instrument(skip(self))]
    pub(crate) async fn run(self) -> AppResult<()> {
        info!("Upis starting");

        self.config.validate()?;

        let base_url = self.config.remote.base_url.clone();
        let token = self.config.remote.token.clone();
        let settings = self.config.engine_settings(self.config.data_dir()?);

        let engine = SyncEngine::open(
            settings,
            Arc::new(HttpDirectory::new(base_url.clone(), token.clone())),
            Arc::new(HttpRemote::new(base_url, token)),
        )
        .await?;

        self.report_recordings(&engine).await;

        engine.spawn_runner().await;
        info!(
            owner_id = %engine.identity().owner_id,
            "Sync runner started, press Ctrl-C to stop"
        );

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to listen for Ctrl-C, shutting down");
        }

        info!("Shutdown requested");
        engine.close().await?;

        Ok(())
    }

    async fn report_recordings(&self, engine: &SyncEngine) {
        for band_id in &engine.identity().band_ids {
            match engine.list_recordings(band_id).await {
                Ok(recordings) => {
                    info!(band_id = %band_id, count = recordings.len(), "Recordings");
                    for recording in recordings {
                        info!(
                            band_id = %band_id,
                            track_id = %recording.info.id.track_id,
                            state = recording.state.name(),
                            saved_at = recording.saved_at,
                            "Recording"
                        );
                    }
                }
                Err(e) => warn!(band_id = %band_id, error = ?e, "Failed to list recordings"),
            }
        }
    }
}
