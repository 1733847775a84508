//! HTTP implementations of [`RemoteSync`] and [`Directory`].
//!
//! `ureq` is blocking, so every request runs on tokio's blocking pool.

use crate::{
    RemoteError,
    model::{RecordingId, RecordingInfo},
    remote::{BlockProposal, DIGEST_HEADER, Directory, Identity, RemoteSync, UploadTarget},
};

use std::{collections::BTreeMap, panic::Location, time::Duration};

use async_trait::async_trait;
use error_location::ErrorLocation;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote sync service reached over HTTP.
#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpRemote {
    /// Client for the service rooted at `base_url`, authenticating with a
    /// bearer `token` when given.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            agent: build_agent(),
        }
    }

    fn recording_url(&self, id: &RecordingId) -> String {
        format!(
            "{}/bands/{}/recordings/{}",
            self.base_url, id.band_id, id.track_id
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    mime_type: &'a str,
}

#[async_trait]
impl RemoteSync for HttpRemote {
    #[instrument(skip(self, info), fields(recording = %info.id))]
    async fn register_recording(&self, info: &RecordingInfo) -> Result<(), RemoteError> {
        let url = self.recording_url(&info.id);
        let request = authorized(self.agent.put(&url), self.token.as_deref());
        let mime_type = info.mime_type.clone();

        blocking(move || {
            request
                .send_json(RegisterBody {
                    mime_type: &mime_type,
                })
                .map_err(|e| map_ureq_error(&url, e))?;
            debug!(url = %url, "Recording registered remotely");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, proposal), fields(index = proposal.index, size = proposal.size))]
    async fn propose_block(
        &self,
        recording: &RecordingId,
        proposal: &BlockProposal,
    ) -> Result<UploadTarget, RemoteError> {
        let url = format!("{}/blocks/{}", self.recording_url(recording), proposal.index);
        let request = authorized(self.agent.put(&url), self.token.as_deref());
        let proposal = proposal.clone();

        blocking(move || {
            let response = request
                .send_json(&proposal)
                .map_err(|e| map_ureq_error(&url, e))?;

            response
                .into_json::<UploadTarget>()
                .map_err(|e| RemoteError::MalformedResponse {
                    reason: format!("Failed to decode upload target from {}: {}", url, e),
                    location: ErrorLocation::from(Location::caller()),
                })
        })
        .await
    }

    #[instrument(skip(self, target, digest, bytes), fields(size = bytes.len()))]
    async fn upload_block(
        &self,
        target: &UploadTarget,
        digest: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError> {
        // Presigned targets carry their own authorization.
        let url = target.upload_url.clone();
        let request = self.agent.put(&url).set(DIGEST_HEADER, digest);

        blocking(move || {
            request
                .send_bytes(&bytes)
                .map_err(|e| map_ureq_error(&url, e))?;
            Ok(())
        })
        .await
    }
}

/// Session directory reached over HTTP.
#[derive(Clone)]
pub struct HttpDirectory {
    base_url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct SessionResponse {
    uid: String,
    #[serde(default)]
    bands: BTreeMap<String, String>,
}

impl HttpDirectory {
    /// Directory for the service rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            agent: build_agent(),
        }
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    #[instrument(skip(self))]
    async fn verify_identity(&self) -> Result<Identity, RemoteError> {
        let url = format!("{}/session", self.base_url);
        let request = authorized(self.agent.get(&url), self.token.as_deref());

        blocking(move || {
            let response = request.call().map_err(|e| map_ureq_error(&url, e))?;

            let session = response.into_json::<SessionResponse>().map_err(|e| {
                RemoteError::MalformedResponse {
                    reason: format!("Failed to decode session from {}: {}", url, e),
                    location: ErrorLocation::from(Location::caller()),
                }
            })?;

            Ok(Identity {
                owner_id: session.uid,
                band_ids: session.bands.into_keys().collect(),
            })
        })
        .await
    }

    async fn is_band_member(&self, band_id: &str) -> Result<bool, RemoteError> {
        let identity = self.verify_identity().await?;
        Ok(identity.band_ids.iter().any(|b| b == band_id))
    }
}

fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(READ_TIMEOUT)
        .timeout_write(WRITE_TIMEOUT)
        .build()
}

fn authorized(request: ureq::Request, token: Option<&str>) -> ureq::Request {
    match token {
        Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
        None => request,
    }
}

#[track_caller]
fn map_ureq_error(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, _) => RemoteError::Status {
            status,
            url: url.to_string(),
            location: ErrorLocation::from(Location::caller()),
        },
        ureq::Error::Transport(transport) => RemoteError::Transport {
            reason: transport.to_string(),
            location: ErrorLocation::from(Location::caller()),
        },
    }
}

async fn blocking<T, F>(f: F) -> Result<T, RemoteError>
where
    F: FnOnce() -> Result<T, RemoteError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RemoteError::Transport {
            reason: format!("Request task failed: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?
}
