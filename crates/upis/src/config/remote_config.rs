use serde::{Deserialize, Serialize};

/// Remote sync service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Service root, e.g. `https://api.example.com`.
    #[serde(default)]
    pub base_url: String,
    /// Bearer token sent to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
