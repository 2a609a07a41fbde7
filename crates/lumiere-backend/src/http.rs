//! HTTP status probe against the broadcast provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use lumiere_shared::StatusError;

use crate::capabilities::{StatusCheckResult, StatusProbe};

/// Wire shape of the provider's status endpoint.  Both fields are optional
/// so a partially valid payload still deserializes; interpretation happens
/// in [`HttpStatusProbe::check`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    is_active: Option<bool>,
    playback_url: Option<String>,
}

/// Status probe backed by the provider's HTTP API.
pub struct HttpStatusProbe {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStatusProbe {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn interpret(&self, playback_id: &str, payload: StatusPayload) -> StatusCheckResult {
        match payload.is_active {
            Some(true) => {
                let playback_url = payload.playback_url.unwrap_or_else(|| {
                    format!(
                        "{}/hls/{playback_id}/index.m3u8",
                        self.base_url.trim_end_matches('/')
                    )
                });
                StatusCheckResult::Active { playback_url }
            }
            Some(false) => StatusCheckResult::Inactive,
            None => {
                warn!(playback_id, "status payload missing isActive, treating as unknown");
                StatusCheckResult::Unknown
            }
        }
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn check(&self, playback_id: &str) -> Result<StatusCheckResult, StatusError> {
        let url = format!(
            "{}/status/{playback_id}",
            self.base_url.trim_end_matches('/')
        );

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                StatusError::Timeout
            } else {
                StatusError::Request(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            return Err(StatusError::Request(format!(
                "provider responded {}",
                resp.status()
            )));
        }

        // A malformed body is not an error: the watcher must fail safe
        // toward `waiting`, never toward `live`.
        match resp.json::<StatusPayload>().await {
            Ok(payload) => Ok(self.interpret(playback_id, payload)),
            Err(e) => {
                warn!(playback_id, error = %e, "malformed status payload");
                Ok(StatusCheckResult::Unknown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_payload_with_url() {
        let probe = HttpStatusProbe::new("https://livepeer.example");
        let payload: StatusPayload =
            serde_json::from_str(r#"{"isActive": true, "playbackUrl": "https://cdn/x.m3u8"}"#)
                .unwrap();
        assert_eq!(
            probe.interpret("pb1", payload),
            StatusCheckResult::Active {
                playback_url: "https://cdn/x.m3u8".into()
            }
        );
    }

    #[test]
    fn test_active_payload_without_url_derives_one() {
        let probe = HttpStatusProbe::new("https://livepeer.example/");
        let payload: StatusPayload = serde_json::from_str(r#"{"isActive": true}"#).unwrap();
        assert_eq!(
            probe.interpret("pb1", payload),
            StatusCheckResult::Active {
                playback_url: "https://livepeer.example/hls/pb1/index.m3u8".into()
            }
        );
    }

    #[test]
    fn test_missing_is_active_is_unknown() {
        let probe = HttpStatusProbe::new("https://livepeer.example");
        let payload: StatusPayload = serde_json::from_str(r#"{"playbackUrl": "x"}"#).unwrap();
        assert_eq!(probe.interpret("pb1", payload), StatusCheckResult::Unknown);
    }
}
