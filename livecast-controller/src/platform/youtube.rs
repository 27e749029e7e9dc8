//! YouTube Live platform client
//!
//! Talks to the Data API v3 `liveBroadcasts` and `liveStreams` resources.
//! Credential acquisition is out of scope: each channel has a bearer token
//! in `<token_dir>/<channel>.token`, refreshed by an external tool.

use async_trait::async_trait;
use livecast_core::domain::broadcast::BroadcastState;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use super::{BroadcastPlatform, IngestStream, NewBroadcast, PlatformError};

const TOKEN_EXT: &str = "token";

pub struct YouTubePlatform {
    client: Client,
    base_url: String,
    token_dir: PathBuf,
}

impl YouTubePlatform {
    /// Creates a new platform client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. "https://www.googleapis.com/youtube/v3"
    /// * `token_dir` - Directory holding one bearer token file per channel
    pub fn new(base_url: String, token_dir: PathBuf) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token_dir,
        }
    }

    fn token_channels(&self) -> std::io::Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.token_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut channels = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TOKEN_EXT) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_channel(name) {
                    channels.push(name.to_string());
                }
            }
        }
        channels.sort();
        Ok(channels)
    }

    async fn token(&self, channel: &str) -> Result<String, PlatformError> {
        if !is_valid_channel(channel) {
            return Err(PlatformError::MissingCredentials(channel.to_string()));
        }

        let path = self.token_dir.join(format!("{}.{}", channel, TOKEN_EXT));
        let token = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| PlatformError::MissingCredentials(channel.to_string()))?;

        let token = token.trim();
        if token.is_empty() {
            return Err(PlatformError::MissingCredentials(channel.to_string()));
        }
        Ok(token.to_string())
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        channel: &str,
        resource: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T, PlatformError> {
        let token = self.token(channel).await?;
        let url = format!("{}/{}", self.base_url, resource);

        let mut request = self.client.post(&url).bearer_auth(token).query(query);
        request = match body {
            Some(body) => request.json(&body),
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::Parse(e.to_string()))
    }
}

#[async_trait]
impl BroadcastPlatform for YouTubePlatform {
    /// Channels that have a token on disk, sorted by name
    fn channels(&self) -> std::io::Result<Vec<String>> {
        self.token_channels()
    }

    async fn create_broadcast(
        &self,
        channel: &str,
        broadcast: &NewBroadcast,
    ) -> Result<String, PlatformError> {
        let body = json!({
            "snippet": {
                "title": broadcast.title,
                "description": broadcast.description,
                "scheduledStartTime": broadcast.scheduled_start.to_rfc3339(),
            },
            "status": {
                "privacyStatus": broadcast.privacy.as_str(),
                "selfDeclaredMadeForKids": false,
            },
            "contentDetails": {
                "enableAutoStart": false,
                "enableAutoStop": false,
                "recordFromStart": true,
                "enableDvr": true,
                "enableEmbed": true,
                "latencyPreference": "low",
            },
        });

        let created: Resource = self
            .post(
                channel,
                "liveBroadcasts",
                &[("part", "snippet,status,contentDetails")],
                Some(body),
            )
            .await?;

        tracing::info!("Created broadcast {} on channel {}", created.id, channel);
        Ok(created.id)
    }

    async fn create_stream(
        &self,
        channel: &str,
        title: &str,
    ) -> Result<IngestStream, PlatformError> {
        let body = json!({
            "snippet": {
                "title": format!("{} - Stream", title),
                "description": format!("Live stream for {}", title),
            },
            "cdn": {
                "ingestionType": "rtmp",
                "resolution": "variable",
                "frameRate": "variable",
            },
        });

        let created: StreamResource = self
            .post(channel, "liveStreams", &[("part", "snippet,cdn")], Some(body))
            .await?;

        let stream_key = created
            .cdn
            .and_then(|cdn| cdn.ingestion_info)
            .map(|info| info.stream_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| PlatformError::Parse("stream has no ingestion key".to_string()))?;

        tracing::info!("Created ingest stream {} on channel {}", created.id, channel);
        Ok(IngestStream {
            id: created.id,
            stream_key,
        })
    }

    async fn bind_stream(
        &self,
        channel: &str,
        broadcast_id: &str,
        stream_id: &str,
    ) -> Result<(), PlatformError> {
        let _: Resource = self
            .post(
                channel,
                "liveBroadcasts/bind",
                &[
                    ("id", broadcast_id),
                    ("streamId", stream_id),
                    ("part", "id,contentDetails"),
                ],
                None,
            )
            .await?;
        Ok(())
    }

    async fn transition(
        &self,
        channel: &str,
        broadcast_id: &str,
        state: BroadcastState,
    ) -> Result<(), PlatformError> {
        let _: Resource = self
            .post(
                channel,
                "liveBroadcasts/transition",
                &[
                    ("broadcastStatus", state.as_str()),
                    ("id", broadcast_id),
                    ("part", "id,status"),
                ],
                None,
            )
            .await?;
        Ok(())
    }
}

/// Maps a non-success response to a platform error
pub fn classify_status(status: StatusCode, body: &str) -> PlatformError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());
    let reasons: Vec<&str> = parsed
        .as_ref()
        .map(|e| e.error.errors.iter().map(|d| d.reason.as_str()).collect())
        .unwrap_or_default();

    if status == StatusCode::NOT_FOUND
        || reasons
            .iter()
            .any(|r| *r == "liveBroadcastNotFound" || *r == "liveStreamNotFound")
    {
        return PlatformError::NotFound(message);
    }

    if reasons.contains(&"redundantTransition") {
        return PlatformError::RedundantTransition(message);
    }

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return PlatformError::Unavailable {
            status: status.as_u16(),
            message,
        };
    }

    PlatformError::Rejected {
        status: status.as_u16(),
        message,
    }
}

fn is_valid_channel(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Deserialize)]
struct Resource {
    id: String,
}

#[derive(Deserialize)]
struct StreamResource {
    id: String,
    cdn: Option<Cdn>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cdn {
    ingestion_info: Option<IngestionInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionInfo {
    stream_name: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}
