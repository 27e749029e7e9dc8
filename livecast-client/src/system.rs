//! Controller-wide API endpoints

use crate::ControllerClient;
use crate::error::Result;
use livecast_core::dto::media::{ChannelList, VideoFile};
use livecast_core::dto::status::StatusSummary;

impl ControllerClient {
    /// Job counts overall and per channel
    pub async fn status(&self) -> Result<StatusSummary> {
        let url = self.endpoint("/api/status");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Media files the controller can stream
    pub async fn list_videos(&self) -> Result<Vec<VideoFile>> {
        let url = self.endpoint("/api/videos");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Channels with platform credentials
    pub async fn list_channels(&self) -> Result<ChannelList> {
        let url = self.endpoint("/api/channels");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Trigger a reconciliation pass and scheduler tick
    ///
    /// Returns the controller's activation report as raw JSON.
    pub async fn activate(&self) -> Result<serde_json::Value> {
        let url = self.endpoint("/api/activate");
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Check that the controller is reachable
    pub async fn health(&self) -> Result<()> {
        let url = self.endpoint("/health");
        let response = self.client.get(&url).send().await?;

        self.handle_empty_response(response).await
    }
}
