//! Job-related API endpoints

use crate::ControllerClient;
use crate::error::Result;
use livecast_core::dto::job::{CreateJob, JobSummary};
use livecast_core::dto::log::LogTail;
use uuid::Uuid;

impl ControllerClient {
    // =============================================================================
    // Job Management
    // =============================================================================

    /// Create a new job
    ///
    /// # Arguments
    /// * `req` - The job creation request
    ///
    /// # Returns
    /// The created job, waiting for its scheduled start
    ///
    /// # Example
    /// ```no_run
    /// # use livecast_client::ControllerClient;
    /// # use livecast_core::dto::job::CreateJob;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = ControllerClient::new("http://localhost:8090");
    /// let job = client.create_job(CreateJob {
    ///     title: Some("Morning loop".to_string()),
    ///     channel: None,
    ///     source: "loop.mp4".into(),
    ///     destination_key: Some("abcd-efgh-ijkl".to_string()),
    ///     quality: None,
    ///     vertical: false,
    ///     scheduled_start: None,
    ///     broadcast: None,
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_job(&self, req: CreateJob) -> Result<JobSummary> {
        let url = self.endpoint("/api/jobs");
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<JobSummary> {
        let url = self.endpoint(&format!("/api/jobs/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List all jobs
    ///
    /// The controller reconciles and runs a scheduler tick before answering.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let url = self.endpoint("/api/jobs");
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Delete a job that is not live
    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        let url = self.endpoint(&format!("/api/jobs/{}", job_id));
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Start a waiting job now
    pub async fn start_job(&self, job_id: Uuid) -> Result<JobSummary> {
        self.job_action(job_id, "start").await
    }

    /// Stop a live job
    pub async fn stop_job(&self, job_id: Uuid) -> Result<JobSummary> {
        self.job_action(job_id, "stop").await
    }

    /// Put a finished job back in the waiting queue
    pub async fn retry_job(&self, job_id: Uuid) -> Result<JobSummary> {
        self.job_action(job_id, "retry").await
    }

    async fn job_action(&self, job_id: Uuid, action: &str) -> Result<JobSummary> {
        let url = self.endpoint(&format!("/api/jobs/{}/{}", job_id, action));
        tracing::debug!("POST {}", url);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Job Logs
    // =============================================================================

    /// Get the last `lines` lines of a job's encoder log
    ///
    /// # Arguments
    /// * `job_id` - The job UUID
    /// * `lines` - Number of lines, capped by the controller
    pub async fn get_job_log(&self, job_id: Uuid, lines: usize) -> Result<LogTail> {
        let url = self.endpoint(&format!("/api/jobs/{}/log", job_id));
        let response = self
            .client
            .get(&url)
            .query(&[("lines", lines)])
            .send()
            .await?;

        self.handle_response(response).await
    }
}
