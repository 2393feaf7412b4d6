//! Upstream callback interface
//!
//! The callback announces `PROCESSING` when a submission starts grading and
//! `DONE` when its artifacts are ready. The trait seam exists so tests can
//! substitute a recording sink for the HTTP client.
//!
//! Callback failures are deliberately non-fatal everywhere: a transient
//! upstream outage must not block grading.

use anyhow::Result;
use async_trait::async_trait;

use vmchecker_client::CallbackClient;
use vmchecker_core::domain::submission::SubmissionStatus;
use vmchecker_core::dto::report::{Artifact, StatusUpdate};

/// Sink for per-submission status updates
#[async_trait]
pub trait Callback: Send + Sync {
    /// Delivers one status update for a bundle
    async fn notify(
        &self,
        bundle: &str,
        status: SubmissionStatus,
        artifacts: Vec<Artifact>,
    ) -> Result<()>;
}

/// HTTP implementation backed by the upstream submission service
pub struct HttpCallback {
    client: CallbackClient,
}

impl HttpCallback {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: CallbackClient::new(base_url),
        }
    }
}

#[async_trait]
impl Callback for HttpCallback {
    async fn notify(
        &self,
        bundle: &str,
        status: SubmissionStatus,
        artifacts: Vec<Artifact>,
    ) -> Result<()> {
        let update = StatusUpdate {
            bundle: bundle.to_string(),
            status,
            reported_at: chrono::Utc::now(),
            artifacts,
        };
        self.client.send_status(&update).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording callback sink for tests

    use super::*;
    use std::sync::Mutex;

    /// Records every notification it receives
    #[derive(Default)]
    pub struct RecordingCallback {
        events: Mutex<Vec<(String, SubmissionStatus, Vec<Artifact>)>>,
    }

    impl RecordingCallback {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<(String, SubmissionStatus, Vec<Artifact>)> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Callback for RecordingCallback {
        async fn notify(
            &self,
            bundle: &str,
            status: SubmissionStatus,
            artifacts: Vec<Artifact>,
        ) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push((bundle.to_string(), status, artifacts));
            Ok(())
        }
    }
}
