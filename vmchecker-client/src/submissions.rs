//! Submission status endpoints

use crate::error::Result;
use crate::CallbackClient;
use vmchecker_core::dto::report::StatusUpdate;

impl CallbackClient {
    /// Report a status change for a bundle
    ///
    /// `PROCESSING` announces that grading has started; `DONE` delivers the
    /// final result together with the `.vmr` artifacts.
    ///
    /// # Arguments
    /// * `update` - The status update to deliver
    pub async fn send_status(&self, update: &StatusUpdate) -> Result<()> {
        let url = format!("{}/api/submissions/{}/status", self.base_url, update.bundle);
        let response = self.client.post(&url).json(update).send().await?;

        self.handle_empty_response(response).await
    }
}
