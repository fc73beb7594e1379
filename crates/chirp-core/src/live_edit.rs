//! Converge one outbound message toward the accumulated reply text
//! without flooding a rate-limited edit endpoint.
//!
//! While fragments arrive, at most one edit is in flight; fragments that
//! land mid-edit only grow the accumulator and ride along with the next
//! fire. After the stream ends, a corrective loop retries the final text
//! with linearly growing backoff until it lands or the budget runs out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::registry::RetryPolicy;
use crate::surface::{Messenger, SurfaceError};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const NOT_RESPONDING_NOTICE: &str = "(not responding)";

pub struct LiveEditReconciler<M> {
    messenger: M,
    channel_id: String,
    message_id: String,
    retry: RetryPolicy,
    base_delay: Duration,
    text: String,
    edit_gate: Arc<Mutex<()>>,
}

impl<M> LiveEditReconciler<M>
where
    M: Messenger + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        messenger: M,
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            messenger,
            channel_id: channel_id.into(),
            message_id: message_id.into(),
            retry,
            base_delay: DEFAULT_BASE_DELAY,
            text: String::new(),
            edit_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Override the backoff base delay (tests use milliseconds).
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Text accumulated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Append a fragment and, unless an edit is already in flight, fire an
    /// edit with the current accumulator. In-flight edit failures are only
    /// logged; the final pass in [`Self::finish`] corrects them.
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);

        if let Ok(permit) = Arc::clone(&self.edit_gate).try_lock_owned() {
            let messenger = self.messenger.clone();
            let channel_id = self.channel_id.clone();
            let message_id = self.message_id.clone();
            let text = self.text.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = messenger.edit_message(&channel_id, &message_id, &text).await {
                    tracing::warn!("streaming edit failed: {e}");
                }
            });
        }
    }

    /// Wait out any in-flight edit, then retry the complete text until the
    /// message displays it or the budget is exhausted. On exhaustion the
    /// message is replaced with a terminal notice, itself best-effort.
    ///
    /// # Errors
    ///
    /// Returns the last edit failure when the retry budget runs out.
    pub async fn finish(self) -> Result<(), SurfaceError> {
        drop(self.edit_gate.lock().await);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self
                .messenger
                .edit_message(&self.channel_id, &self.message_id, &self.text)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if self.retry.exhausted(attempt) {
                        tracing::error!(
                            "giving up on message {} after {attempt} edit attempts: {e}",
                            self.message_id
                        );
                        if let Err(notice_err) = self
                            .messenger
                            .edit_message(&self.channel_id, &self.message_id, NOT_RESPONDING_NOTICE)
                            .await
                        {
                            tracing::warn!("terminal notice also failed: {notice_err}");
                        }
                        return Err(e);
                    }
                    tracing::warn!("final edit attempt {attempt} failed: {e}, backing off");
                    tokio::time::sleep(self.base_delay * attempt).await;
                }
            }
        }
    }
}
