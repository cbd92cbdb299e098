use super::{GenerationBackend, GenerationError, GenerationRequest, GenerationResponse};
use async_trait::async_trait;
use kg_core::message::Message;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Replays a fixed list of assistant replies, one per request.
///
/// Running out of replies is an [`GenerationError::EmptyResponse`]. Every request's
/// conversation is recorded so tests can inspect what the model was shown.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            seen: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before answering each request.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Conversations passed to each request so far.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<GenerationResponse, GenerationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.messages.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| GenerationError::Http(e.to_string()))?
            .pop_front();
        next.map(GenerationResponse::text)
            .ok_or(GenerationError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
