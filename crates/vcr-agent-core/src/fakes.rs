//! Scripted generator for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{PipelineError, Result};
use crate::llm::{ChatRequest, ModelClient, FALLBACK_MODEL};

type ErrorFactory = Box<dyn Fn() -> PipelineError + Send + Sync>;

enum Reply {
    Text(String),
    Fail(ErrorFactory),
}

/// Fake [`ModelClient`] answering from a script.
///
/// Replies are consumed in order; the last one repeats once the script runs
/// out. Every request is recorded.
pub struct ScriptedModelClient {
    model: String,
    replies: Mutex<VecDeque<Reply>>,
    delay: Duration,
    resolve_delay: Duration,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModelClient {
    /// Always reply with `text`.
    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_replies(vec![Reply::Text(text.into())])
    }

    /// Always fail with the error built by `make`.
    pub fn failing<F>(make: F) -> Self
    where
        F: Fn() -> PipelineError + Send + Sync + 'static,
    {
        Self::with_replies(vec![Reply::Fail(Box::new(make))])
    }

    fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            model: FALLBACK_MODEL.to_string(),
            replies: Mutex::new(replies.into()),
            delay: Duration::ZERO,
            resolve_delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another text reply after the current ones.
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Reply::Text(text.into()));
        self
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep this long before reporting the model id.
    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_reply(&self) -> Result<String> {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            None
        };
        let reply = reply.as_ref().or_else(|| replies.front());
        match reply {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Fail(make)) => Err(make()),
            None => Err(PipelineError::ModelEmptyResponse),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn endpoint(&self) -> &str {
        "scripted://"
    }

    async fn resolve_model(&self) -> String {
        if !self.resolve_delay.is_zero() {
            tokio::time::sleep(self.resolve_delay).await;
        }
        self.model.clone()
    }

    async fn complete(&self, request: &ChatRequest, _timeout: Duration) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_repeat_last() {
        let client = ScriptedModelClient::replying("first").then_reply("second");
        let req = ChatRequest::new("m", "s", "u");
        let timeout = Duration::from_secs(1);

        assert_eq!(client.complete(&req, timeout).await.unwrap(), "first");
        assert_eq!(client.complete(&req, timeout).await.unwrap(), "second");
        assert_eq!(client.complete(&req, timeout).await.unwrap(), "second");
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_client() {
        let client = ScriptedModelClient::failing(|| PipelineError::ModelHttp {
            status: 429,
            body: "slow down".to_string(),
        });
        let err = client
            .complete(&ChatRequest::new("m", "s", "u"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelHttp { status: 429, .. }));
    }
}
