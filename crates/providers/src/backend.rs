//! Production response source: forwards strategy calls to a real backend.

use async_trait::async_trait;
use std::sync::Arc;
use swarmclaw_core::error::ProviderError;
use swarmclaw_core::provider::*;
use tracing::{debug, warn};

/// Adapts a [`Provider`] into a [`ResponseSource`].
pub struct BackendSource {
    provider: Arc<dyn Provider>,
}

impl BackendSource {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ResponseSource for BackendSource {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn respond(
        &self,
        request: SourceRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(
            provider = %self.provider.name(),
            subroutine = %request.subroutine_id,
            attempt = request.attempt,
            messages = request.request.messages.len(),
            "Forwarding to backend"
        );

        match self.provider.complete(request.request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    provider = %self.provider.name(),
                    subroutine = %request.subroutine_id,
                    error = %e,
                    "Backend call failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use swarmclaw_core::message::Message;

    /// Records every request and answers with its last user message.
    struct EchoProvider {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.seen.lock().unwrap().push(request.model.clone());
            Ok(ProviderResponse::text(last, None))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            Err(ProviderError::RateLimited { retry_after_secs: 1 })
        }
    }

    fn source_request() -> SourceRequest {
        SourceRequest {
            subroutine_id: "draft".into(),
            attempt: 1,
            input: serde_json::json!({}),
            request: ProviderRequest {
                model: "test-model".into(),
                messages: vec![Message::user("ping")],
                temperature: 0.0,
                max_tokens: None,
                tools: vec![],
            },
        }
    }

    #[tokio::test]
    async fn forwards_to_provider() {
        let provider = Arc::new(EchoProvider {
            seen: Mutex::new(Vec::new()),
        });
        let source = BackendSource::new(provider.clone());
        let response = source.respond(source_request()).await.unwrap();
        assert_eq!(response.message.content, "ping");
        assert_eq!(source.name(), "echo");
        assert_eq!(*provider.seen.lock().unwrap(), vec!["test-model".to_string()]);
    }

    #[tokio::test]
    async fn propagates_provider_errors() {
        let source = BackendSource::new(Arc::new(FailingProvider));
        let err = source.respond(source_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }
}
