//! HTTP step executor.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use super::{ActionType, ExecutorError, StepExecutor, StepInvocation, family};

/// Longest error body kept in a step's error message.
const MAX_ERROR_BODY: usize = 512;

/// JSON carried in an HTTP step's payload.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpActionEnvelope {
    pub url: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

impl HttpActionEnvelope {
    pub fn parse(payload: &str) -> Result<Self, ExecutorError> {
        serde_json::from_str(payload).map_err(|e| ExecutorError::MalformedPayload(e.to_string()))
    }
}

/// Calls remote services for `http.{METHOD}.{service}` steps.
#[derive(Debug, Clone)]
pub struct HttpStepExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpStepExecutor {
    /// Creates an executor whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    async fn send(
        &self,
        invocation: &StepInvocation<'_>,
        action_type: &str,
        payload: &str,
        compensating: bool,
    ) -> Result<String, ExecutorError> {
        let ActionType::Http { method, service } = ActionType::parse(action_type)? else {
            return Err(ExecutorError::UnsupportedActionType(action_type.to_string()));
        };
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ExecutorError::MalformedActionType(action_type.to_string()))?;
        let envelope = HttpActionEnvelope::parse(payload)?;

        let step = invocation.step;
        let mut request = self
            .client
            .request(method.clone(), &envelope.url)
            .header("X-Saga-Id", invocation.saga_id.to_string())
            .header("X-Saga-Step-Id", step.id.to_string())
            .header("X-Saga-Step-Name", step.name.as_str())
            .header("X-Correlation-Id", invocation.correlation_id);
        if compensating {
            request = request.header("X-Saga-Compensation", "true");
        }

        let headers = envelope.headers.unwrap_or_default();
        let has_content_type = headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("content-type"));
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = envelope.body {
            if !has_content_type {
                request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
            }
            request = request.body(body);
        }

        tracing::debug!(%method, %service, url = %envelope.url, compensating, "sending step request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout(self.timeout)
            } else if e.is_builder() {
                ExecutorError::MalformedPayload(e.to_string())
            } else {
                ExecutorError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout(self.timeout)
            } else {
                ExecutorError::Transport(e.to_string())
            }
        })?;

        if !status.is_success() {
            return Err(ExecutorError::HttpStatus {
                status: status.as_u16(),
                body: truncate(body, MAX_ERROR_BODY),
            });
        }
        Ok(body)
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[async_trait]
impl StepExecutor for HttpStepExecutor {
    fn name(&self) -> &'static str {
        "http"
    }

    fn can_handle(&self, action_type: &str) -> bool {
        family(action_type) == "http"
    }

    async fn execute(&self, invocation: &StepInvocation<'_>) -> Result<String, ExecutorError> {
        let step = invocation.step;
        self.send(invocation, &step.action_type, &step.action_payload, false)
            .await
    }

    async fn compensate(&self, invocation: &StepInvocation<'_>) -> Result<(), ExecutorError> {
        let (action_type, payload) = invocation.compensation()?;
        self.send(invocation, action_type, payload, true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::saga::{Saga, SagaStep};

    fn executor() -> HttpStepExecutor {
        HttpStepExecutor::new(Duration::from_secs(5)).unwrap()
    }

    fn saga_with(step: SagaStep) -> Saga {
        Saga::new("checkout", "order-42", Duration::from_secs(60)).with_step(step)
    }

    fn envelope(url: String, body: Option<&str>) -> String {
        serde_json::json!({ "url": url, "body": body }).to_string()
    }

    #[tokio::test]
    async fn test_execute_sends_saga_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(header("X-Correlation-Id", "order-42"))
            .and(header("X-Saga-Step-Name", "charge"))
            .and(header_exists("X-Saga-Id"))
            .and(header_exists("X-Saga-Step-Id"))
            .and(header("content-type", "application/json"))
            .and(body_string("{\"amount\":10}"))
            .respond_with(ResponseTemplate::new(201).set_body_string("{\"payment\":\"p-1\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let payload = envelope(
            format!("{}/payments", server.uri()),
            Some("{\"amount\":10}"),
        );
        let saga = saga_with(SagaStep::new("charge", "http.POST.payments", payload));
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);

        let response = executor().execute(&invocation).await.unwrap();
        assert_eq!(response, "{\"payment\":\"p-1\"}");
    }

    #[tokio::test]
    async fn test_envelope_headers_are_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stock"))
            .and(header("Authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let payload = serde_json::json!({
            "url": format!("{}/stock", server.uri()),
            "headers": { "Authorization": "Bearer token" }
        })
        .to_string();
        let saga = saga_with(SagaStep::new("check", "http.get.inventory", payload));
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);

        assert_eq!(executor().execute(&invocation).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_non_success_status_fails_the_step() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let payload = envelope(format!("{}/payments", server.uri()), None);
        let saga = saga_with(SagaStep::new("charge", "http.POST.payments", payload));
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);

        let err = executor().execute(&invocation).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::HttpStatus { status: 502, ref body } if body == "upstream down"
        ));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let payload = envelope(format!("{}/slow", server.uri()), None);
        let saga = saga_with(SagaStep::new("slow", "http.POST.slow", payload));
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);

        let executor = HttpStepExecutor::new(Duration::from_millis(100)).unwrap();
        assert!(matches!(
            executor.execute(&invocation).await,
            Err(ExecutorError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_compensate_uses_compensation_fields() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/reservations/r-1"))
            .and(header("X-Saga-Compensation", "true"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let step = SagaStep::new("reserve", "http.POST.inventory", "{\"url\":\"unused\"}")
            .with_compensation(
                "http.DELETE.inventory",
                envelope(format!("{}/reservations/r-1", server.uri()), None),
            );
        let saga = saga_with(step);
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);

        executor().compensate(&invocation).await.unwrap();
    }

    #[tokio::test]
    async fn test_compensate_without_compensation_is_an_error() {
        let saga = saga_with(SagaStep::new("charge", "http.POST.payments", "{}"));
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);
        assert!(matches!(
            executor().compensate(&invocation).await,
            Err(ExecutorError::MissingCompensation(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_inputs() {
        let saga = saga_with(SagaStep::new("charge", "http.POST.payments", "not json"));
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);
        assert!(matches!(
            executor().execute(&invocation).await,
            Err(ExecutorError::MalformedPayload(_))
        ));

        let saga = saga_with(SagaStep::new("charge", "http.POST", "{\"url\":\"http://x\"}"));
        let invocation = StepInvocation::new(&saga, &saga.steps[0]);
        assert!(matches!(
            executor().execute(&invocation).await,
            Err(ExecutorError::MalformedActionType(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo".to_string(), 2), "h");
        assert_eq!(truncate("short".to_string(), 10), "short");
    }
}
