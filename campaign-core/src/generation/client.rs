use super::{
    extract_json, schema, Completion, GenerationError, GenerationRequest, GenerationService,
    OutputSpec, SystemRole,
};
use claude::OutputSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts per call: the first try plus one retry with the same prompt.
const MAX_ATTEMPTS: u32 = 2;

/// Validating front end for a [`GenerationService`].
///
/// Every structured reply is checked against the schema of the requested
/// type before it is deserialized, and optionally against a semantic check.
/// Failures are retried once with the identical prompt, then propagated.
#[derive(Clone)]
pub struct GenerationClient {
    service: Arc<dyn GenerationService>,
}

impl GenerationClient {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    /// Free-text generation.
    pub async fn text(
        &self,
        role: SystemRole,
        prompt: impl Into<String>,
    ) -> Result<String, GenerationError> {
        let request = GenerationRequest::text(role, prompt);
        self.with_retry(&request, |completion| {
            let text = completion.into_text();
            if text.trim().is_empty() {
                return Err(GenerationError::MalformedOutput("empty reply".into()));
            }
            Ok(text.trim().to_string())
        })
        .await
    }

    /// Structured generation into `T`.
    pub async fn structured<T>(
        &self,
        role: SystemRole,
        prompt: impl Into<String>,
    ) -> Result<T, GenerationError>
    where
        T: OutputSchema + DeserializeOwned,
    {
        self.structured_checked(role, prompt, |_: &T| Ok(())).await
    }

    /// Structured generation into `T`, additionally requiring `check` to pass.
    pub async fn structured_checked<T, F>(
        &self,
        role: SystemRole,
        prompt: impl Into<String>,
        check: F,
    ) -> Result<T, GenerationError>
    where
        T: OutputSchema + DeserializeOwned,
        F: Fn(&T) -> Result<(), String>,
    {
        let spec = OutputSpec::of::<T>();
        let request = GenerationRequest::structured(role, prompt, spec.clone());
        self.with_retry(&request, |completion| {
            let value = match completion {
                Completion::Structured(value) => value,
                Completion::Text(text) => parse_json_reply(&text)?,
            };
            schema::validate(&value, &spec.schema).map_err(|e| {
                GenerationError::MalformedOutput(format!("{}: {e}", spec.name))
            })?;
            let parsed: T = serde_json::from_value(value).map_err(|e| {
                GenerationError::MalformedOutput(format!("{}: {e}", spec.name))
            })?;
            check(&parsed).map_err(|e| {
                GenerationError::MalformedOutput(format!("{}: {e}", spec.name))
            })?;
            Ok(parsed)
        })
        .await
    }

    async fn with_retry<T>(
        &self,
        request: &GenerationRequest,
        interpret: impl Fn(Completion) -> Result<T, GenerationError>,
    ) -> Result<T, GenerationError> {
        let mut attempt = 1;
        loop {
            let result = match self.service.complete(request.clone()).await {
                Ok(completion) => interpret(completion),
                Err(err) => Err(err),
            };
            match result {
                Ok(value) => {
                    debug!(role = request.role.name(), attempt, "generation succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(role = request.role.name(), attempt, error = %err, "generation failed, retrying");
                    attempt += 1;
                }
                Err(err) => {
                    warn!(role = request.role.name(), attempt, error = %err, "generation failed");
                    return Err(err);
                }
            }
        }
    }
}

fn parse_json_reply(text: &str) -> Result<Value, GenerationError> {
    serde_json::from_str(extract_json(text))
        .map_err(|e| GenerationError::MalformedOutput(format!("reply is not JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::outputs::QuestionJudgement;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies from a fixed queue and counts calls.
    struct Queue {
        replies: Mutex<Vec<Result<Completion, GenerationError>>>,
        calls: Mutex<Vec<GenerationRequest>>,
    }

    impl Queue {
        fn new(mut replies: Vec<Result<Completion, GenerationError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationService for Queue {
        async fn complete(
            &self,
            request: GenerationRequest,
        ) -> Result<Completion, GenerationError> {
            self.calls.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(GenerationError::Unavailable("queue empty".into())))
        }
    }

    #[tokio::test]
    async fn test_structured_validates_and_parses() {
        let queue = Queue::new(vec![Ok(Completion::Structured(serde_json::json!({
            "is_reasonable": true,
            "entities": ["Harbor"]
        })))]);
        let client = GenerationClient::new(queue.clone());

        let judgement: QuestionJudgement = client
            .structured(SystemRole::GameMaster, "is it reasonable?")
            .await
            .unwrap();
        assert!(judgement.is_reasonable);
        assert_eq!(judgement.entities, vec!["Harbor"]);
        assert_eq!(queue.call_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_retried_once() {
        let queue = Queue::new(vec![
            Ok(Completion::Structured(serde_json::json!({"entities": "oops"}))),
            Ok(Completion::Text(
                "```json\n{\"is_reasonable\": false, \"entities\": []}\n```".into(),
            )),
        ]);
        let client = GenerationClient::new(queue.clone());

        let judgement: QuestionJudgement = client
            .structured(SystemRole::GameMaster, "prompt")
            .await
            .unwrap();
        assert!(!judgement.is_reasonable);
        assert_eq!(queue.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_propagates_after_one_retry() {
        let queue = Queue::new(vec![
            Err(GenerationError::Unavailable("down".into())),
            Err(GenerationError::Unavailable("still down".into())),
            Ok(Completion::Text("never reached".into())),
        ]);
        let client = GenerationClient::new(queue.clone());

        let err = client.text(SystemRole::GameDesigner, "outline").await.unwrap_err();
        assert_eq!(err, GenerationError::Unavailable("still down".into()));
        assert_eq!(queue.call_count(), 2);

        let calls = queue.calls.lock().unwrap();
        assert_eq!(calls[0].prompt, calls[1].prompt);
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_retried() {
        let queue = Queue::new(vec![
            Err(GenerationError::Rejected("API returned 400: bad schema".into())),
            Ok(Completion::Text("never reached".into())),
        ]);
        let client = GenerationClient::new(queue.clone());

        let err = client.text(SystemRole::GameDesigner, "outline").await.unwrap_err();
        assert!(matches!(err, GenerationError::Rejected(_)));
        assert_eq!(queue.call_count(), 1);
    }

    #[tokio::test]
    async fn test_semantic_check_failure_is_malformed() {
        let reply = || {
            Ok(Completion::Structured(serde_json::json!({
                "is_reasonable": true,
                "entities": []
            })))
        };
        let queue = Queue::new(vec![reply(), reply()]);
        let client = GenerationClient::new(queue);

        let err = client
            .structured_checked(SystemRole::GameMaster, "prompt", |j: &QuestionJudgement| {
                if j.entities.is_empty() {
                    Err("no entities".to_string())
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MalformedOutput(msg) if msg.contains("no entities")));
    }

    #[tokio::test]
    async fn test_blank_text_is_malformed() {
        let queue = Queue::new(vec![
            Ok(Completion::Text("   ".into())),
            Ok(Completion::Text("The tide is out.".into())),
        ]);
        let client = GenerationClient::new(queue);
        let text = client.text(SystemRole::GameMaster, "prompt").await.unwrap();
        assert_eq!(text, "The tide is out.");
    }
}
