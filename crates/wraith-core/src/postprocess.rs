//! Postprocessing stages applied to a response after the API round-trips.
//!
//! A closed set: the JSON stage may issue one corrective "nudge" call
//! through the engine, so stages dispatch through an enum rather than a
//! trait object — the engine access stays compile-checked.

use serde_json::Value;

use crate::error::ScrapeError;
use crate::request::RequestEngine;
use crate::response::{Payload, Response};
use crate::traits::{ChatMessage, CompletionProvider};

/// What a stage gets to see besides the response itself.
pub struct PostContext<'a, P: CompletionProvider> {
    pub engine: &'a RequestEngine<P>,
    /// Canonical schema string, embedded in repair instructions.
    pub schema: &'a str,
    /// Preprocessed source document; only available for unsplit scrapes.
    pub source: Option<&'a str>,
}

/// One postprocessing stage.
pub enum PostStage {
    Json(JsonPostprocessor),
    Validate(SchemaValidator),
    Hallucination(HallucinationChecker),
}

impl PostStage {
    pub fn name(&self) -> &'static str {
        match self {
            PostStage::Json(_) => "json",
            PostStage::Validate(_) => "validate",
            PostStage::Hallucination(_) => "hallucination",
        }
    }

    pub async fn apply<P: CompletionProvider>(
        &self,
        response: Response,
        ctx: &PostContext<'_, P>,
    ) -> Result<Response, ScrapeError> {
        match self {
            PostStage::Json(stage) => stage.apply(response, ctx).await,
            PostStage::Validate(stage) => stage.apply(response),
            PostStage::Hallucination(stage) => stage.apply(response, ctx.source),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON parsing with one-shot repair
// ---------------------------------------------------------------------------

/// Parses the raw model output into JSON, optionally repairing malformed
/// output with a single corrective call ("nudge").
///
/// The repair is bounded at depth 1: its output is re-parsed once and is
/// never itself eligible for another repair.
pub struct JsonPostprocessor {
    pub nudge: bool,
}

impl JsonPostprocessor {
    pub fn new(nudge: bool) -> Self {
        Self { nudge }
    }

    async fn apply<P: CompletionProvider>(
        &self,
        mut response: Response,
        ctx: &PostContext<'_, P>,
    ) -> Result<Response, ScrapeError> {
        let Payload::Text(raw) = response.data.clone() else {
            return Err(ScrapeError::Postprocessing(format!(
                "response data is not raw text: {:?}",
                response.data
            )));
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(parsed) => {
                response.data = Payload::Json(parsed);
                Ok(response)
            }
            Err(_) if self.nudge => {
                tracing::warn!(len = raw.len(), "model output is not JSON, nudging");
                let mut response = self.nudge_json(&raw, response, ctx).await?;
                let Payload::Text(repaired) = response.data.clone() else {
                    return Err(ScrapeError::Postprocessing(format!(
                        "repair produced no raw text: {:?}",
                        response.data
                    )));
                };
                match serde_json::from_str::<Value>(&repaired) {
                    Ok(parsed) => {
                        response.data = Payload::Json(parsed);
                        Ok(response)
                    }
                    Err(_) => Err(ScrapeError::InvalidJson(repaired)),
                }
            }
            Err(_) => Err(ScrapeError::InvalidJson(raw)),
        }
    }

    /// One corrective call demonstrating the contract with a worked
    /// example, accounted into the same response.
    async fn nudge_json<P: CompletionProvider>(
        &self,
        raw: &str,
        mut response: Response,
        ctx: &PostContext<'_, P>,
    ) -> Result<Response, ScrapeError> {
        let messages = vec![
            ChatMessage::system(format!(
                "When you receive invalid JSON, respond only with valid JSON \
                 matching the schema: {}",
                ctx.schema
            )),
            ChatMessage::system("Only reply with JSON, nothing else."),
            ChatMessage::user("{'bad': 'json', }"),
            ChatMessage::assistant("{\"bad\": \"json\"}"),
            ChatMessage::user(raw),
        ];
        let spec = ctx.engine.first_model()?;
        ctx.engine.raw_request(spec, messages, &mut response).await?;
        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// JSON Schema validation
// ---------------------------------------------------------------------------

/// Validates parsed data against a compiled JSON Schema, reporting the
/// failing instance paths.
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new(schema: &Value) -> Result<Self, ScrapeError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| ScrapeError::Postprocessing(format!("invalid JSON schema: {e}")))?;
        Ok(Self { validator })
    }

    fn apply(&self, response: Response) -> Result<Response, ScrapeError> {
        let Payload::Json(value) = &response.data else {
            return Err(ScrapeError::Postprocessing(
                "schema validation expects parsed JSON, ensure the JSON stage runs first".into(),
            ));
        };

        let failures: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| format!("{}: {e}", e.instance_path()))
            .collect();
        if failures.is_empty() {
            Ok(response)
        } else {
            Err(ScrapeError::Postprocessing(format!(
                "schema validation failed: {}",
                failures.join("; ")
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Hallucination heuristic
// ---------------------------------------------------------------------------

/// Best-effort check that top-level string values occur verbatim in the
/// source document. Requires the unsplit source, so it is incompatible
/// with auto-split scrapes.
#[derive(Debug, Default)]
pub struct HallucinationChecker;

impl HallucinationChecker {
    fn apply(&self, response: Response, source: Option<&str>) -> Result<Response, ScrapeError> {
        let Some(html) = source else {
            return Err(ScrapeError::Postprocessing(
                "hallucination check needs the source document; incompatible with auto-split"
                    .into(),
            ));
        };
        let Payload::Json(Value::Object(map)) = &response.data else {
            return Err(ScrapeError::Postprocessing(
                "hallucination check expects a JSON object, ensure the JSON stage runs first"
                    .into(),
            ));
        };

        for (key, value) in map {
            if let Value::String(s) = value
                && !html.contains(s.as_str())
            {
                return Err(ScrapeError::Postprocessing(format!(
                    "{key}={s} is not present in the source text"
                )));
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestEngine;
    use crate::testutil::{completion, MockProvider};
    use serde_json::json;

    const SCHEMA: &str = "{\"name\": \"string\"}";

    fn ctx<'a>(
        engine: &'a RequestEngine<MockProvider>,
        source: Option<&'a str>,
    ) -> PostContext<'a, MockProvider> {
        PostContext {
            engine,
            schema: SCHEMA,
            source,
        }
    }

    fn text_response(raw: &str) -> Response {
        Response {
            data: Payload::Text(raw.to_string()),
            ..Response::default()
        }
    }

    #[tokio::test]
    async fn parses_valid_json() {
        let engine = RequestEngine::new(MockProvider::default());
        let stage = JsonPostprocessor::new(true);

        let out = stage
            .apply(text_response("{\"name\": \"phil\"}"), &ctx(&engine, None))
            .await
            .unwrap();

        assert_eq!(out.data, Payload::Json(json!({"name": "phil"})));
    }

    #[tokio::test]
    async fn rejects_already_parsed_data() {
        let engine = RequestEngine::new(MockProvider::default());
        let stage = JsonPostprocessor::new(true);
        let response = Response {
            data: Payload::Json(json!({})),
            ..Response::default()
        };

        let err = stage.apply(response, &ctx(&engine, None)).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Postprocessing(_)));
    }

    #[tokio::test]
    async fn no_nudge_fails_immediately() {
        let provider = MockProvider::with_script(vec![]);
        let engine = RequestEngine::new(provider.clone());
        let stage = JsonPostprocessor::new(false);

        let err = stage
            .apply(text_response("{'name': 'phil', }"), &ctx(&engine, None))
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::InvalidJson(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn nudge_makes_exactly_one_repair_call() {
        let provider = MockProvider::with_script(vec![Ok(completion("{\"name\": \"phil\"}"))]);
        let engine = RequestEngine::new(provider.clone());
        let stage = JsonPostprocessor::new(true);

        let out = stage
            .apply(text_response("{'name': 'phil', }"), &ctx(&engine, None))
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(out.data, Payload::Json(json!({"name": "phil"})));
        // the repair call's payload and usage land on the same response
        assert_eq!(out.api_responses.len(), 1);
        assert_eq!(out.total_prompt_tokens, 1);
    }

    #[tokio::test]
    async fn nudge_passes_the_malformed_text_through() {
        let provider = MockProvider::with_script(vec![Ok(completion("{}"))]);
        let engine = RequestEngine::new(provider.clone());
        let stage = JsonPostprocessor::new(true);

        stage
            .apply(text_response("{'bad': 1, }"), &ctx(&engine, None))
            .await
            .unwrap();

        let requests = provider.requests();
        let last = requests[0].messages.last().unwrap();
        assert_eq!(last.content, "{'bad': 1, }");
        // repair goes to the first candidate model
        assert_eq!(requests[0].model, "gpt-3.5-turbo");
    }

    #[tokio::test]
    async fn failed_nudge_raises_invalid_json_without_recursing() {
        let provider = MockProvider::with_script(vec![Ok(completion("{\"name\": \"phil"))]);
        let engine = RequestEngine::new(provider.clone());
        let stage = JsonPostprocessor::new(true);

        let err = stage
            .apply(text_response("{'name': 'phil', }"), &ctx(&engine, None))
            .await
            .unwrap_err();

        // one repair attempt, never a second
        assert_eq!(provider.call_count(), 1);
        match err {
            ScrapeError::InvalidJson(raw) => assert_eq!(raw, "{\"name\": \"phil"),
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn validator_accepts_matching_data() {
        let validator = SchemaValidator::new(&json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"],
        }))
        .unwrap();
        let response = Response {
            data: Payload::Json(json!({"name": "phil"})),
            ..Response::default()
        };

        assert!(validator.apply(response).is_ok());
    }

    #[test]
    fn validator_reports_failing_paths() {
        let validator = SchemaValidator::new(&json!({
            "type": "object",
            "properties": {"age": {"type": "integer"}},
        }))
        .unwrap();
        let response = Response {
            data: Payload::Json(json!({"age": "forty"})),
            ..Response::default()
        };

        let err = validator.apply(response).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/age"), "missing path in: {message}");
    }

    #[test]
    fn validator_requires_parsed_data() {
        let validator = SchemaValidator::new(&json!({"type": "object"})).unwrap();
        let err = validator
            .apply(text_response("{\"name\": \"phil\"}"))
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Postprocessing(_)));
    }

    #[test]
    fn hallucination_check_accepts_grounded_strings() {
        let response = Response {
            data: Payload::Json(json!({"name": "phil"})),
            ..Response::default()
        };
        let out = HallucinationChecker.apply(response, Some("<b>phil</b>"));
        assert!(out.is_ok());
    }

    #[test]
    fn hallucination_check_rejects_invented_strings() {
        let response = Response {
            data: Payload::Json(json!({"name": "someone else"})),
            ..Response::default()
        };
        let err = HallucinationChecker
            .apply(response, Some("<b>phil</b>"))
            .unwrap_err();
        assert!(err.to_string().contains("someone else"));
    }

    #[test]
    fn hallucination_check_requires_source() {
        let response = Response {
            data: Payload::Json(json!({"name": "phil"})),
            ..Response::default()
        };
        let err = HallucinationChecker.apply(response, None).unwrap_err();
        assert!(matches!(err, ScrapeError::Postprocessing(_)));
    }
}
