//! Schema inputs and their one-time resolution.

use serde_json::Value;

use crate::error::ScrapeError;
use crate::postprocess::SchemaValidator;

/// The schema a scraper extracts against, in whichever form the caller
/// holds it.
///
/// Resolved once at scraper construction into a canonical schema string
/// (embedded in the instructions) plus, for `Validated`, a compiled
/// validation stage — the request path never inspects the variant again.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// A JSON value describing the desired shape, sent as-is.
    Object(Value),
    /// A pre-rendered schema string.
    Text(String),
    /// A JSON Schema document; extracted data is validated against it.
    Validated(Value),
}

impl SchemaSource {
    /// The schema string embedded in the LLM instructions.
    ///
    /// `Validated` sources embed a simplified type-name rendering of the
    /// JSON Schema rather than the schema itself: the full grammar costs
    /// tokens and extracts worse than `{"field": "type"}` maps.
    pub fn canonical(&self) -> Result<String, ScrapeError> {
        match self {
            SchemaSource::Object(v) => serde_json::to_string(v).map_err(ScrapeError::from),
            SchemaSource::Validated(v) => {
                serde_json::to_string(&simplify(v).unwrap_or_else(|| v.clone()))
                    .map_err(ScrapeError::from)
            }
            SchemaSource::Text(t) => Ok(t.clone()),
        }
    }

    /// The compiled validation stage, for `Validated` sources.
    pub fn validator(&self) -> Result<Option<SchemaValidator>, ScrapeError> {
        match self {
            SchemaSource::Validated(v) => Ok(Some(SchemaValidator::new(v)?)),
            _ => Ok(None),
        }
    }

    /// The schema as a JSON value. `Text` parses when it holds JSON and
    /// otherwise embeds as a string.
    pub fn to_value(&self) -> Value {
        match self {
            SchemaSource::Object(v) | SchemaSource::Validated(v) => v.clone(),
            SchemaSource::Text(t) => {
                serde_json::from_str(t).unwrap_or_else(|_| Value::String(t.clone()))
            }
        }
    }
}

/// Reduce a JSON Schema object to a `{"field": "type"}` map.
///
/// Arrays become `list[item]`, nested objects recurse. Returns `None`
/// for shapes that are not a recognizable object schema.
fn simplify(schema: &Value) -> Option<Value> {
    let properties = schema.get("properties")?.as_object()?;
    let mut simple = serde_json::Map::new();
    for (field, prop) in properties {
        simple.insert(field.clone(), simplify_property(prop));
    }
    Some(Value::Object(simple))
}

fn simplify_property(prop: &Value) -> Value {
    match prop.get("type").and_then(Value::as_str) {
        Some("object") => simplify(prop).unwrap_or_else(|| Value::String("object".into())),
        Some("array") => {
            let item = prop
                .get("items")
                .map(simplify_property)
                .unwrap_or(Value::String("any".into()));
            match item {
                Value::String(name) => Value::String(format!("list[{name}]")),
                nested => Value::Array(vec![nested]),
            }
        }
        Some(name) => Value::String(name.to_string()),
        None => Value::String("any".into()),
    }
}

impl From<Value> for SchemaSource {
    fn from(value: Value) -> Self {
        SchemaSource::Object(value)
    }
}

impl From<&str> for SchemaSource {
    fn from(text: &str) -> Self {
        SchemaSource::Text(text.to_string())
    }
}

impl From<String> for SchemaSource {
    fn from(text: String) -> Self {
        SchemaSource::Text(text)
    }
}
