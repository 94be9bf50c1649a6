//! The response accumulator and multi-chunk combination.

use std::time::Duration;

use serde_json::Value;

/// Data payload of a scrape, tracked through its states.
///
/// Transitions only forward: `Empty` → `Text` (raw model output) →
/// `Json` (after parsing/validation).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Json(Value),
}

impl Payload {
    /// The parsed value, if this payload has reached the `Json` state.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }
}

/// Accumulator for one logical scrape, possibly spanning several calls.
///
/// All modifications are additive so the same instance can absorb the
/// primary call, a nudge repair, and further chunks; the numeric fields
/// are monotonically non-decreasing within one scrape.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Source URL, when the scrape started from one.
    pub url: Option<String>,
    /// Raw provider payloads, in call order.
    pub api_responses: Vec<Value>,
    pub total_cost: f64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    /// Wall-clock time spent inside provider calls.
    pub api_time: Duration,
    pub data: Payload,
}

impl Response {
    /// Deserialize the parsed payload into a typed value.
    ///
    /// Fails with [`crate::error::ScrapeError::Postprocessing`] when the
    /// data has not reached the `Json` state yet, and with a field-level
    /// serde error when the shape does not match `T`.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::error::ScrapeError> {
        match &self.data {
            Payload::Json(value) => {
                serde_json::from_value(value.clone()).map_err(crate::error::ScrapeError::from)
            }
            _ => Err(crate::error::ScrapeError::Postprocessing(
                "response data is not parsed JSON yet".into(),
            )),
        }
    }

    /// Fold another response's raw payloads and accounting into this one.
    /// `data` is left untouched; the caller decides how payloads merge.
    pub fn absorb_accounting(&mut self, other: Response) {
        self.api_responses.extend(other.api_responses);
        self.total_cost += other.total_cost;
        self.total_prompt_tokens += other.total_prompt_tokens;
        self.total_completion_tokens += other.total_completion_tokens;
        self.api_time += other.api_time;
    }
}

/// Merge per-chunk responses of one logical scrape, in chunk order.
///
/// A single chunk passes its data through unchanged; several chunks are
/// flattened into one array (array payloads spliced, scalars pushed).
pub fn combine_responses(url: Option<String>, responses: Vec<Response>) -> Response {
    let mut combined = Response {
        url,
        ..Response::default()
    };

    let multi = responses.len() > 1;
    let mut items: Vec<Value> = Vec::new();
    let mut single: Payload = Payload::Empty;

    for response in responses {
        if multi {
            match &response.data {
                Payload::Json(Value::Array(a)) => items.extend(a.iter().cloned()),
                Payload::Json(v) => items.push(v.clone()),
                Payload::Text(s) => items.push(Value::String(s.clone())),
                Payload::Empty => {}
            }
        } else {
            single = response.data.clone();
        }
        combined.absorb_accounting(response);
    }

    combined.data = if multi {
        Payload::Json(Value::Array(items))
    } else {
        single
    };
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(cost: f64, prompt: u64, completion: u64, data: Payload) -> Response {
        Response {
            api_responses: vec![json!({"id": "resp"})],
            total_cost: cost,
            total_prompt_tokens: prompt,
            total_completion_tokens: completion,
            api_time: Duration::from_millis(250),
            data,
            ..Response::default()
        }
    }

    #[test]
    fn single_chunk_passes_data_through() {
        let data = Payload::Json(json!({"name": "phil"}));
        let combined = combine_responses(None, vec![chunk(0.5, 10, 5, data.clone())]);
        assert_eq!(combined.data, data);
        assert_eq!(combined.total_cost, 0.5);
        assert_eq!(combined.api_responses.len(), 1);
    }

    #[test]
    fn multi_chunk_sums_accounting() {
        let costs = [0.25, 0.5, 1.0];
        let responses = costs
            .iter()
            .map(|&c| chunk(c, 10, 5, Payload::Json(json!([]))))
            .collect();
        let combined = combine_responses(None, responses);
        assert!((combined.total_cost - 1.75).abs() < 1e-12);
        assert_eq!(combined.total_prompt_tokens, 30);
        assert_eq!(combined.total_completion_tokens, 15);
        assert_eq!(combined.api_time, Duration::from_millis(750));
        assert_eq!(combined.api_responses.len(), 3);
    }

    #[test]
    fn multi_chunk_flattens_arrays_in_order() {
        let responses = vec![
            chunk(0.1, 1, 1, Payload::Json(json!([{"n": 1}, {"n": 2}]))),
            chunk(0.1, 1, 1, Payload::Json(json!([{"n": 3}]))),
            chunk(0.1, 1, 1, Payload::Json(json!([{"n": 4}, {"n": 5}]))),
        ];
        let combined = combine_responses(None, responses);
        let items = combined.data.as_json().unwrap().as_array().unwrap();
        let ns: Vec<i64> = items.iter().map(|v| v["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn multi_chunk_pushes_non_array_payloads() {
        let responses = vec![
            chunk(0.1, 1, 1, Payload::Json(json!({"n": 1}))),
            chunk(0.1, 1, 1, Payload::Json(json!([{"n": 2}]))),
        ];
        let combined = combine_responses(None, responses);
        let items = combined.data.as_json().unwrap().as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], json!({"n": 1}));
        assert_eq!(items[1], json!({"n": 2}));
    }

    #[test]
    fn data_as_deserializes_parsed_payloads() {
        #[derive(serde::Deserialize)]
        struct Listing {
            name: String,
            price: u32,
        }

        let response = Response {
            data: Payload::Json(json!({"name": "casa", "price": 100})),
            ..Response::default()
        };
        let listing: Listing = response.data_as().unwrap();
        assert_eq!(listing.name, "casa");
        assert_eq!(listing.price, 100);

        let raw = Response {
            data: Payload::Text("{}".into()),
            ..Response::default()
        };
        assert!(raw.data_as::<Listing>().is_err());
    }

    #[test]
    fn url_is_carried() {
        let combined = combine_responses(
            Some("https://example.com".into()),
            vec![chunk(0.0, 0, 0, Payload::Empty)],
        );
        assert_eq!(combined.url.as_deref(), Some("https://example.com"));
    }
}
