use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use wt_protocol::BodyKind;

pub type OwnerId = i64;

pub const MIN_HTTP_CODE: i64 = 100;
pub const MAX_HTTP_CODE: i64 = 599;
pub const MAX_DELAY_MS: i64 = 60_000;
pub const MAX_ENDPOINT_NAME_LEN: usize = 100;

/// Postgres text and jsonb reject NUL, so it is kept as U+FFFD.
pub fn storable_text(text: &str) -> String {
    text.replace('\0', "\u{FFFD}")
}

/// [`storable_text`] applied to every string and key of a JSON value.
pub fn storable_value(value: Value) -> Value {
    match value {
        Value::String(text) if text.contains('\0') => Value::String(storable_text(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(storable_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (storable_text(&key), storable_value(value)))
                .collect(),
        ),
        other => other,
    }
}

/// A captured request before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCapturedEvent {
    pub owner_id: OwnerId,
    pub channel_id: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body_kind: BodyKind,
    pub body: Value,
    pub query_params: BTreeMap<String, String>,
    pub captured_at: DateTime<Utc>,
    pub client_ip: Option<String>,
}

/// One canned response of a sequence endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub http_code: u16,
    pub delay_ms: u32,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// A named mock that cycles through its steps on every invocation.
///
/// `current_index` is always in `0..sequence_config.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceEndpoint {
    pub id: i64,
    pub owner_id: OwnerId,
    pub endpoint_name: String,
    pub description: String,
    pub sequence_config: Vec<SequenceStep>,
    pub current_index: usize,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSequenceEndpoint {
    pub endpoint_name: String,
    pub description: String,
    pub steps: Vec<SequenceStep>,
}

/// Partial update; `steps: Some(..)` also rewinds the cursor to 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceEndpointPatch {
    pub endpoint_name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<SequenceStep>>,
    pub is_active: Option<bool>,
}

impl SequenceEndpointPatch {
    pub fn is_empty(&self) -> bool {
        self.endpoint_name.is_none()
            && self.description.is_none()
            && self.steps.is_none()
            && self.is_active.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StepValidationError {
    /// Offending step index, when the problem is inside one step.
    pub step: Option<usize>,
    pub field: &'static str,
    pub message: String,
}

impl StepValidationError {
    fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            step: None,
            field,
            message: message.into(),
        }
    }

    fn step(step: usize, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            step: Some(step),
            field,
            message: message.into(),
        }
    }
}

/// Validate a `sequence_config` array.
pub fn parse_steps(raw: Option<&Value>) -> Result<Vec<SequenceStep>, StepValidationError> {
    let items = match raw {
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(StepValidationError::field(
                "sequence_config",
                "sequence_config must be an array",
            ))
        }
        None => {
            return Err(StepValidationError::field(
                "sequence_config",
                "sequence_config is required",
            ))
        }
    };
    if items.is_empty() {
        return Err(StepValidationError::field(
            "sequence_config",
            "at least one step is required",
        ));
    }
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_step(idx, item))
        .collect()
}

fn parse_step(idx: usize, item: &Value) -> Result<SequenceStep, StepValidationError> {
    let Some(obj) = item.as_object() else {
        return Err(StepValidationError::step(idx, "step", "step must be an object"));
    };

    let http_code = match obj.get("http_code") {
        Some(value) => value.as_i64().ok_or_else(|| {
            StepValidationError::step(idx, "http_code", "http_code must be an integer")
        })?,
        None => {
            return Err(StepValidationError::step(
                idx,
                "http_code",
                "http_code is required",
            ))
        }
    };
    if !(MIN_HTTP_CODE..=MAX_HTTP_CODE).contains(&http_code) {
        return Err(StepValidationError::step(
            idx,
            "http_code",
            format!("http_code must be between {MIN_HTTP_CODE} and {MAX_HTTP_CODE}"),
        ));
    }

    let delay_ms = match obj.get("delay_ms") {
        None | Some(Value::Null) => 0,
        Some(value) => value.as_i64().ok_or_else(|| {
            StepValidationError::step(idx, "delay_ms", "delay_ms must be an integer")
        })?,
    };
    if !(0..=MAX_DELAY_MS).contains(&delay_ms) {
        return Err(StepValidationError::step(
            idx,
            "delay_ms",
            format!("delay_ms must be between 0 and {MAX_DELAY_MS}"),
        ));
    }

    let payload = match obj.get("payload") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => Some(serde_json::from_str::<Value>(text).map_err(|err| {
            StepValidationError::step(idx, "payload", format!("payload is not valid JSON: {err}"))
        })?),
        Some(other) => Some(other.clone()),
    }
    .map(storable_value);

    // Both ranges were checked above.
    Ok(SequenceStep {
        http_code: u16::try_from(http_code).unwrap_or(500),
        delay_ms: u32::try_from(delay_ms).unwrap_or(0),
        payload,
    })
}

pub fn parse_endpoint_name(raw: Option<&Value>) -> Result<String, StepValidationError> {
    let Some(name) = raw.and_then(Value::as_str).map(str::trim) else {
        return Err(StepValidationError::field(
            "endpoint_name",
            "endpoint_name is required",
        ));
    };
    if name.is_empty() {
        return Err(StepValidationError::field(
            "endpoint_name",
            "endpoint_name is required",
        ));
    }
    if name.chars().count() > MAX_ENDPOINT_NAME_LEN {
        return Err(StepValidationError::field(
            "endpoint_name",
            format!("endpoint_name must be at most {MAX_ENDPOINT_NAME_LEN} characters"),
        ));
    }
    if name.contains('/') {
        return Err(StepValidationError::field(
            "endpoint_name",
            "endpoint_name must not contain '/'",
        ));
    }
    if name.contains('\0') {
        return Err(StepValidationError::field(
            "endpoint_name",
            "endpoint_name must not contain NUL",
        ));
    }
    Ok(name.to_owned())
}

pub fn parse_description(raw: Option<&Value>) -> Result<Option<String>, StepValidationError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(storable_text(text.trim()))),
        Some(_) => Err(StepValidationError::field(
            "description",
            "description must be a string",
        )),
    }
}
