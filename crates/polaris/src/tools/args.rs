//! Typed, forgiving decoding of model-generated tool arguments
//!
//! Models sometimes omit keys, send `null`, or use the wrong JSON type. Every
//! field here falls back to its default instead of failing the whole call;
//! only text that is not a JSON object at all is rejected.
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{ToolError, ToolResult};

/// Decode raw argument text into a typed argument struct
pub fn decode<T: DeserializeOwned + Default>(raw: &str) -> ToolResult<T> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ToolError::InvalidArguments(format!("failed to parse arguments: {}", e)))?;
    match value {
        Value::Null => Ok(T::default()),
        Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| ToolError::InvalidArguments(e.to_string())),
        other => Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Accept any JSON value, keeping it only if it has the expected type
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Integers may arrive as floats (`3.0`) or numeric strings (`"3"`)
fn lenient_int<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number
        .filter(|n| n.is_finite())
        .map(|n| n.trunc().clamp(i32::MIN as f64, i32::MAX as f64) as i32)
        .unwrap_or_default())
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NamespaceArgs {
    #[serde(deserialize_with = "lenient")]
    pub namespace: String,
}

impl NamespaceArgs {
    /// `None` when the model wants every namespace
    pub fn namespace(&self) -> Option<&str> {
        non_empty(&self.namespace)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResourceArgs {
    #[serde(deserialize_with = "lenient")]
    pub namespace: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeArgs {
    #[serde(deserialize_with = "lenient")]
    pub name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PodLogsArgs {
    #[serde(deserialize_with = "lenient")]
    pub namespace: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub container: String,
}

impl PodLogsArgs {
    pub fn container(&self) -> Option<&str> {
        non_empty(&self.container)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventsArgs {
    #[serde(deserialize_with = "lenient")]
    pub namespace: String,
    #[serde(deserialize_with = "lenient")]
    pub resource_name: String,
}

impl EventsArgs {
    pub fn namespace(&self) -> Option<&str> {
        non_empty(&self.namespace)
    }

    pub fn resource_name(&self) -> Option<&str> {
        non_empty(&self.resource_name)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScaleArgs {
    #[serde(deserialize_with = "lenient")]
    pub namespace: String,
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient_int")]
    pub replicas: i32,
}

/// The confirmation flag shared by every mutating tool
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Confirmation {
    #[serde(deserialize_with = "lenient")]
    pub confirmed: bool,
}
