//! Argument records accepted from the model, and the specs sent to Revit.
//!
//! Model-emitted values are loosely typed: numbers may arrive as strings,
//! ids as integers, points as arrays. Everything is normalized here before
//! a request is built.

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::capabilities::CapabilityError;
use crate::config::{WallDefaults, WindowDefaults};

/// A wall as sent to Revit. Points are "x,y,z" in feet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WallSpec {
    pub start_point: String,
    pub end_point: String,
    pub height: f64,
    pub width: f64,
}

/// A window as sent to Revit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSpec {
    pub wall_id: String,
    pub window_width: f64,
    pub window_height: f64,
    pub distance_from_start: f64,
    pub sill_height: f64,
}

/// One entry of a `wall_configs` batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallTypeChange {
    #[serde(alias = "wall_id", deserialize_with = "id_list")]
    pub wall_ids: Vec<String>,
    pub type_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WallInput {
    #[serde(default, deserialize_with = "opt_point")]
    pub start_point: Option<String>,
    #[serde(default, deserialize_with = "opt_point")]
    pub end_point: Option<String>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub height: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub width: Option<f64>,
}

impl WallInput {
    pub fn resolve(self, defaults: &WallDefaults) -> WallSpec {
        WallSpec {
            start_point: self
                .start_point
                .unwrap_or_else(|| defaults.start_point.clone()),
            end_point: self.end_point.unwrap_or_else(|| defaults.end_point.clone()),
            height: self.height.unwrap_or(defaults.height),
            width: self.width.unwrap_or(defaults.width),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowInput {
    #[serde(default, deserialize_with = "opt_id")]
    pub wall_id: Option<String>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub window_width: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub window_height: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub distance_from_start: Option<f64>,
    #[serde(default, deserialize_with = "opt_f64")]
    pub sill_height: Option<f64>,
}

impl WindowInput {
    /// `None` when the wall id is missing.
    pub fn resolve(self, defaults: &WindowDefaults) -> Option<WindowSpec> {
        Some(WindowSpec {
            wall_id: self.wall_id?,
            window_width: self.window_width.unwrap_or(defaults.window_width),
            window_height: self.window_height.unwrap_or(defaults.window_height),
            distance_from_start: self
                .distance_from_start
                .unwrap_or(defaults.distance_from_start),
            sill_height: self.sill_height.unwrap_or(defaults.sill_height),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WallTypeInput {
    #[serde(default, deserialize_with = "opt_id_list")]
    pub wall_ids: Option<Vec<String>>,
    #[serde(default, deserialize_with = "opt_string")]
    pub type_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ElementsByTypeInput {
    #[serde(default, deserialize_with = "opt_string")]
    pub element_type: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    pub level_name: Option<String>,
    #[serde(default, deserialize_with = "opt_bool")]
    pub include_types: Option<bool>,
}

/// Decode a batch parameter: a JSON-encoded array string (or, leniently,
/// an inline array). Empty strings and nulls count as absent.
pub fn parse_batch<T: DeserializeOwned>(
    field: &'static str,
    value: Option<Value>,
) -> Result<Option<Vec<T>>, CapabilityError> {
    let invalid = |reason: String| CapabilityError::InvalidBatchJson { field, reason };

    let array = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => {
            serde_json::from_str::<Value>(&s).map_err(|e| invalid(e.to_string()))?
        }
        Some(other) => other,
    };

    if !array.is_array() {
        return Err(invalid("expected a JSON array".to_string()));
    }

    serde_json::from_value::<Vec<T>>(array)
        .map(Some)
        .map_err(|e| invalid(e.to_string()))
}

fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| de::Error::custom("number out of range")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("expected a number, got '{}'", s))),
        Some(other) => Err(de::Error::custom(format!(
            "expected a number, got {}",
            other
        ))),
    }
}

fn opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(de::Error::custom(format!("expected a boolean, got '{}'", s))),
        },
        Some(other) => Err(de::Error::custom(format!(
            "expected a boolean, got {}",
            other
        ))),
    }
}

fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(id_from_value))
}

/// Ids as a comma-separated string, a single id, or an array of ids.
fn ids_from_value(value: Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items.into_iter().filter_map(id_from_value).collect(),
        other => id_from_value(other).into_iter().collect(),
    }
}

fn id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(ids_from_value(Value::deserialize(deserializer)?))
}

fn opt_id_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .map(ids_from_value)
        .filter(|ids| !ids.is_empty()))
}

/// Points as "x,y,z" or as a three-number array.
fn opt_point<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Array(items)) => {
            let coords: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_f64().map(|n| n.to_string()))
                .collect();
            coords
                .map(|c| Some(c.join(",")))
                .ok_or_else(|| de::Error::custom("point array must contain numbers"))
        }
        Some(other) => Err(de::Error::custom(format!(
            "expected a point 'x,y,z', got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wall_input_accepts_numeric_strings_and_point_arrays() {
        let input: WallInput = serde_json::from_value(json!({
            "start_point": [0, 5, 0],
            "height": "12",
            "width": 0.3,
            "unrelated": true
        }))
        .unwrap();
        let spec = input.resolve(&WallDefaults::default());

        assert_eq!(spec.start_point, "0,5,0");
        assert_eq!(spec.end_point, "10,0,0");
        assert_eq!(spec.height, 12.0);
        assert_eq!(spec.width, 0.3);
    }

    #[test]
    fn non_numeric_height_is_rejected() {
        let result = serde_json::from_value::<WallInput>(json!({"height": "tall"}));
        assert!(result.is_err());
    }

    #[test]
    fn window_input_without_wall_id_does_not_resolve() {
        let input: WindowInput = serde_json::from_value(json!({"window_width": 2})).unwrap();
        assert!(input.resolve(&WindowDefaults::default()).is_none());
    }

    #[test]
    fn window_input_accepts_integer_wall_id() {
        let input: WindowInput = serde_json::from_value(json!({"wall_id": 347812})).unwrap();
        let spec = input.resolve(&WindowDefaults::default()).unwrap();
        assert_eq!(spec.wall_id, "347812");
        assert_eq!(spec.window_height, 4.0);
        assert_eq!(spec.distance_from_start, 5.0);
    }

    #[test]
    fn wall_ids_accept_comma_string_and_arrays() {
        let from_string: WallTypeInput =
            serde_json::from_value(json!({"wall_ids": "101, 102,,103"})).unwrap();
        assert_eq!(
            from_string.wall_ids.unwrap(),
            vec!["101", "102", "103"]
        );

        let from_array: WallTypeInput =
            serde_json::from_value(json!({"wall_ids": [101, "102"]})).unwrap();
        assert_eq!(from_array.wall_ids.unwrap(), vec!["101", "102"]);

        let empty: WallTypeInput = serde_json::from_value(json!({"wall_ids": ""})).unwrap();
        assert!(empty.wall_ids.is_none());
    }

    #[test]
    fn include_types_accepts_string_booleans() {
        let input: ElementsByTypeInput =
            serde_json::from_value(json!({"element_type": "Door", "include_types": "true"}))
                .unwrap();
        assert_eq!(input.include_types, Some(true));
    }

    #[test]
    fn parse_batch_treats_blank_as_absent() {
        let parsed: Option<Vec<WallTypeChange>> =
            parse_batch("wall_configs", Some(json!("  "))).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_batch_accepts_string_and_inline_arrays() {
        let encoded = r#"[{"wall_id": 5, "type_name": "Generic - 8\""}]"#;
        let parsed: Vec<WallTypeChange> = parse_batch("wall_configs", Some(json!(encoded)))
            .unwrap()
            .unwrap();
        assert_eq!(parsed[0].wall_ids, vec!["5"]);

        let inline: Vec<WallTypeChange> = parse_batch(
            "wall_configs",
            Some(json!([{"wall_ids": "1,2", "type_name": "Exterior"}])),
        )
        .unwrap()
        .unwrap();
        assert_eq!(inline[0].wall_ids, vec!["1", "2"]);
    }

    #[test]
    fn parse_batch_rejects_objects_and_garbage() {
        for value in [json!("{not json"), json!(r#"{"a": 1}"#), json!(42)] {
            let err = parse_batch::<WallTypeChange>("wall_configs", Some(value)).unwrap_err();
            assert!(
                err.to_string().contains("Invalid JSON format"),
                "{}",
                err
            );
        }
    }
}
