//! The closed set of remote operations the assistant can invoke.
//!
//! Each `Capability` owns its argument schema, its validation/defaulting,
//! and how its reply is rendered for the model.

use serde_json::{Map, Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::args::{
    ElementsByTypeInput, WallInput, WallTypeChange, WallTypeInput, WindowInput, WindowSpec,
    parse_batch,
};
use super::transport::{RemoteRequest, RemoteResponse, Transport};
use crate::agent::ToolSchema;
use crate::config::CapabilityDefaults;

/// Local validation failures. The display text is what the model sees.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("Error: Invalid JSON format for '{field}' parameter: {reason}")]
    InvalidBatchJson { field: &'static str, reason: String },

    #[error(
        "Error: wall_ids and type_name: both fields must be provided when wall_configs is not given"
    )]
    MissingWallTypeFields,

    #[error("Error: missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error("Error: invalid arguments for {capability}: {reason}")]
    InvalidArguments {
        capability: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateWall,
    AddWindowToWall,
    GetWallTypes,
    ChangeWallType,
    GetSelectedElements,
    GetElementsByType,
    GetLevelNames,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::CreateWall,
        Capability::AddWindowToWall,
        Capability::GetWallTypes,
        Capability::ChangeWallType,
        Capability::GetSelectedElements,
        Capability::GetElementsByType,
        Capability::GetLevelNames,
    ];

    /// Function name on the wire and in tool schemas.
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateWall => "create_wall",
            Self::AddWindowToWall => "add_window_to_wall",
            Self::GetWallTypes => "get_wall_types",
            Self::ChangeWallType => "change_wall_type",
            Self::GetSelectedElements => "get_selected_elements",
            Self::GetElementsByType => "get_elements_by_type",
            Self::GetLevelNames => "get_level_names",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn schema(self, defaults: &CapabilityDefaults) -> ToolSchema {
        let wall = &defaults.create_wall;
        let window = &defaults.add_window_to_wall;

        let (description, parameters) = match self {
            Self::CreateWall => (
                "Use this only to create one or more walls in Revit. For several walls, \
                 pass them all in 'walls'."
                    .to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "start_point": {
                            "type": "string",
                            "description": format!("Start point in format 'x,y,z' (feet). Default: {}", wall.start_point)
                        },
                        "end_point": {
                            "type": "string",
                            "description": format!("End point in format 'x,y,z' (feet). Default: {}", wall.end_point)
                        },
                        "height": {
                            "type": "number",
                            "description": format!("Height in feet. Default: {}", wall.height)
                        },
                        "width": {
                            "type": "number",
                            "description": format!("Width in feet. Default: {}", wall.width)
                        },
                        "walls": {
                            "type": "string",
                            "description": "Optional JSON-encoded array of walls, each with start_point, \
                                end_point, height and width. When given, the single-wall fields are ignored."
                        }
                    }
                }),
            ),
            Self::AddWindowToWall => (
                "Use this only to add one or more windows to existing walls in Revit.".to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "wall_id": {
                            "type": "string",
                            "description": "ID of the wall to add the window to"
                        },
                        "window_width": {
                            "type": "number",
                            "description": format!("Width of the window in feet. Default: {}", window.window_width)
                        },
                        "window_height": {
                            "type": "number",
                            "description": format!("Height of the window in feet. Default: {}", window.window_height)
                        },
                        "distance_from_start": {
                            "type": "number",
                            "description": format!("Distance from the start of the wall in feet. Default: {}", window.distance_from_start)
                        },
                        "sill_height": {
                            "type": "number",
                            "description": format!("Height of the window sill from the floor level in feet. Default: {}", window.sill_height)
                        },
                        "windows": {
                            "type": "string",
                            "description": "Optional JSON-encoded array of windows, each with wall_id and the \
                                optional size fields. When given, the single-window fields are ignored."
                        }
                    }
                }),
            ),
            Self::GetWallTypes => (
                "Get the names of all wall types available in the current Revit model.".to_string(),
                json!({"type": "object", "properties": {}}),
            ),
            Self::ChangeWallType => (
                "Change the type of existing walls. Give wall_ids and type_name, or a \
                 wall_configs batch for different types per wall."
                    .to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "wall_ids": {
                            "type": "string",
                            "description": "Comma-separated IDs of the walls to change"
                        },
                        "type_name": {
                            "type": "string",
                            "description": "Name of the wall type to apply (see get_wall_types)"
                        },
                        "wall_configs": {
                            "type": "string",
                            "description": "Optional JSON-encoded array of {\"wall_ids\": \"1,2\", \"type_name\": \"...\"} entries"
                        }
                    }
                }),
            ),
            Self::GetSelectedElements => (
                "Get detailed information about the elements currently selected in the Revit UI: \
                 IDs, types, geometry, dimensions and parameters."
                    .to_string(),
                json!({"type": "object", "properties": {}}),
            ),
            Self::GetElementsByType => (
                "Get all elements of a type in the Revit model (Wall, Door, Window, Floor, Ceiling, \
                 Roof, Column, Beam, Room, Grid, Level, Furniture, Pipe, Duct, Stair, ...), \
                 optionally filtered by level."
                    .to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "element_type": {
                            "type": "string",
                            "description": "Type of element to retrieve, e.g. Wall, Door, Window"
                        },
                        "level_name": {
                            "type": "string",
                            "description": "Optional level to filter by. Omit for all levels."
                        },
                        "include_types": {
                            "type": "boolean",
                            "description": "Include element types as well as instances. Default: false"
                        }
                    },
                    "required": ["element_type"]
                }),
            ),
            Self::GetLevelNames => (
                "Get the names of all levels in the current Revit model.".to_string(),
                json!({"type": "object", "properties": {}}),
            ),
        };

        ToolSchema {
            name: self.name().to_string(),
            description,
            parameters,
        }
    }

    /// Validate model arguments, apply defaults, and build the wire request.
    pub fn build_request(
        self,
        mut args: Map<String, Value>,
        defaults: &CapabilityDefaults,
    ) -> Result<RemoteRequest, CapabilityError> {
        let mut out = Map::new();

        match self {
            Self::CreateWall => {
                let batch: Option<Vec<WallInput>> = parse_batch("walls", args.remove("walls"))?;
                match batch {
                    Some(walls) => {
                        let walls: Vec<_> = walls
                            .into_iter()
                            .map(|w| w.resolve(&defaults.create_wall))
                            .collect();
                        out.insert("walls".into(), json!(walls));
                    }
                    None => {
                        let wall = self.decode::<WallInput>(args)?;
                        out = to_map(wall.resolve(&defaults.create_wall));
                    }
                }
            }
            Self::AddWindowToWall => {
                let batch: Option<Vec<WindowInput>> =
                    parse_batch("windows", args.remove("windows"))?;
                match batch {
                    Some(windows) => {
                        let windows = windows
                            .into_iter()
                            .enumerate()
                            .map(|(i, w)| {
                                w.resolve(&defaults.add_window_to_wall).ok_or_else(|| {
                                    CapabilityError::InvalidBatchJson {
                                        field: "windows",
                                        reason: format!("item {} is missing 'wall_id'", i),
                                    }
                                })
                            })
                            .collect::<Result<Vec<WindowSpec>, _>>()?;
                        out.insert("windows".into(), json!(windows));
                    }
                    None => {
                        let window = self
                            .decode::<WindowInput>(args)?
                            .resolve(&defaults.add_window_to_wall)
                            .ok_or(CapabilityError::MissingArgument("wall_id"))?;
                        out = to_map(window);
                    }
                }
            }
            Self::ChangeWallType => {
                let batch: Option<Vec<WallTypeChange>> =
                    parse_batch("wall_configs", args.remove("wall_configs"))?;
                match batch {
                    Some(configs) => {
                        out.insert("wall_configs".into(), json!(configs));
                    }
                    None => {
                        let input = self.decode::<WallTypeInput>(args)?;
                        let (Some(wall_ids), Some(type_name)) = (input.wall_ids, input.type_name)
                        else {
                            return Err(CapabilityError::MissingWallTypeFields);
                        };
                        out.insert("wall_ids".into(), json!(wall_ids));
                        out.insert("type_name".into(), json!(type_name));
                    }
                }
            }
            Self::GetElementsByType => {
                let input = self.decode::<ElementsByTypeInput>(args)?;
                let element_type = input
                    .element_type
                    .ok_or(CapabilityError::MissingArgument("element_type"))?;
                out.insert("element_type".into(), json!(element_type));
                out.insert(
                    "include_types".into(),
                    json!(input.include_types.unwrap_or(false)),
                );
                if let Some(level) = input.level_name {
                    out.insert("level_name".into(), json!(level));
                }
            }
            Self::GetWallTypes | Self::GetSelectedElements | Self::GetLevelNames => {}
        }

        Ok(RemoteRequest::function(self.name(), out))
    }

    fn decode<T: serde::de::DeserializeOwned>(
        self,
        args: Map<String, Value>,
    ) -> Result<T, CapabilityError> {
        serde_json::from_value(Value::Object(args)).map_err(|e| {
            CapabilityError::InvalidArguments {
                capability: self.name(),
                reason: e.to_string(),
            }
        })
    }

    /// Render a Revit reply as the text handed back to the model.
    pub fn format_reply(self, response: &RemoteResponse) -> String {
        let message = if response.message.is_empty() {
            "No message returned".to_string()
        } else {
            response.message.clone()
        };

        match self {
            Self::CreateWall => with_ids(message, "Created elements", &response.element_ids),
            Self::AddWindowToWall => {
                with_ids(message, "Created window elements", &response.element_ids)
            }
            Self::ChangeWallType => with_ids(message, "Modified elements", &response.element_ids),
            Self::GetWallTypes => match string_list(response.extra.get("WallTypes")) {
                Some(types) => format!("{}\nWall types: {}", message, types.join(", ")),
                None => message,
            },
            Self::GetSelectedElements => message,
            Self::GetElementsByType => match response.extra.get("Elements") {
                Some(Value::String(s)) => s.clone(),
                Some(elements) => {
                    let rendered = serde_json::to_string_pretty(elements)
                        .unwrap_or_else(|_| elements.to_string());
                    if response.message.is_empty() {
                        rendered
                    } else {
                        format!("{}\n{}", response.message, rendered)
                    }
                }
                None if response.message.is_empty() => "No elements returned".to_string(),
                None => message,
            },
            Self::GetLevelNames => match string_list(response.extra.get("Levels")) {
                Some(levels) => format!("{}\nLevel names: {}", response.message, levels.join(", ")),
                None if response.message.is_empty() => "Failed to retrieve levels".to_string(),
                None => message,
            },
        }
    }
}

fn to_map<T: serde::Serialize>(value: T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn with_ids(message: String, verb: &str, ids: &[String]) -> String {
    if ids.is_empty() {
        message
    } else {
        format!("{} {} with IDs: {}", message, verb, ids.join(", "))
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
    )
}

/// Name-keyed dispatch over `Capability`, bound to one transport.
pub struct CapabilityRegistry {
    transport: Arc<dyn Transport>,
    defaults: CapabilityDefaults,
}

impl CapabilityRegistry {
    pub fn new(transport: Arc<dyn Transport>, defaults: CapabilityDefaults) -> Self {
        Self {
            transport,
            defaults,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Capability> {
        Capability::from_name(name)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        Capability::ALL
            .into_iter()
            .map(|c| c.schema(&self.defaults))
            .collect()
    }

    /// Run a capability with the model's JSON argument text.
    /// Validation failures come back as text and never reach Revit.
    pub async fn execute(&self, capability: Capability, arguments: &str) -> String {
        let args = match parse_arguments(capability, arguments) {
            Ok(args) => args,
            Err(e) => return e.to_string(),
        };

        let request = match capability.build_request(args, &self.defaults) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejected {} call: {}", capability.name(), e);
                return e.to_string();
            }
        };

        let response = self.transport.send(&request).await;
        capability.format_reply(&response)
    }
}

fn parse_arguments(
    capability: Capability,
    arguments: &str,
) -> Result<Map<String, Value>, CapabilityError> {
    if arguments.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(CapabilityError::InvalidArguments {
            capability: capability.name(),
            reason: format!("expected a JSON object, got {}", other),
        }),
        Err(e) => Err(CapabilityError::InvalidArguments {
            capability: capability.name(),
            reason: e.to_string(),
        }),
    }
}
