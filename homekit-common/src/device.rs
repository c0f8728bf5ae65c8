use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A single accessory as reported by the bridge's `/info` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Accessory display name (e.g., "kitchen light").
    pub name: String,

    /// Room the accessory is assigned to.
    pub room: String,

    /// Accessory type as reported by the bridge (e.g., "Light", "Thermostat").
    #[serde(rename = "type")]
    pub device_type: String,

    /// Whether the bridge can currently reach the accessory.
    pub reachable: bool,

    /// Characteristic values keyed by characteristic name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BTreeMap<String, StateValue>>,
}

impl DeviceRecord {
    /// Create a record without any state.
    pub fn new(
        name: impl Into<String>,
        room: impl Into<String>,
        device_type: impl Into<String>,
        reachable: bool,
    ) -> Self {
        Self {
            name: name.into(),
            room: room.into(),
            device_type: device_type.into(),
            reachable,
            state: None,
        }
    }

    /// Add a state entry to this record.
    pub fn with_state(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.state
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Human-readable `room/name` label used in descriptions and logs.
    pub fn label(&self) -> String {
        format!("{}/{}", self.room, self.name)
    }
}

/// A characteristic value.
///
/// The bridge reports numbers, booleans and strings; anything else lands in
/// [`StateValue::Other`] so that one odd characteristic does not reject the
/// whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl StateValue {
    /// Numeric form of the value, if it has one. Booleans map to 1/0.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            StateValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            StateValue::Number(v) => Some(*v),
            StateValue::Text(_) | StateValue::Other(_) => None,
        }
    }

    /// Short name of the value kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StateValue::Boolean(_) => "boolean",
            StateValue::Number(_) => "number",
            StateValue::Text(_) => "string",
            StateValue::Other(serde_json::Value::Null) => "null",
            StateValue::Other(serde_json::Value::Array(_)) => "array",
            StateValue::Other(_) => "object",
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Boolean(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Number(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Number(v as f64)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Text(v)
    }
}

/// An entry of the bridge's `/list/rooms` response.
///
/// Bridges answer with `[{"name": "Kitchen"}, ...]`; a bare list of strings
/// is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomEntry {
    Named { name: String },
    Bare(String),
}

impl RoomEntry {
    pub fn into_name(self) -> String {
        match self {
            RoomEntry::Named { name } | RoomEntry::Bare(name) => name,
        }
    }
}

/// Unit in which temperature characteristics are exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TemperatureUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

impl TemperatureUnit {
    /// Convert a value reported in Celsius into this unit.
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemperatureUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(TemperatureUnit::Celsius),
            "f" | "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(Error::Config(format!(
                "Invalid temperature unit '{}': expected C or F",
                other
            ))),
        }
    }
}

impl Serialize for TemperatureUnit {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TemperatureUnit {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
