use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Coarse lifecycle stage of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Capture,
    Process,
    Commit,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Capture => "capture",
            Layer::Process => "process",
            Layer::Commit => "commit",
        }
    }

    /// The only place a layer is computed from the fields that imply it.
    pub fn derive(has_destination: bool, is_scheduled: bool) -> Self {
        if is_scheduled {
            Layer::Commit
        } else if has_destination {
            Layer::Process
        } else {
            Layer::Capture
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = ParseLayerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "capture" | "inbox" => Ok(Layer::Capture),
            "process" | "processing" => Ok(Layer::Process),
            "commit" | "committed" | "scheduled" => Ok(Layer::Commit),
            _ => Err(ParseLayerError {
                value: value.to_string(),
            }),
        }
    }
}

impl Serialize for Layer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Layer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Layer::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid layer '{value}': expected one of capture, process, commit")]
pub struct ParseLayerError {
    value: String,
}
