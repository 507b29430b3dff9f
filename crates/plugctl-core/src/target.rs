//! Plugin targets and context types
//!
//! Both are closed sets. Every spelling accepted on the command line or in an
//! inventory payload is normalised here, so the rest of the crate only ever
//! matches on enum variants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PluginError;

/// The environment a plugin operates against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Kubernetes,
    MissionControl,
    Global,
    Operations,
}

impl Target {
    pub const ALL: [Target; 4] = [
        Target::Kubernetes,
        Target::MissionControl,
        Target::Global,
        Target::Operations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kubernetes => "kubernetes",
            Self::MissionControl => "mission-control",
            Self::Global => "global",
            Self::Operations => "operations",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "mission-control" | "missioncontrol" | "tmc" => Ok(Self::MissionControl),
            "global" | "" | "unknown" => Ok(Self::Global),
            "operations" | "ops" => Ok(Self::Operations),
            _ => Err(PluginError::InvalidTarget {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of server a context points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextType {
    Kubernetes,
    MissionControl,
    Tanzu,
}

impl ContextType {
    pub const ALL: [ContextType; 3] = [
        ContextType::Kubernetes,
        ContextType::MissionControl,
        ContextType::Tanzu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kubernetes => "kubernetes",
            Self::MissionControl => "mission-control",
            Self::Tanzu => "tanzu",
        }
    }

    /// Plugin target served by contexts of this type
    pub fn target(&self) -> Target {
        match self {
            Self::Kubernetes => Target::Kubernetes,
            Self::MissionControl => Target::MissionControl,
            Self::Tanzu => Target::Global,
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextType {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "mission-control" | "missioncontrol" | "tmc" => Ok(Self::MissionControl),
            "tanzu" => Ok(Self::Tanzu),
            _ => Err(PluginError::InvalidContextType {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for ContextType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContextType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Uniquely names a plugin across targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginIdentifier {
    pub name: String,
    pub target: Target,
}

impl PluginIdentifier {
    pub fn new(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }
}

impl fmt::Display for PluginIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.target)
    }
}
