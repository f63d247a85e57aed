use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown thermostat type '{0}'")]
pub struct UnknownType(pub String);

fn default_prefix() -> String {
    "schedule".to_string()
}

/// Payload template for one thermostat model: the fields that put the
/// device into schedule-driven heating, applied verbatim, plus the key
/// prefix its firmware expects for the per-weekday schedule strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeProfile {
    pub mode_fields: Map<String, Value>,
    #[serde(default = "default_prefix")]
    pub schedule_key_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, TypeProfile>,
}

impl ProfileRegistry {
    /// Profiles for the thermostat models the fleet ships with.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.insert(
            "VNTH-T2_v2",
            TypeProfile {
                mode_fields: fields(&[
                    ("temperature_sensitivity", json!(0.5)),
                    ("system_mode", json!("heat")),
                    ("preset", json!("schedule")),
                ]),
                schedule_key_prefix: default_prefix(),
            },
        );
        registry.insert(
            "TR-M3Z",
            TypeProfile {
                mode_fields: fields(&[
                    ("system_mode", json!("heat")),
                    ("preset", json!("schedule")),
                ]),
                schedule_key_prefix: default_prefix(),
            },
        );
        registry.insert(
            "ME168_1",
            TypeProfile {
                mode_fields: fields(&[("system_mode", json!("auto"))]),
                schedule_key_prefix: default_prefix(),
            },
        );
        registry.insert(
            "ME167",
            TypeProfile {
                mode_fields: fields(&[("system_mode", json!("auto"))]),
                schedule_key_prefix: default_prefix(),
            },
        );
        registry
    }

    pub fn insert(&mut self, type_name: impl Into<String>, profile: TypeProfile) {
        self.profiles.insert(type_name.into(), profile);
    }

    pub fn resolve(&self, type_name: &str) -> Result<&TypeProfile, UnknownType> {
        self.profiles
            .get(type_name)
            .ok_or_else(|| UnknownType(type_name.to_string()))
    }
}

fn fields(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}
