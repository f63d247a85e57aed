use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{ProfileRegistry, TypeProfile};
use crate::schedule::TimeOfDay;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("device '{0}': day and night switch times are both {1}")]
    EqualSwitchTimes(String, TimeOfDay),
    #[error("device '{device}' references unknown thermostat type '{type_name}'")]
    UnresolvableType { device: String, type_name: String },
    #[error("thermostat type '{0}' has no mode fields")]
    EmptyModeFields(String),
}

impl ConfigError {
    /// The device a validation error halts startup for, if it is scoped to
    /// one. Profile-level errors affect no single device directly.
    pub fn device(&self) -> Option<&str> {
        match self {
            Self::EqualSwitchTimes(device, _) => Some(device),
            Self::UnresolvableType { device, .. } => Some(device),
            Self::EmptyModeFields(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub day_time: TimeOfDay,
    pub day_temperature: f64,
    pub night_time: TimeOfDay,
    pub night_temperature: f64,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl DeviceConfig {
    pub fn validate(&self, name: &str, registry: &ProfileRegistry) -> Result<(), ConfigError> {
        if self.day_time == self.night_time {
            return Err(ConfigError::EqualSwitchTimes(name.to_string(), self.day_time));
        }
        registry
            .resolve(&self.type_name)
            .map_err(|_| ConfigError::UnresolvableType {
                device: name.to_string(),
                type_name: self.type_name.clone(),
            })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_query_topic")]
    pub query_topic: String,
    #[serde(default = "default_staleness_threshold")]
    pub staleness_threshold_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,
    #[serde(default = "default_battery_threshold")]
    pub battery_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            query_topic: default_query_topic(),
            staleness_threshold_secs: default_staleness_threshold(),
            report_interval_secs: default_report_interval(),
            reply_timeout_secs: default_reply_timeout(),
            battery_threshold: default_battery_threshold(),
        }
    }
}

/// The whole fleet: broker access, the thermostats keyed by name, any
/// extra type profiles, and monitor tuning. `BTreeMap`s keep per-device
/// processing order deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub mqtt: MqttConfig,
    pub thermostats: BTreeMap<String, DeviceConfig>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeProfile>,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl FleetConfig {
    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Built-in profiles extended (or overridden) by the config's `types`
    /// section. Profiles violating the non-empty mode fields invariant are
    /// not registered, so devices referencing them fail validation.
    pub fn profile_registry(&self) -> ProfileRegistry {
        let mut registry = ProfileRegistry::builtin();
        for (name, profile) in &self.types {
            if !profile.mode_fields.is_empty() {
                registry.insert(name.clone(), profile.clone());
            }
        }
        registry
    }

    /// Configuration problems surface loudly at startup; a device-scoped
    /// error halts processing for that device only.
    pub fn validate(&self) -> Vec<ConfigError> {
        let registry = self.profile_registry();
        let mut errors = Vec::new();

        for (name, profile) in &self.types {
            if profile.mode_fields.is_empty() {
                errors.push(ConfigError::EmptyModeFields(name.clone()));
            }
        }

        for (name, device) in &self.thermostats {
            if let Err(err) = device.validate(name, &registry) {
                errors.push(err);
            }
        }

        errors
    }
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_base_topic() -> String {
    "zigbee2mqtt".to_string()
}

fn default_query_topic() -> String {
    "thermostat_monitor".to_string()
}

fn default_staleness_threshold() -> u64 {
    3600
}

fn default_report_interval() -> u64 {
    300
}

fn default_reply_timeout() -> u64 {
    5
}

fn default_battery_threshold() -> f64 {
    20.0
}
