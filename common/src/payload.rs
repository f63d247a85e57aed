use serde_json::{Map, Value};

use crate::config::DeviceConfig;
use crate::profile::{ProfileRegistry, UnknownType};
use crate::schedule::DaySchedule;
use crate::topics;

pub const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// The full configuration a device is expected to hold, plus the topic it
/// is commanded on.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPayload {
    pub topic: String,
    pub fields: Map<String, Value>,
}

impl CommandPayload {
    /// Composes the type profile's mode fields with the generated schedule
    /// string under `{prefix}_{weekday}` for all seven weekdays. The
    /// policy is not day-of-week sensitive, so every weekday carries the
    /// same string.
    pub fn build(
        name: &str,
        device: &DeviceConfig,
        registry: &ProfileRegistry,
        base_topic: &str,
    ) -> Result<Self, UnknownType> {
        let profile = registry.resolve(&device.type_name)?;
        let schedule = DaySchedule::generate(
            device.day_time,
            device.day_temperature,
            device.night_time,
            device.night_temperature,
        )
        .to_string();

        let mut fields = profile.mode_fields.clone();
        for weekday in WEEKDAYS {
            fields.insert(
                format!("{}_{weekday}", profile.schedule_key_prefix),
                Value::String(schedule.clone()),
            );
        }

        Ok(Self {
            topic: topics::command_topic(base_topic, name),
            fields,
        })
    }
}
