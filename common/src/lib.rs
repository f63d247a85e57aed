pub mod config;
pub mod liveness;
pub mod payload;
pub mod profile;
pub mod reconcile;
pub mod schedule;
pub mod topics;

pub use config::{ConfigError, DeviceConfig, FleetConfig, MonitorConfig, MqttConfig};
pub use liveness::{DeviceReply, DeviceState, LivenessTracker, StalenessReport, UnseenDevice};
pub use payload::{CommandPayload, WEEKDAYS};
pub use profile::{ProfileRegistry, TypeProfile, UnknownType};
pub use reconcile::{battery_status, reconcile, BatteryStatus, Mismatch, MismatchReport};
pub use schedule::{DaySchedule, ScheduleError, SchedulePoint, TimeOfDay};
