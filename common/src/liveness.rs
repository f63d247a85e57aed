use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Last-seen bookkeeping for one device. Both fields are `None` until the
/// device's first message after startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub last_seen: Option<DateTime<Utc>>,
    pub reported: Option<Value>,
}

/// Wire shape of a per-device reply on the monitor's reply topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReply {
    pub last_seen: Option<DateTime<Utc>>,
    pub state: Option<Value>,
}

impl From<DeviceState> for DeviceReply {
    fn from(state: DeviceState) -> Self {
        Self {
            last_seen: state.last_seen,
            state: state.reported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnseenDevice {
    pub name: String,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Published for external consumption whenever `unseen` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalenessReport {
    pub timestamp: DateTime<Utc>,
    pub unseen: Vec<UnseenDevice>,
}

impl StalenessReport {
    pub fn is_empty(&self) -> bool {
        self.unseen.is_empty()
    }
}

/// Owns the per-device state table. Entries are seeded from the configured
/// device set and only ever overwritten, never deleted; state lives for
/// the process lifetime and is rebuilt from the message stream on restart.
#[derive(Debug)]
pub struct LivenessTracker {
    devices: BTreeMap<String, DeviceState>,
}

impl LivenessTracker {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            devices: names
                .into_iter()
                .map(|name| (name, DeviceState::default()))
                .collect(),
        }
    }

    /// Records an inbound state message. A payload that does not decode as
    /// JSON is kept as a raw string; the last payload seen is never
    /// dropped. Messages for untracked devices are ignored.
    pub fn record(&mut self, device: &str, timestamp: DateTime<Utc>, raw_payload: &str) {
        let Some(state) = self.devices.get_mut(device) else {
            return;
        };

        let reported = serde_json::from_str(raw_payload)
            .unwrap_or_else(|_| Value::String(raw_payload.to_string()));
        state.last_seen = Some(timestamp);
        state.reported = Some(reported);
    }

    pub fn snapshot(&self, device: &str) -> Option<DeviceState> {
        self.devices.get(device).cloned()
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, DeviceState> {
        self.devices.clone()
    }

    /// Every device unheard from for longer than `threshold`, plus every
    /// device never seen at all.
    pub fn staleness_report(&self, now: DateTime<Utc>, threshold: Duration) -> StalenessReport {
        let unseen = self
            .devices
            .iter()
            .filter(|(_, state)| match state.last_seen {
                Some(last_seen) => now - last_seen > threshold,
                None => true,
            })
            .map(|(name, state)| UnseenDevice {
                name: name.clone(),
                last_seen: state.last_seen,
            })
            .collect();

        StalenessReport {
            timestamp: now,
            unseen,
        }
    }
}
