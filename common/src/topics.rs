/// zigbee2mqtt registers each TRV under its friendly name plus this suffix.
pub const DISPLAY_SUFFIX: &str = " Thermostat";

pub fn display_name(name: &str) -> String {
    format!("{name}{DISPLAY_SUFFIX}")
}

/// Topic the device reports its state on.
pub fn state_topic(base_topic: &str, name: &str) -> String {
    format!("{base_topic}/{}", display_name(name))
}

/// Topic the device accepts configuration commands on.
pub fn command_topic(base_topic: &str, name: &str) -> String {
    format!("{base_topic}/{}/set", display_name(name))
}

/// Per-device topic the monitor answers liveness queries on.
pub fn reply_topic(query_topic: &str, name: &str) -> String {
    format!("{query_topic}/{name}")
}

pub fn staleness_topic(query_topic: &str) -> String {
    format!("{query_topic}/staleness")
}

/// Maps a state topic back to the configured device name, if it matches.
pub fn device_from_state_topic<'a>(base_topic: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(base_topic)?
        .strip_prefix('/')?
        .strip_suffix(DISPLAY_SUFFIX)
}

/// Maps a monitor reply topic back to the device name, if it matches.
pub fn device_from_reply_topic<'a>(query_topic: &str, topic: &'a str) -> Option<&'a str> {
    topic.strip_prefix(query_topic)?.strip_prefix('/')
}
