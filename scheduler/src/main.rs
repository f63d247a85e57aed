use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde_json::Value;
use tracing::{error, info, warn};

use trv_common::{
    battery_status, reconcile, topics, CommandPayload, DeviceReply, FleetConfig, MqttConfig,
};

enum Mode {
    Apply,
    Check,
    DryRun,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let mode = match args.next().as_deref() {
        None | Some("apply") => Mode::Apply,
        Some("check") => Mode::Check,
        Some("dry-run") => Mode::DryRun,
        Some(other) => {
            anyhow::bail!("unknown mode '{other}', expected apply, check or dry-run")
        }
    };
    let config_path = args.next().unwrap_or_else(|| "config.yaml".to_string());

    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file {config_path}"))?;
    let config = FleetConfig::parse(&raw)
        .with_context(|| format!("failed to parse config file {config_path}"))?;

    for err in config.validate() {
        // Device-scoped errors are reported again where the device is
        // skipped; profile-level problems only show up here.
        if err.device().is_none() {
            warn!("config: {err}");
        }
    }

    match mode {
        Mode::Apply => apply(&config).await,
        Mode::Check => check(&config).await,
        Mode::DryRun => dry_run(&config),
    }
}

/// Expected payloads for every valid device. A bad device is loud but
/// never blocks the rest of the fleet.
fn build_payloads(config: &FleetConfig) -> Vec<(String, CommandPayload)> {
    let registry = config.profile_registry();
    let mut payloads = Vec::new();

    for (name, device) in &config.thermostats {
        if let Err(err) = device.validate(name, &registry) {
            error!("skipping {name}: {err}");
            continue;
        }
        match CommandPayload::build(name, device, &registry, &config.mqtt.base_topic) {
            Ok(payload) => payloads.push((name.clone(), payload)),
            Err(err) => error!("skipping {name}: {err}"),
        }
    }

    payloads
}

async fn apply(config: &FleetConfig) -> anyhow::Result<()> {
    let payloads = build_payloads(config);
    if payloads.is_empty() {
        warn!("no valid thermostats to configure");
        return Ok(());
    }

    let (mqtt, mut eventloop) = connect(&config.mqtt, "trv-scheduler");

    for (name, payload) in &payloads {
        let body = serde_json::to_vec(&payload.fields)
            .with_context(|| format!("failed to serialize payload for {name}"))?;
        mqtt.publish(payload.topic.as_str(), QoS::AtLeastOnce, false, body)
            .await
            .with_context(|| format!("failed to queue configuration for {name}"))?;
        info!("configuring {name} via {}", payload.topic);
    }

    // rumqttc only hands queued publishes to the network while the event
    // loop is polled; keep going until the broker acks each one.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut acked = 0;
    while acked < payloads.len() {
        let event = match tokio::time::timeout_at(deadline, eventloop.poll()).await {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            Ok(Event::Incoming(Incoming::PubAck(_))) => acked += 1,
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    if acked < payloads.len() {
        warn!("only {acked}/{} configurations acknowledged", payloads.len());
    } else {
        info!("all {} configurations acknowledged", payloads.len());
    }

    mqtt.disconnect().await.ok();
    Ok(())
}

async fn check(config: &FleetConfig) -> anyhow::Result<()> {
    let payloads = build_payloads(config);
    if payloads.is_empty() {
        warn!("no valid thermostats to check");
        return Ok(());
    }

    let (mqtt, mut eventloop) = connect(&config.mqtt, "trv-scheduler-check");
    let query_topic = config.monitor.query_topic.as_str();

    mqtt.subscribe(format!("{query_topic}/+"), QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to monitor replies")?;
    mqtt.publish(query_topic, QoS::AtLeastOnce, false, "get")
        .await
        .context("failed to publish liveness query")?;

    // Replies are push-based, so there is no guarantee one arrives at all.
    // Collect whatever shows up inside the window, then compare; a silent
    // device is treated as having reported nothing.
    let window = Duration::from_secs(config.monitor.reply_timeout_secs);
    let deadline = tokio::time::Instant::now() + window;
    let mut replies: HashMap<String, DeviceReply> = HashMap::new();

    loop {
        let event = match tokio::time::timeout_at(deadline, eventloop.poll()).await {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                let Some(name) = topics::device_from_reply_topic(query_topic, &message.topic)
                else {
                    continue;
                };
                if !config.thermostats.contains_key(name) {
                    continue;
                }
                match serde_json::from_slice::<DeviceReply>(&message.payload) {
                    Ok(reply) => {
                        replies.insert(name.to_string(), reply);
                    }
                    Err(err) => warn!("undecodable reply for {name}: {err}"),
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    mqtt.disconnect().await.ok();

    let now = Utc::now();
    let mut drifted = 0usize;

    for (name, payload) in &payloads {
        let reply = replies.get(name);
        let state = reply.and_then(|reply| reply.state.as_ref());
        let report = reconcile(&payload.fields, state);

        println!("{name}");
        match reply {
            None => println!("  no reply within the {}s window", window.as_secs()),
            Some(reply) => match reply.last_seen {
                Some(last_seen) => {
                    println!("  last seen {}s ago", (now - last_seen).num_seconds())
                }
                None => println!("  never seen by the monitor"),
            },
        }
        if let Some(status) = battery_status(state, config.monitor.battery_threshold) {
            println!("  {status}");
        }
        if report.is_empty() {
            println!("  in sync ({} keys)", payload.fields.len());
        } else {
            drifted += 1;
            for (key, mismatch) in &report {
                let reported = mismatch
                    .reported
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "absent".to_string());
                println!(
                    "  {key}: expected {}, reported {reported}",
                    mismatch.expected
                );
            }
        }
    }

    info!("{drifted}/{} thermostats drifted", payloads.len());
    Ok(())
}

fn dry_run(config: &FleetConfig) -> anyhow::Result<()> {
    for (name, payload) in build_payloads(config) {
        let body = serde_json::to_string_pretty(&payload.fields)
            .with_context(|| format!("failed to serialize payload for {name}"))?;
        println!("{name} -> {}\n{body}\n", payload.topic);
    }
    Ok(())
}

fn connect(mqtt: &MqttConfig, client_id: &str) -> (AsyncClient, rumqttc::EventLoop) {
    let host = std::env::var("MQTT_HOST").unwrap_or_else(|_| mqtt.host.clone());
    let port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(mqtt.port);

    let mut options = MqttOptions::new(client_id, host, port);
    let username = std::env::var("MQTT_USER")
        .ok()
        .or_else(|| mqtt.username.clone());
    if let Some(username) = username {
        let password = std::env::var("MQTT_PASS")
            .ok()
            .or_else(|| mqtt.password.clone())
            .unwrap_or_default();
        options.set_credentials(username, password);
    }

    AsyncClient::new(options, 64)
}
