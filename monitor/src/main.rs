use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::RwLock;
use tracing::{info, warn};

use trv_common::{
    topics, DeviceReply, DeviceState, FleetConfig, LivenessTracker, MqttConfig, StalenessReport,
};

/// Synchronized handle over the liveness table. The MQTT task is the only
/// writer; the staleness timer and the query responder work on owned
/// snapshots, so no lock is ever held across a publish.
#[derive(Clone)]
struct StateTable {
    inner: Arc<RwLock<LivenessTracker>>,
}

impl StateTable {
    fn new(tracker: LivenessTracker) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tracker)),
        }
    }

    async fn record(&self, device: &str, timestamp: chrono::DateTime<Utc>, raw_payload: &str) {
        self.inner.write().await.record(device, timestamp, raw_payload);
    }

    async fn snapshot_all(&self) -> BTreeMap<String, DeviceState> {
        self.inner.read().await.snapshot_all()
    }

    async fn staleness_report(
        &self,
        now: chrono::DateTime<Utc>,
        threshold: chrono::Duration,
    ) -> StalenessReport {
        self.inner.read().await.staleness_report(now, threshold)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let raw = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config file {config_path}"))?;
    let config = FleetConfig::parse(&raw)
        .with_context(|| format!("failed to parse config file {config_path}"))?;

    // Schedule problems don't stop liveness tracking, but they are worth
    // seeing in the monitor's log too.
    for err in config.validate() {
        warn!("config: {err}");
    }

    let table = StateTable::new(LivenessTracker::new(config.thermostats.keys().cloned()));
    let (mqtt, eventloop) = connect(&config.mqtt, "trv-monitor");

    for name in config.thermostats.keys() {
        let topic = topics::state_topic(&config.mqtt.base_topic, name);
        mqtt.subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to state topic for {name}"))?;
    }
    mqtt.subscribe(config.monitor.query_topic.as_str(), QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to the query topic")?;

    info!("watching {} thermostats", config.thermostats.len());

    let inbound = tokio::spawn(inbound_loop(
        config.clone(),
        table.clone(),
        mqtt.clone(),
        eventloop,
    ));
    let staleness = tokio::spawn(staleness_loop(config.clone(), table.clone(), mqtt.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    inbound.abort();
    staleness.abort();
    Ok(())
}

async fn inbound_loop(
    config: FleetConfig,
    table: StateTable,
    mqtt: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                let received_at = Utc::now();
                let payload = String::from_utf8_lossy(&message.payload);

                if message.topic == config.monitor.query_topic {
                    if payload.trim().eq_ignore_ascii_case("get") {
                        answer_query(&config, &table, &mqtt).await;
                    }
                } else if let Some(name) =
                    topics::device_from_state_topic(&config.mqtt.base_topic, &message.topic)
                {
                    table.record(name, received_at, &payload).await;
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => info!("mqtt connected"),
            Ok(_) => {}
            Err(err) => {
                warn!("mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

async fn answer_query(config: &FleetConfig, table: &StateTable, mqtt: &AsyncClient) {
    // Owned snapshot first; the lock is released before any publish.
    let snapshot = table.snapshot_all().await;
    info!("liveness query received, replying for {} devices", snapshot.len());

    for (name, state) in snapshot {
        let topic = topics::reply_topic(&config.monitor.query_topic, &name);
        match serde_json::to_vec(&DeviceReply::from(state)) {
            Ok(body) => {
                if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, false, body).await {
                    warn!("failed to publish reply for {name}: {err}");
                }
            }
            Err(err) => warn!("failed to serialize reply for {name}: {err}"),
        }
    }
}

async fn staleness_loop(config: FleetConfig, table: StateTable, mqtt: AsyncClient) {
    let threshold = chrono::Duration::seconds(config.monitor.staleness_threshold_secs as i64);
    let topic = topics::staleness_topic(&config.monitor.query_topic);
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.monitor.report_interval_secs));

    // The first tick completes immediately; skip it so the fleet gets one
    // full interval to report in after a restart.
    interval.tick().await;

    loop {
        interval.tick().await;

        let report = table.staleness_report(Utc::now(), threshold).await;
        if report.is_empty() {
            continue;
        }

        warn!("{} thermostats unseen past threshold", report.unseen.len());
        match serde_json::to_vec(&report) {
            Ok(body) => {
                if let Err(err) = mqtt.publish(topic.as_str(), QoS::AtLeastOnce, false, body).await
                {
                    warn!("failed to publish staleness report: {err}");
                }
            }
            Err(err) => warn!("failed to serialize staleness report: {err}"),
        }
    }
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
