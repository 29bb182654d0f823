//! MQTT publication of transition events.
//!
//! Each event goes out twice:
//! - `<prefix>/spot/<id>`: retained `free` / `occupied`, so late subscribers see current state
//! - `<prefix>/events`: the JSON event record, not retained
//!
//! Both at QoS 1. The connection's event loop runs on its own thread.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::time::Duration;

use super::{EventRecord, Notifier};
use crate::TransitionEvent;

#[derive(Clone, Debug)]
pub struct MqttNotifierConfig {
    /// `host:port`, optionally prefixed with `mqtt://` or `tcp://`.
    pub broker: String,
    pub topic_prefix: String,
    pub client_id: String,
}

pub struct MqttNotifier {
    client: Client,
    topic_prefix: String,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttNotifier {
    pub fn connect(config: &MqttNotifierConfig) -> Result<Self> {
        let (host, port) = parse_broker(&config.broker)?;
        let mut options = MqttOptions::new(config.client_id.as_str(), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, 10);
        log::info!("MQTT notifier publishing to {}", config.broker);
        Ok(Self {
            client,
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
            connection_handle: Some(spawn_connection(connection)),
        })
    }

    fn publish(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .context("MQTT publish failed")
    }
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(&mut self, frame_index: u64, event: &TransitionEvent) -> Result<()> {
        self.publish(
            spot_topic(&self.topic_prefix, event),
            event.status.as_str().as_bytes().to_vec(),
            true,
        )?;
        let record = serde_json::to_vec(&EventRecord::new(frame_index, event))?;
        self.publish(format!("{}/events", self.topic_prefix), record, false)
    }
}

impl Drop for MqttNotifier {
    fn drop(&mut self) {
        let _ = self.client.disconnect();
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_connection(mut connection: Connection) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    break;
                }
            }
        }
    })
}

fn spot_topic(prefix: &str, event: &TransitionEvent) -> String {
    format!("{}/spot/{}", prefix, event.spot.get())
}

fn parse_broker(addr: &str) -> Result<(String, u16)> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    let (host, port) = remainder
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}
