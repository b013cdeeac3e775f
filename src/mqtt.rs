//! The broker side of the bridge: subscribe to the EnergyHub ExtApi topic
//! and feed every published aggregate into the update pipeline.

use crate::telemetry::Pipeline;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(clap::Parser, Clone)]
#[group(id = "mqtt::Args")]
pub struct Args {
    /// The host name or address of the MQTT broker the EnergyHub publishes to.
    #[arg(long)]
    pub mqtt_host: String,

    /// The MQTT broker port.
    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    /// The topic carrying the EnergyHub measurement aggregates.
    #[arg(long, default_value = "extapi/data/ehub")]
    pub mqtt_topic: String,

    /// The client identifier presented to the broker.
    #[arg(long, default_value = "ferroamp-sunspec-bridge")]
    pub mqtt_client_id: String,

    /// Wait this long before polling the broker again after a connection
    /// failure.
    #[arg(long, default_value = "5s")]
    pub mqtt_retry_delay: humantime::Duration,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not subscribe to `{1}`")]
    Subscribe(#[source] rumqttc::ClientError, String),
}

/// Run the listener until the task is cancelled.
///
/// Connection losses are not fatal: rumqttc re-establishes the session on
/// the next poll and the subscription is replayed on every `ConnAck`. The
/// previously published register image keeps being served while the broker
/// is unreachable.
pub async fn run(args: Args, mut pipeline: Pipeline) -> Result<(), Error> {
    let mut options = MqttOptions::new(&args.mqtt_client_id, &args.mqtt_host, args.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut events) = AsyncClient::new(options, 16);
    loop {
        match events.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(
                    host = args.mqtt_host,
                    port = args.mqtt_port,
                    topic = args.mqtt_topic,
                    "connected to the broker, subscribing"
                );
                client
                    .subscribe(args.mqtt_topic.clone(), QoS::AtMostOnce)
                    .await
                    .map_err(|e| Error::Subscribe(e, args.mqtt_topic.clone()))?;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match pipeline.apply(&publish.payload) {
                    Ok(applied) => debug!(topic = publish.topic, applied, "applied an update"),
                    Err(e) => warn!(
                        topic = publish.topic,
                        error = (&e as &dyn std::error::Error),
                        "discarding a malformed telemetry payload"
                    ),
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    error = (&e as &dyn std::error::Error),
                    retry_in = %args.mqtt_retry_delay,
                    "lost the broker connection"
                );
                tokio::time::sleep(*args.mqtt_retry_delay).await;
            }
        }
    }
}
