//! MQTT-over-WebSocket transport on rumqttc.
//!
//! rumqttc's own reconnection capability stays unused by design: the event
//! loop task ends on the first error or close, so backoff, credential
//! refresh and subscription replay remain centrally owned by the session
//! manager.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Packet, QoS,
    SubscribeFilter, Transport as WireTransport,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use super::{LinkEvent, Transport, TransportLink, TransportError};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Transport that dials the broker over `wss://`.
#[derive(Debug, Clone, Default)]
pub struct MqttWsTransport;

impl MqttWsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for MqttWsTransport {
    async fn open(
        &self,
        url: Url,
        keepalive: Duration,
    ) -> Result<(Box<dyn TransportLink>, mpsc::Receiver<LinkEvent>), TransportError> {
        // Fresh client id per connection attempt prevents broker-side session
        // conflicts between a dying link and its replacement.
        let client_id = format!("pumplink-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, url.as_str(), 443);
        options.set_transport(WireTransport::wss_with_default_config());
        options.set_keep_alive(keepalive);
        options.set_clean_session(true);

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("transport link shut down");
                            break;
                        }
                    }
                    polled = event_loop.poll() => match polled {
                        Ok(event) => {
                            let Some(link_event) = route_event(&event) else { continue };
                            let closing = matches!(link_event, LinkEvent::Closed);
                            if events_tx.send(link_event).await.is_err() {
                                break;
                            }
                            if closing {
                                break;
                            }
                        }
                        Err(e) => {
                            let classified = classify_error(&e);
                            error!(error = %classified, "mqtt event loop error");
                            let _ = events_tx.send(LinkEvent::Error(classified)).await;
                            let _ = events_tx.send(LinkEvent::Closed).await;
                            break;
                        }
                    }
                }
            }
        });

        Ok((Box::new(MqttLink { client, shutdown_tx }), events_rx))
    }
}

struct MqttLink {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
}

#[async_trait]
impl TransportLink for MqttLink {
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        if topics.is_empty() {
            return Ok(());
        }
        let filters: Vec<SubscribeFilter> = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce))
            .collect();
        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Unsubscribe(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.client.disconnect().await;
    }
}

/// Translate a rumqttc event into a link event (pure function).
fn route_event(event: &Event) -> Option<LinkEvent> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Some(LinkEvent::Connected),
        Event::Incoming(Packet::Publish(publish)) => Some(LinkEvent::Message {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
        }),
        Event::Incoming(Packet::Disconnect) => Some(LinkEvent::Closed),
        _ => None,
    }
}

/// Classify an event-loop failure (pure function).
///
/// A rejected WebSocket upgrade surfaces as an HTTP 403 during the
/// handshake and a refused CONNACK as `NotAuthorized`; both mean the signed
/// URL is no longer acceptable and a plain retry is pointless.
fn classify_error(error: &ConnectionError) -> TransportError {
    let not_authorized = matches!(
        error,
        ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized)
    );
    let text = error.to_string();
    if not_authorized || text.contains("403") {
        TransportError::AuthRejected(text)
    } else {
        TransportError::Connect(text)
    }
}
