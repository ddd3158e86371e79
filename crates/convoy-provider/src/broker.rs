//! MQTT broker connection as a [`MessageBus`]
//!
//! Incoming publishes are fanned out to local subscribers through a
//! [`MemoryBus`], so one broker session serves every subscription of the
//! provider that owns it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::bus::{BusSubscription, MemoryBus, MessageBus};
use crate::error::ProviderError;
use crate::mqtt::MqttConfig;

const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Host, port and transport parsed from `brokerAddress`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `tcp://`, `mqtt://`, `ssl://`, `tls://` or `mqtts://` addresses
    pub fn parse(address: &str) -> Result<Self, ProviderError> {
        let bad = |reason: &str| {
            ProviderError::Config(format!("invalid brokerAddress '{address}': {reason}"))
        };
        let url = Url::parse(address).map_err(|e| bad(&e.to_string()))?;
        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "tls" | "mqtts" => true,
            other => return Err(bad(&format!("unsupported scheme '{other}'"))),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| bad("missing host"))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });
        Ok(Self { host, port, tls })
    }
}

/// Options for one broker session
fn options(config: &MqttConfig) -> Result<MqttOptions, ProviderError> {
    let address = BrokerAddress::parse(&config.broker_address)?;
    let mut options = MqttOptions::new(&config.client_id, &address.host, address.port);
    options.set_keep_alive(Duration::from_secs(
        config.keep_alive_seconds.unsigned_abs().max(1),
    ));
    if !config.username.is_empty() {
        options.set_credentials(&config.username, &config.password);
    }
    if address.tls || config.use_tls {
        if config.insecure_skip_verify {
            return Err(ProviderError::Config(
                "insecureSkipVerify is not supported, trust the broker certificate instead"
                    .to_string(),
            ));
        }
        options.set_transport(Transport::tls_with_default_config());
    }
    Ok(options)
}

/// A live broker session
pub struct BrokerBus {
    client: AsyncClient,
    local: Arc<MemoryBus>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    driver: JoinHandle<()>,
}

impl BrokerBus {
    /// Connect and wait for the broker's acknowledgement
    ///
    /// The broker has `pingTimeoutSeconds` to answer the connect.
    pub async fn connect(config: &MqttConfig) -> Result<Self, ProviderError> {
        let options = options(config)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let local = Arc::new(MemoryBus::new());
        let topics = Arc::new(Mutex::new(BTreeSet::new()));

        let (ready_tx, ready_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&local),
            Arc::clone(&topics),
            ready_tx,
        ));

        let wait = Duration::from_secs(config.ping_timeout_seconds.unsigned_abs().max(1));
        let outcome = match tokio::time::timeout(wait, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("failed to connect to {}: {e}", config.broker_address)),
            Ok(Err(_)) => Err("broker event loop stopped".to_string()),
            Err(_) => Err(format!(
                "broker {} did not acknowledge the connection within {wait:?}",
                config.broker_address
            )),
        };
        if let Err(message) = outcome {
            driver.abort();
            return Err(ProviderError::Transport(message));
        }

        info!(broker = %config.broker_address, client_id = %config.client_id, "connected to broker");
        Ok(Self {
            client,
            local,
            topics,
            driver,
        })
    }
}

impl Drop for BrokerBus {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Poll the session, delivering publishes and resubscribing after reconnects
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    local: Arc<MemoryBus>,
    topics: Arc<Mutex<BTreeSet<String>>>,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                let subscribed: Vec<String> = topics
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect();
                for topic in subscribed {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!(topic = %topic, error = %e, "failed to resubscribe");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Err(e) = local.publish(&publish.topic, publish.payload.to_vec()).await {
                    warn!(topic = %publish.topic, error = %e, "failed to deliver publish");
                }
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e.to_string()));
                    return;
                }
                warn!(error = %e, "broker connection lost, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl MessageBus for BrokerBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), ProviderError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, ProviderError> {
        let subscription = self.local.subscribe(topic).await?;
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        debug!(topic, "subscribed on broker");
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(address: &str) -> MqttConfig {
        MqttConfig {
            broker_address: address.to_string(),
            client_id: "convoy-test".to_string(),
            request_topic: "req".to_string(),
            response_topic: "resp".to_string(),
            ..MqttConfig::default()
        }
        .normalized()
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            BrokerAddress::parse("tcp://localhost:1883").unwrap(),
            BrokerAddress {
                host: "localhost".to_string(),
                port: 1883,
                tls: false,
            }
        );
        let tls = BrokerAddress::parse("ssl://broker.example.com").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.tls);
        assert_eq!(BrokerAddress::parse("mqtt://10.0.0.5").unwrap().port, 1883);
    }

    #[test]
    fn test_parse_address_errors() {
        for address in ["ws://broker:80", "localhost:1883", "not an address"] {
            let err = BrokerAddress::parse(address).unwrap_err();
            assert!(err.is_config_error(), "{address}: {err}");
        }
    }

    #[test]
    fn test_insecure_tls_is_rejected() {
        let mut cfg = config("tcp://localhost:1883");
        cfg.use_tls = true;
        cfg.insecure_skip_verify = true;
        assert!(options(&cfg).unwrap_err().is_config_error());

        cfg.use_tls = false;
        assert!(options(&cfg).is_ok());
    }

    #[test]
    fn test_options_carry_session_settings() {
        let mut cfg = config("tcp://localhost:1884");
        cfg.keep_alive_seconds = 7;
        cfg.username = "edge".to_string();
        cfg.password = "secret".to_string();
        let options = options(&cfg).unwrap();
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1884));
        assert_eq!(options.keep_alive(), Duration::from_secs(7));
        assert_eq!(
            options.credentials(),
            Some(("edge".to_string(), "secret".to_string()))
        );
        assert_eq!(options.client_id(), "convoy-test");
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_init() {
        let err = BrokerBus::connect(&config("tcp://127.0.0.1:1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Transport(_)), "{err}");
    }
}
