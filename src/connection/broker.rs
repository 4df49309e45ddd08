//! Configuration broker session over MQTT
//!
//! One session per wake: connect and subscribe with fixed-delay retries until
//! the session timeout, listen for half that timeout, then drop the session.

use super::ConfigSource;
use crate::config::{BrokerConfig, CycleTimeouts};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ldr_shared::state_machine::{is_valid_session_transition, SessionState};
use ldr_shared::{ConfigTopic, ConfigUpdate, NodeError};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter, SubscribeReasonCode,
};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Broker-backed configuration channel
pub struct MqttConfigChannel {
    broker: BrokerConfig,
    client_id: String,
    node_id: String,
    session_timeout: Duration,
    listen_window: Duration,
    retry_delay: Duration,
    state: SessionState,
}

impl MqttConfigChannel {
    pub fn new(
        broker: BrokerConfig,
        client_id: impl Into<String>,
        node_id: impl Into<String>,
        timeouts: &CycleTimeouts,
    ) -> Self {
        Self {
            broker,
            client_id: client_id.into(),
            node_id: node_id.into(),
            session_timeout: timeouts.session,
            listen_window: timeouts.listen_window(),
            retry_delay: timeouts.subscribe_retry,
            state: SessionState::Disconnected,
        }
    }

    /// Current session state
    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, to: SessionState) {
        if !is_valid_session_transition(self.state, to) {
            warn!("Unexpected broker session transition: {:?} -> {:?}", self.state, to);
        }
        debug!("Broker session: {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker.host, self.broker.port);
        options.set_keep_alive(self.broker.keep_alive);
        options.set_clean_session(true);
        if let (Some(user), Some(password)) = (&self.broker.username, &self.broker.password) {
            options.set_credentials(user, password);
        }
        options
    }

    fn filters(&self) -> Vec<SubscribeFilter> {
        ConfigTopic::ALL
            .iter()
            .map(|topic| SubscribeFilter::new(topic.topic_name(&self.node_id), QoS::AtLeastOnce))
            .collect()
    }

    /// Connect and subscribe, retrying until `deadline`
    ///
    /// A refused subscription is retried on the same fixed delay as a failed
    /// connection attempt.
    async fn establish(
        &mut self,
        client: &AsyncClient,
        eventloop: &mut EventLoop,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                bail!("not subscribed within {:?}", self.session_timeout);
            }

            match timeout(remaining, eventloop.poll()).await {
                Err(_) => bail!("not subscribed within {:?}", self.session_timeout),
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    debug!("Connected to broker {}:{}", self.broker.host, self.broker.port);
                    client
                        .subscribe_many(self.filters())
                        .await
                        .map_err(|e| anyhow!("subscribe request failed: {}", e))?;
                }
                Ok(Ok(Event::Incoming(Packet::SubAck(ack)))) => {
                    if !ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Ok(());
                    }
                    debug!("Broker refused subscription, retrying");
                    self.transition(SessionState::Connecting);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    sleep(self.retry_delay.min(remaining)).await;
                    client
                        .subscribe_many(self.filters())
                        .await
                        .map_err(|e| anyhow!("subscribe request failed: {}", e))?;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("Broker connect attempt failed: {}", e);
                    self.transition(SessionState::Connecting);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    sleep(self.retry_delay.min(remaining)).await;
                }
            }
        }
    }

    /// Collect config publishes until `until`
    async fn listen(&self, eventloop: &mut EventLoop, until: Instant) -> Vec<ConfigUpdate> {
        let mut updates = Vec::new();

        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, eventloop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    match ConfigTopic::from_topic_name(&publish.topic, &self.node_id) {
                        Some(topic) => {
                            let payload = String::from_utf8_lossy(&publish.payload);
                            debug!(
                                topic = %publish.topic,
                                payload = %payload,
                                "Config update received"
                            );
                            updates.push(ConfigUpdate::new(topic, payload));
                        }
                        None => debug!(topic = %publish.topic, "Ignoring publish on unknown topic"),
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("Broker connection lost while listening: {}", e);
                    break;
                }
            }
        }

        updates
    }
}

#[async_trait]
impl ConfigSource for MqttConfigChannel {
    async fn sync(&mut self) -> Result<Vec<ConfigUpdate>, NodeError> {
        self.state = SessionState::Disconnected;
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
        let deadline = Instant::now() + self.session_timeout;

        self.transition(SessionState::Connecting);
        if let Err(e) = self.establish(&client, &mut eventloop, deadline).await {
            self.transition(SessionState::ConnectFailed);
            self.transition(SessionState::SessionEnded);
            return Err(NodeError::ConfigSession(e.to_string()));
        }
        self.transition(SessionState::Subscribed);

        self.transition(SessionState::Listening);
        let updates = self
            .listen(&mut eventloop, Instant::now() + self.listen_window)
            .await;
        self.transition(SessionState::SessionEnded);

        info!("Broker session ended with {} update(s)", updates.len());
        // Dropping the event loop closes the broker socket
        Ok(updates)
    }
}
