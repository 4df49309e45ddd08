//! Confirmable telemetry push over CoAP

use crate::connection::unspecified_for;
use crate::transport::traits::{Delivery, DeliveryStrategy};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};
use ldr_shared::{encode_payload, Measurement, NodeError, ACK_TOKEN};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Largest datagram we expect back from the collector
const MAX_DATAGRAM: usize = 1152;

/// How an incoming datagram relates to the pending exchange
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    /// Not part of this exchange
    Unrelated,
    /// Empty ACK; a separate response will follow
    EmptyAck,
    /// Response carrying the collector's verdict
    Response,
    /// Collector rejected the exchange
    Reset,
}

/// Sends each measurement as a confirmable PUT and waits for "OK"
pub struct CoapPush {
    collector: String,
    resource: String,
    ack_timeout: Duration,
}

impl CoapPush {
    pub fn new(
        collector: impl Into<String>,
        resource: impl Into<String>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            collector: collector.into(),
            resource: resource.into(),
            ack_timeout,
        }
    }

    /// Build the confirmable PUT request
    fn request(&self, measurement: &Measurement, message_id: u16, token: &[u8]) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(RequestType::Put);
        packet.header.message_id = message_id;
        packet.set_token(token.to_vec());
        for segment in self.resource.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        packet.payload = encode_payload(measurement).into_bytes();
        packet
    }

    async fn connect(&self) -> Result<UdpSocket> {
        let addr = lookup_host(&self.collector)
            .await
            .with_context(|| format!("resolving collector {}", self.collector))?
            .next()
            .ok_or_else(|| anyhow!("collector {} resolved to no addresses", self.collector))?;
        let socket = UdpSocket::bind(unspecified_for(&addr)).await?;
        socket.connect(addr).await?;
        Ok(socket)
    }

    async fn exchange(&self, measurement: &Measurement) -> Result<Delivery> {
        // Resolution and the ack wait share one budget
        let deadline = Instant::now() + self.ack_timeout;
        let socket = timeout(self.ack_timeout, self.connect())
            .await
            .map_err(|_| {
                anyhow!("collector {} not reachable within {:?}", self.collector, self.ack_timeout)
            })??;

        // Correlation only, not authentication
        let message_id: u16 = rand::random();
        let token: [u8; 4] = rand::random();
        let bytes = self
            .request(measurement, message_id, &token)
            .to_bytes()
            .map_err(|e| anyhow!("encoding CoAP request: {:?}", e))?;

        let sent_at = Instant::now();
        socket.send(&bytes).await.context("sending CoAP request")?;
        debug!(message_id, resource = %self.resource, "Telemetry pushed");

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(anyhow!("no acknowledgment within {:?}", self.ack_timeout));
            }

            let n = match timeout(remaining, socket.recv(&mut buf)).await {
                Err(_) => return Err(anyhow!("no acknowledgment within {:?}", self.ack_timeout)),
                Ok(result) => result.context("receiving CoAP response")?,
            };
            let response = match Packet::from_bytes(&buf[..n]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Dropping undecodable datagram: {:?}", e);
                    continue;
                }
            };

            match classify(&response, message_id, &token) {
                Reply::Unrelated | Reply::EmptyAck => continue,
                Reply::Reset => return Err(anyhow!("collector reset the exchange")),
                Reply::Response => {
                    if response.header.get_type() == MessageType::Confirmable {
                        socket.send(&empty_ack(&response)?).await?;
                    }
                    let latency = sent_at.elapsed();
                    if response.payload != ACK_TOKEN {
                        return Err(anyhow!(
                            "unexpected acknowledgment {:?}",
                            String::from_utf8_lossy(&response.payload)
                        ));
                    }
                    return Ok(Delivery {
                        channel: self.name(),
                        latency: Some(latency),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl DeliveryStrategy for CoapPush {
    async fn attempt(&self, measurement: &Measurement) -> Result<Delivery, NodeError> {
        self.exchange(measurement)
            .await
            .map_err(|e| NodeError::ConfirmableDelivery(format!("{:#}", e)))
    }

    fn name(&self) -> &'static str {
        "coap"
    }
}

fn classify(packet: &Packet, message_id: u16, token: &[u8]) -> Reply {
    let same_id = packet.header.message_id == message_id;
    match packet.header.get_type() {
        MessageType::Acknowledgement if same_id => {
            if packet.header.code == MessageClass::Empty {
                Reply::EmptyAck
            } else if packet.get_token() == token {
                Reply::Response
            } else {
                Reply::Unrelated
            }
        }
        MessageType::Reset if same_id => Reply::Reset,
        MessageType::Confirmable | MessageType::NonConfirmable
            if packet.get_token() == token
                && matches!(packet.header.code, MessageClass::Response(_)) =>
        {
            Reply::Response
        }
        _ => Reply::Unrelated,
    }
}

/// Empty ACK for a separate confirmable response
fn empty_ack(response: &Packet) -> Result<Vec<u8>> {
    let mut ack = Packet::new();
    ack.header.set_type(MessageType::Acknowledgement);
    ack.header.code = MessageClass::Empty;
    ack.header.message_id = response.header.message_id;
    ack.to_bytes().map_err(|e| anyhow!("encoding CoAP ACK: {:?}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use coap_lite::ResponseType;
    use ldr_shared::decode_payload;
    use std::net::SocketAddr;

    /// Piggybacked 2.04 response to `request`, as the collector sends it
    fn changed_response(request: &Packet, payload: &[u8]) -> Packet {
        let mut response = Packet::new();
        response.header.set_type(MessageType::Acknowledgement);
        response.header.code = MessageClass::Response(ResponseType::Changed);
        response.header.message_id = request.header.message_id;
        response.set_token(request.get_token().to_vec());
        response.payload = payload.to_vec();
        response
    }

    async fn collector() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn recv_request(socket: &UdpSocket) -> (Packet, SocketAddr) {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, from) = socket.recv_from(&mut buf).await.unwrap();
        (Packet::from_bytes(&buf[..n]).unwrap(), from)
    }

    fn measurement() -> Measurement {
        Measurement::new("2", "kitchen", 50.0)
    }

    #[tokio::test]
    async fn test_ok_acknowledgment_delivers() {
        let (socket, addr) = collector().await;
        let server = tokio::spawn(async move {
            let (request, from) = recv_request(&socket).await;
            let response = changed_response(&request, b"OK");
            socket.send_to(&response.to_bytes().unwrap(), from).await.unwrap();
            request
        });

        let push = CoapPush::new(addr.to_string(), "ldrData2", Duration::from_secs(1));
        let delivery = push.attempt(&measurement()).await.expect("delivery failed");
        assert_eq!(delivery.channel, "coap");
        assert!(delivery.latency.unwrap() < Duration::from_secs(1));

        let request = server.await.unwrap();
        assert_eq!(request.header.get_type(), MessageType::Confirmable);
        assert_eq!(request.header.code, MessageClass::Request(RequestType::Put));
        let path = request.get_option(CoapOption::UriPath).and_then(|p| p.front().cloned());
        assert_eq!(path, Some(b"ldrData2".to_vec()));

        let payload = String::from_utf8(request.payload.clone()).unwrap();
        assert_eq!(payload, "sensor_id=2&location=kitchen&data=50.00");
        assert_eq!(decode_payload(&payload).unwrap(), measurement());
    }

    #[tokio::test]
    async fn test_other_payload_is_failure() {
        let (socket, addr) = collector().await;
        tokio::spawn(async move {
            let (request, from) = recv_request(&socket).await;
            let response = changed_response(&request, b"ERR");
            socket.send_to(&response.to_bytes().unwrap(), from).await.unwrap();
        });

        let push = CoapPush::new(addr.to_string(), "ldrData2", Duration::from_secs(1));
        let result = push.attempt(&measurement()).await;
        assert!(matches!(result, Err(NodeError::ConfirmableDelivery(_))));
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let (_socket, addr) = collector().await;
        let push = CoapPush::new(addr.to_string(), "ldrData2", Duration::from_millis(150));

        let started = Instant::now();
        let result = push.attempt(&measurement()).await;
        assert!(matches!(result, Err(NodeError::ConfirmableDelivery(_))));
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_unresolvable_collector_fails_within_ack_timeout() {
        let push = CoapPush::new("collector.invalid:5683", "ldrData2", Duration::from_millis(200));

        let started = Instant::now();
        let result = push.attempt(&measurement()).await;
        assert!(matches!(result, Err(NodeError::ConfirmableDelivery(_))));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_separate_response_accepted_and_acked() {
        let (socket, addr) = collector().await;
        let server = tokio::spawn(async move {
            let (request, from) = recv_request(&socket).await;

            // Empty ACK first, then a separate confirmable response
            let mut ack = Packet::new();
            ack.header.set_type(MessageType::Acknowledgement);
            ack.header.code = MessageClass::Empty;
            ack.header.message_id = request.header.message_id;
            socket.send_to(&ack.to_bytes().unwrap(), from).await.unwrap();

            let mut response = changed_response(&request, b"OK");
            response.header.set_type(MessageType::Confirmable);
            response.header.message_id = request.header.message_id.wrapping_add(1);
            socket.send_to(&response.to_bytes().unwrap(), from).await.unwrap();

            let (node_ack, _) = recv_request(&socket).await;
            (node_ack, response.header.message_id)
        });

        let push = CoapPush::new(addr.to_string(), "ldrData2", Duration::from_secs(1));
        assert!(push.attempt(&measurement()).await.is_ok());

        let (node_ack, response_id) = server.await.unwrap();
        assert_eq!(node_ack.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(node_ack.header.message_id, response_id);
    }

    #[test]
    fn test_classify_ignores_foreign_tokens() {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::NonConfirmable);
        packet.header.code = MessageClass::Response(ResponseType::Changed);
        packet.set_token(vec![9, 9, 9, 9]);
        assert_eq!(classify(&packet, 1, &[1, 2, 3, 4]), Reply::Unrelated);
    }
}
