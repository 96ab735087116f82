// Bus transport that forwards requests to an external gateway over Zenoh
//
// Each request is one Zenoh query on TOPIC_BUS_REQUEST. The gateway owns the
// physical bus, frames by one-byte node address, and answers with one reply per
// node that responded. Whatever
// has not replied when the query times out is reported as NoResponse by the
// controller; silence is never read as success.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::{BusMessage, BusTransport, NodeResponse, NodeResults};
use crate::config::TOPIC_BUS_REQUEST;
use crate::error::BusError;
use crate::motion::types::NodeId;

/// Query payload sent to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRequest {
    pub message: BusMessage,
    /// Bus addresses of the target nodes
    pub addresses: Vec<u8>,
    pub timeout_ms: u64,
}

impl BusRequest {
    pub fn new(message: &BusMessage, targets: &BTreeSet<NodeId>, timeout: Duration) -> Self {
        Self {
            message: message.clone(),
            addresses: targets.iter().map(|node| node.address()).collect(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// One node's reply from the gateway, keyed by bus address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusReply {
    pub address: u8,
    pub response: NodeResponse,
}

pub struct ZenohBus {
    session: zenoh::Session,
}

impl ZenohBus {
    pub fn new(session: zenoh::Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl BusTransport for ZenohBus {
    async fn send(
        &self,
        message: &BusMessage,
        targets: &BTreeSet<NodeId>,
        timeout: Duration,
    ) -> Result<NodeResults, BusError> {
        let request = BusRequest::new(message, targets, timeout);
        let payload = serde_json::to_string(&request)?;
        debug!("Bus request {} -> {:?}", message.name(), targets);

        let replies = self
            .session
            .get(TOPIC_BUS_REQUEST)
            .payload(payload)
            .timeout(timeout)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        let mut results = NodeResults::new();
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    let bytes = sample.payload().to_bytes();
                    match serde_json::from_slice::<BusReply>(&bytes) {
                        Ok(reply) => match NodeId::from_address(reply.address) {
                            Some(node) => {
                                results.insert(node, reply.response);
                            }
                            None => warn!("Reply from unknown address 0x{:02X}", reply.address),
                        },
                        Err(e) => warn!("Failed to parse bus reply: {}", e),
                    }
                }
                Err(err) => {
                    warn!(
                        "Bus gateway error: {}",
                        String::from_utf8_lossy(&err.payload().to_bytes())
                    );
                }
            }
        }
        Ok(results)
    }
}
