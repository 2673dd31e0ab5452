//! Channel adapters
//!
//! The host owns the physical publish/subscribe transport. The bridge only
//! needs a way to push one message to a subscriber and the two request shapes.

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use tokio::sync::mpsc;

use crate::error::SendError;

/// Pushes messages to one subscriber
#[async_trait]
pub trait StreamSender: Send + Sync {
    /// Deliver one message. An empty payload is a valid message.
    async fn send(&self, payload: Bytes) -> Result<(), SendError>;
}

/// `StreamSender` backed by a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSender {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Sender plus the receiving end the host drains
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl StreamSender for ChannelSender {
    async fn send(&self, payload: Bytes) -> Result<(), SendError> {
        self.tx.send(payload).await.map_err(|_| SendError::Closed)
    }
}

/// A new subscription on `<path>/subscribe`
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub path: String,
    pub headers: HeaderMap,
}

impl SubscribeRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            headers: HeaderMap::new(),
        }
    }
}

/// One message published to `<path>/publish`
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub data: Bytes,
}

impl PublishRequest {
    pub fn new(path: impl Into<String>, headers: HeaderMap, data: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            headers,
            data: data.into(),
        }
    }
}
