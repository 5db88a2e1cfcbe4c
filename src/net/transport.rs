//! Transport abstraction.
//!
//! A [`Transport`] opens an [`Endpoint`]: `bind` for the host under its session
//! address, `dial` for a joining peer. Each endpoint owns a bounded mailbox of
//! [`LinkEvent`]s that exists before the first link opens, so nothing sent
//! early is dropped while the consumer task starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::message::PeerMessage;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Host address for a session code.
pub fn host_address(code: &str) -> String {
    format!("sy-{}", code)
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Session code already in use: {0}")]
    AddressInUse(String),
    #[error("No session found at {0}")]
    Unreachable(String),
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("Mailbox for {0} stayed full")]
    MailboxFull(String),
    #[error("Link closed: {0}")]
    LinkClosed(String),
    #[error("Malformed message: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Something that happened on one link of an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Opened { link: String },
    Message { link: String, message: PeerMessage },
    Closed { link: String },
    Error { link: String, error: String },
}

impl LinkEvent {
    pub fn link(&self) -> &str {
        match self {
            Self::Opened { link }
            | Self::Message { link, .. }
            | Self::Closed { link }
            | Self::Error { link, .. } => link,
        }
    }
}

/// Outbound half of an endpoint.
#[async_trait]
pub trait LinkSender: Send + Sync {
    /// Deliver a message over the link to `to`. Ordered per link.
    ///
    /// Waits while the receiving mailbox is full; fails with
    /// [`TransportError::MailboxFull`] only once the send timeout runs out.
    async fn send(&self, to: &str, message: &PeerMessage) -> Result<()>;

    /// Close the link to `to`; the other side sees [`LinkEvent::Closed`].
    async fn close(&self, to: &str) -> Result<()>;

    /// Tear down the endpoint and every link on it.
    async fn shutdown(&self) -> Result<()>;
}

/// An open endpoint.
pub struct Endpoint {
    /// Id other endpoints use to address this one
    pub local_id: String,
    pub sender: Arc<dyn LinkSender>,
    pub events: mpsc::Receiver<LinkEvent>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}

/// Connection factory injected into host and peer sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Listen at `address`. Fails with [`TransportError::AddressInUse`] if taken.
    async fn bind(&self, address: &str) -> Result<Endpoint>;

    /// Open a link to the endpoint listening at `address`.
    async fn dial(&self, address: &str) -> Result<Endpoint>;
}

/// Bind with a deadline.
pub async fn listen(transport: &dyn Transport, address: &str, limit: Duration) -> Result<Endpoint> {
    tokio::time::timeout(limit, transport.bind(address))
        .await
        .map_err(|_| TransportError::Timeout(limit))?
}

/// Dial with a deadline. On expiry the half-built endpoint is dropped.
pub async fn establish(
    transport: &dyn Transport,
    address: &str,
    limit: Duration,
) -> Result<Endpoint> {
    tokio::time::timeout(limit, transport.dial(address))
        .await
        .map_err(|_| TransportError::Timeout(limit))?
}
