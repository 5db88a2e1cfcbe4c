//! In-process transport.
//!
//! Endpoints meet through a shared hub keyed by address. Messages are encoded
//! to JSON text and decoded on delivery, so the wire format is exercised
//! exactly as over a real link. A full mailbox holds the sender back until
//! the reader catches up or the send timeout runs out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::{debug, trace};

use super::message::PeerMessage;
use super::transport::{Endpoint, LinkEvent, LinkSender, Result, Transport, TransportError};
use crate::config::NetworkConfig;

/// Default wait for room in a full mailbox.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Hub {
    /// Address → host mailbox
    listeners: HashMap<String, mpsc::Sender<LinkEvent>>,
    /// Peer link id → link
    links: HashMap<String, Link>,
    next_link: u64,
}

#[derive(Debug)]
struct Link {
    host: String,
    peer_mailbox: mpsc::Sender<LinkEvent>,
}

fn deliver(mailbox: &mpsc::Sender<LinkEvent>, to: &str, event: LinkEvent) -> Result<()> {
    mailbox.try_send(event).map_err(|e| match e {
        TrySendError::Full(_) => TransportError::MailboxFull(to.to_string()),
        TrySendError::Closed(_) => TransportError::LinkClosed(to.to_string()),
    })
}

/// Queue a link notice; a full mailbox gets it as soon as there is room.
fn notify(mailbox: &mpsc::Sender<LinkEvent>, event: LinkEvent) {
    match mailbox.try_send(event) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                let _ = mailbox.send(event).await;
            });
        }
    }
}

/// Transport whose endpoints live in this process.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
    capacity: usize,
    send_timeout: Duration,
    dial_delay: Option<Duration>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MemoryTransport {
    /// `capacity` bounds every endpoint's mailbox.
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::default())),
            capacity: capacity.max(1),
            send_timeout: SEND_TIMEOUT,
            dial_delay: None,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.mailbox_capacity).with_send_timeout(config.send_timeout())
    }

    /// How long a send waits for room before giving up.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Hold every dial for `delay` before connecting.
    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = Some(delay);
        self
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        lock(&self.hub)
    }

    /// Number of open peer links.
    pub fn link_count(&self) -> usize {
        self.hub().links.len()
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn bind(&self, address: &str) -> Result<Endpoint> {
        let mut hub = self.hub();
        if hub.listeners.contains_key(address) {
            return Err(TransportError::AddressInUse(address.to_string()));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        hub.listeners.insert(address.to_string(), tx);
        debug!(address, "listening");

        Ok(Endpoint {
            local_id: address.to_string(),
            sender: Arc::new(MemorySender {
                hub: self.hub.clone(),
                local_id: address.to_string(),
                side: Side::Host,
                send_timeout: self.send_timeout,
            }),
            events: rx,
        })
    }

    async fn dial(&self, address: &str) -> Result<Endpoint> {
        if let Some(delay) = self.dial_delay {
            tokio::time::sleep(delay).await;
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let mut hub = self.hub();
        let listener = hub
            .listeners
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;

        hub.next_link += 1;
        let link_id = format!("peer-{}", hub.next_link);
        deliver(
            &listener,
            address,
            LinkEvent::Opened {
                link: link_id.clone(),
            },
        )?;
        hub.links.insert(
            link_id.clone(),
            Link {
                host: address.to_string(),
                peer_mailbox: tx,
            },
        );
        debug!(address, link = %link_id, "link opened");

        Ok(Endpoint {
            local_id: link_id.clone(),
            sender: Arc::new(MemorySender {
                hub: self.hub.clone(),
                local_id: link_id,
                side: Side::Peer {
                    host: address.to_string(),
                },
                send_timeout: self.send_timeout,
            }),
            events: rx,
        })
    }
}

#[derive(Debug, Clone)]
enum Side {
    Host,
    Peer { host: String },
}

struct MemorySender {
    hub: Arc<Mutex<Hub>>,
    local_id: String,
    side: Side,
    send_timeout: Duration,
}

impl MemorySender {
    /// Round-trip through the wire format.
    fn encode(message: &PeerMessage) -> Result<PeerMessage> {
        let text = message.to_json()?;
        Ok(PeerMessage::from_json(&text)?)
    }
}

#[async_trait]
impl LinkSender for MemorySender {
    async fn send(&self, to: &str, message: &PeerMessage) -> Result<()> {
        let message = Self::encode(message)?;
        let mailbox = {
            let hub = lock(&self.hub);
            match &self.side {
                Side::Host => hub
                    .links
                    .get(to)
                    .filter(|link| link.host == self.local_id)
                    .map(|link| link.peer_mailbox.clone()),
                Side::Peer { host } => {
                    if to != host || !hub.links.contains_key(&self.local_id) {
                        return Err(TransportError::LinkClosed(to.to_string()));
                    }
                    hub.listeners.get(host).cloned()
                }
            }
        }
        .ok_or_else(|| TransportError::LinkClosed(to.to_string()))?;

        trace!(from = %self.local_id, to, kind = message.kind(), "deliver");
        let event = LinkEvent::Message {
            link: self.local_id.clone(),
            message,
        };
        mailbox
            .send_timeout(event, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TransportError::MailboxFull(to.to_string()),
                SendTimeoutError::Closed(_) => TransportError::LinkClosed(to.to_string()),
            })
    }

    async fn close(&self, to: &str) -> Result<()> {
        let mut hub = lock(&self.hub);
        match &self.side {
            Side::Host => {
                let link = hub
                    .links
                    .remove(to)
                    .ok_or_else(|| TransportError::LinkClosed(to.to_string()))?;
                notify(
                    &link.peer_mailbox,
                    LinkEvent::Closed {
                        link: self.local_id.clone(),
                    },
                );
            }
            Side::Peer { host } => {
                hub.links
                    .remove(&self.local_id)
                    .ok_or_else(|| TransportError::LinkClosed(to.to_string()))?;
                if let Some(listener) = hub.listeners.get(host) {
                    notify(
                        listener,
                        LinkEvent::Closed {
                            link: self.local_id.clone(),
                        },
                    );
                }
            }
        }
        debug!(from = %self.local_id, to, "link closed");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        match &self.side {
            Side::Host => {
                let mut hub = lock(&self.hub);
                hub.listeners.remove(&self.local_id);
                let ids: Vec<String> = hub
                    .links
                    .iter()
                    .filter(|(_, link)| link.host == self.local_id)
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in ids {
                    if let Some(link) = hub.links.remove(&id) {
                        notify(
                            &link.peer_mailbox,
                            LinkEvent::Closed {
                                link: self.local_id.clone(),
                            },
                        );
                    }
                }
                debug!(address = %self.local_id, "stopped listening");
                Ok(())
            }
            Side::Peer { host } => {
                let host = host.clone();
                match self.close(&host).await {
                    Ok(()) | Err(TransportError::LinkClosed(_)) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::message::MessageBody;
    use crate::net::transport::establish;

    fn ready() -> PeerMessage {
        PeerMessage::new("x", MessageBody::PlayerReady)
    }

    #[tokio::test]
    async fn test_bind_duplicate_address() {
        let transport = MemoryTransport::default();
        let _host = transport.bind("sy-AAAAAA").await.unwrap();
        let err = transport.bind("sy-AAAAAA").await.unwrap_err();
        assert_eq!(err, TransportError::AddressInUse("sy-AAAAAA".to_string()));
    }

    #[tokio::test]
    async fn test_dial_unknown_address() {
        let transport = MemoryTransport::default();
        let err = transport.dial("sy-NOPE22").await.unwrap_err();
        assert_eq!(err, TransportError::Unreachable("sy-NOPE22".to_string()));
    }

    #[tokio::test]
    async fn test_messages_both_ways() {
        let transport = MemoryTransport::default();
        let mut host = transport.bind("sy-AAAAAA").await.unwrap();
        let mut peer = transport.dial("sy-AAAAAA").await.unwrap();

        assert_eq!(
            host.events.recv().await,
            Some(LinkEvent::Opened {
                link: peer.local_id.clone()
            })
        );

        peer.sender.send("sy-AAAAAA", &ready()).await.unwrap();
        match host.events.recv().await {
            Some(LinkEvent::Message { link, message }) => {
                assert_eq!(link, peer.local_id);
                assert_eq!(message.body, MessageBody::PlayerReady);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        host.sender.send(&peer.local_id, &ready()).await.unwrap();
        assert!(matches!(
            peer.events.recv().await,
            Some(LinkEvent::Message { .. })
        ));
    }

    #[tokio::test]
    async fn test_early_messages_are_buffered() {
        let transport = MemoryTransport::default();
        let host = transport.bind("sy-AAAAAA").await.unwrap();
        let mut peer = transport.dial("sy-AAAAAA").await.unwrap();

        for _ in 0..3 {
            host.sender.send(&peer.local_id, &ready()).await.unwrap();
        }
        for _ in 0..3 {
            assert!(matches!(
                peer.events.recv().await,
                Some(LinkEvent::Message { .. })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mailbox_full() {
        let transport = MemoryTransport::new(1).with_send_timeout(Duration::from_millis(50));
        let host = transport.bind("sy-AAAAAA").await.unwrap();
        let peer = transport.dial("sy-AAAAAA").await.unwrap();

        host.sender.send(&peer.local_id, &ready()).await.unwrap();
        let err = host.sender.send(&peer.local_id, &ready()).await.unwrap_err();
        assert_eq!(err, TransportError::MailboxFull(peer.local_id.clone()));
    }

    #[tokio::test]
    async fn test_full_mailbox_waits_for_reader() {
        let transport = MemoryTransport::new(1);
        let host = transport.bind("sy-AAAAAA").await.unwrap();
        let mut peer = transport.dial("sy-AAAAAA").await.unwrap();
        let to = peer.local_id.clone();

        let reader = tokio::spawn(async move {
            let mut seen = 0;
            while let Some(LinkEvent::Message { .. }) = peer.events.recv().await {
                seen += 1;
                if seen == 20 {
                    break;
                }
            }
            seen
        });
        for _ in 0..20 {
            host.sender.send(&to, &ready()).await.unwrap();
        }
        assert_eq!(reader.await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_close_notice_survives_full_mailbox() {
        let transport = MemoryTransport::new(1);
        let host = transport.bind("sy-AAAAAA").await.unwrap();
        let mut peer = transport.dial("sy-AAAAAA").await.unwrap();

        host.sender.send(&peer.local_id, &ready()).await.unwrap();
        host.sender.close(&peer.local_id).await.unwrap();
        assert!(matches!(peer.events.recv().await, Some(LinkEvent::Message { .. })));
        assert!(matches!(peer.events.recv().await, Some(LinkEvent::Closed { .. })));
    }

    #[tokio::test]
    async fn test_close_notifies_other_side() {
        let transport = MemoryTransport::default();
        let mut host = transport.bind("sy-AAAAAA").await.unwrap();
        let mut peer = transport.dial("sy-AAAAAA").await.unwrap();
        host.events.recv().await.unwrap();

        host.sender.close(&peer.local_id).await.unwrap();
        assert_eq!(
            peer.events.recv().await,
            Some(LinkEvent::Closed {
                link: "sy-AAAAAA".to_string()
            })
        );
        assert_eq!(transport.link_count(), 0);
        assert!(peer.sender.send("sy-AAAAAA", &ready()).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_releases_address() {
        let transport = MemoryTransport::default();
        let host = transport.bind("sy-AAAAAA").await.unwrap();
        let mut peer = transport.dial("sy-AAAAAA").await.unwrap();

        host.sender.shutdown().await.unwrap();
        assert!(matches!(peer.events.recv().await, Some(LinkEvent::Closed { .. })));
        assert!(transport.bind("sy-AAAAAA").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_timeout() {
        let transport = MemoryTransport::default().with_dial_delay(Duration::from_secs(30));
        let _host = transport.bind("sy-AAAAAA").await.unwrap();

        let err = establish(&transport, "sy-AAAAAA", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_secs(10)));
        assert_eq!(transport.link_count(), 0);
    }
}
