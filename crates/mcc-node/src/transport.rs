//! Group transport abstractions.
//!
//! All inter-node traffic is send-to-the-group: there are no per-peer
//! connections. The UDP implementation joins the configured multicast
//! group; the in-memory implementation fans datagrams out to every hub
//! member, so whole clusters can run inside one test process. Both
//! deliver a node's own datagrams back to it - the engine discards the
//! echo by origin id, same as on a real multicast socket with loopback.

use crate::error::NodeError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::warn;

/// Receiver slot handed out once by `subscribe`.
type SharedReceiver = Arc<RwLock<Option<mpsc::Receiver<Vec<u8>>>>>;

/// Fire-and-forget datagram transport to one multicast group.
#[async_trait]
pub trait GroupTransport: Send + Sync + 'static {
    /// Send one datagram to the whole group. Never blocks beyond socket
    /// buffering; delivery is best-effort.
    async fn send(&self, datagram: &[u8]) -> Result<(), NodeError>;

    /// Take the incoming datagram stream. Single consumer.
    fn subscribe(&self) -> mpsc::Receiver<Vec<u8>>;
}

/// The real thing: a UDP socket joined to an IPv4 multicast group.
pub struct UdpMulticastTransport {
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    incoming: SharedReceiver,
    recv_task: tokio::task::JoinHandle<()>,
}

impl UdpMulticastTransport {
    /// Bind the group port, join the group and start the receive loop.
    /// Failure here is fatal to the node: it cannot join the cluster.
    pub async fn bind(group: SocketAddrV4, hops: u32) -> Result<Self, NodeError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, group.port()))
            .await
            .map_err(NodeError::Bind)?;
        socket
            .join_multicast_v4(*group.ip(), Ipv4Addr::UNSPECIFIED)
            .map_err(NodeError::Bind)?;
        socket.set_multicast_ttl_v4(hops).map_err(NodeError::Bind)?;
        socket.set_multicast_loop_v4(true).map_err(NodeError::Bind)?;

        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(256);
        let recv_socket = socket.clone();
        let recv_task = tokio::spawn(async move {
            // Max UDP payload; coherence datagrams are far smaller.
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, _src)) => {
                        if tx.send(buf[..len].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "multicast receive failed");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(Self {
            socket,
            group,
            incoming: Arc::new(RwLock::new(Some(rx))),
            recv_task,
        })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }
}

impl Drop for UdpMulticastTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

#[async_trait]
impl GroupTransport for UdpMulticastTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), NodeError> {
        self.socket
            .send_to(datagram, self.group)
            .await
            .map(|_| ())
            .map_err(NodeError::Send)
    }

    fn subscribe(&self) -> mpsc::Receiver<Vec<u8>> {
        self.incoming
            .write()
            .take()
            .expect("subscribe can only be called once")
    }
}

/// A simulated multicast group living in process memory.
#[derive(Clone, Default)]
pub struct MemoryGroup {
    members: Arc<RwLock<Vec<mpsc::Sender<Vec<u8>>>>>,
}

impl MemoryGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the group, returning this member's transport.
    pub fn join(&self) -> MemoryGroupTransport {
        let (tx, rx) = mpsc::channel(256);
        self.members.write().push(tx);
        MemoryGroupTransport {
            members: self.members.clone(),
            incoming: Arc::new(RwLock::new(Some(rx))),
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }
}

/// One member's handle onto a [`MemoryGroup`].
pub struct MemoryGroupTransport {
    members: Arc<RwLock<Vec<mpsc::Sender<Vec<u8>>>>>,
    incoming: SharedReceiver,
}

#[async_trait]
impl GroupTransport for MemoryGroupTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), NodeError> {
        let members: Vec<_> = self.members.read().iter().cloned().collect();
        for tx in members {
            // A departed member's closed channel is not an error.
            let _ = tx.send(datagram.to_vec()).await;
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<Vec<u8>> {
        self.incoming
            .write()
            .take()
            .expect("subscribe can only be called once")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_group_fans_out() {
        let group = MemoryGroup::new();
        let a = group.join();
        let b = group.join();
        assert_eq!(group.member_count(), 2);

        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();

        a.send(b"hello").await.unwrap();

        // Both members receive it, the sender included.
        assert_eq!(rx_a.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(rx_b.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_send_survives_departed_member() {
        let group = MemoryGroup::new();
        let a = group.join();
        let b = group.join();
        let rx_b = b.subscribe();
        drop(rx_b);

        let mut rx_a = a.subscribe();
        a.send(b"still-works").await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), b"still-works".to_vec());
    }
}
