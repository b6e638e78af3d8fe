//! Unreliable datagram transport to a fixed peer endpoint

use super::{stock_received, Inbox, PeerClient, SharedInbox};
use crate::error::SendError;
use log::{debug, error, info};
use shared::{wrap_frame, FrameBuffer};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One framed message per packet, best effort, to a peer fixed at construction.
///
/// Must be constructed inside a tokio runtime.
pub struct DatagramClient {
    socket: Option<Arc<UdpSocket>>,
    local_addr: SocketAddr,
    peer: SocketAddr,
    inbox: SharedInbox,
    shutdown: watch::Sender<bool>,
    reader: Option<JoinHandle<()>>,
}

impl DatagramClient {
    /// Binds `local_port` on all interfaces and targets `peer`.
    pub async fn bind(local_port: u16, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local_port)).await?;
        Self::from_socket(socket, peer)
    }

    pub fn from_socket(socket: UdpSocket, peer: SocketAddr) -> io::Result<Self> {
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let inbox = Inbox::shared();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reader = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            inbox.clone(),
            shutdown_rx,
        ));

        info!("Datagram client on {} targeting {}", local_addr, peer);

        Ok(DatagramClient {
            socket: Some(socket),
            local_addr,
            peer,
            inbox,
            shutdown,
            reader: Some(reader),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl PeerClient for DatagramClient {
    fn send(&self, payload: &str) -> Result<(), SendError> {
        let socket = self.socket.as_ref().ok_or(SendError::Closed)?;

        let frame = wrap_frame(payload).map_err(|e| SendError::InvalidPayload {
            message: e.to_string(),
        })?;

        match socket.try_send_to(frame.as_bytes(), self.peer) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(SendError::WouldBlock),
            Err(e) => Err(SendError::Io(e)),
        }
    }

    fn poll_received(&self) -> Option<String> {
        self.inbox.lock().pop()
    }

    fn has_pending(&self) -> bool {
        self.inbox.lock().has_pending()
    }

    fn receive_failed(&self) -> bool {
        self.inbox.lock().receive_failed()
    }

    fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };

        let _ = self.shutdown.send(true);
        reader.abort();
        self.socket = None;

        self.inbox.lock().clear();
        info!("Datagram client on {} closed", self.local_addr);
    }
}

impl Drop for DatagramClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    inbox: SharedInbox,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = [0u8; 2048];
    let mut frames = FrameBuffer::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Datagram receive loop cancelled");
                break;
            }

            result = socket.recv_from(&mut buffer) => match result {
                Ok((len, _)) => {
                    let text = String::from_utf8_lossy(&buffer[..len]);
                    stock_received(&mut frames, &inbox, &text);
                }
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    inbox.lock().mark_failed();
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;
    use tokio_test::assert_ok;

    async fn loopback_pair() -> (DatagramClient, DatagramClient) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        (
            DatagramClient::from_socket(a, b_addr).unwrap(),
            DatagramClient::from_socket(b, a_addr).unwrap(),
        )
    }

    async fn drain(client: &DatagramClient, expected: usize) -> Vec<String> {
        let mut received = Vec::new();
        for _ in 0..200 {
            while let Some(body) = client.poll_received() {
                received.push(body);
            }
            if received.len() >= expected {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        received
    }

    #[tokio::test]
    async fn test_send_and_receive_over_loopback() {
        let (a, b) = loopback_pair().await;

        assert_ok!(a.send("ping"));
        assert_eq!(drain(&b, 1).await, vec!["ping"]);

        assert_ok!(b.send("pong"));
        assert_eq!(drain(&a, 1).await, vec!["pong"]);
    }

    #[tokio::test]
    async fn test_partial_packet_completed_by_next_packet() {
        let (_a, b) = loopback_pair().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        raw.send_to(b"::=::spl", b.local_addr()).await.unwrap();
        raw.send_to(b"it::=::", b.local_addr()).await.unwrap();

        assert_eq!(drain(&b, 1).await, vec!["split"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, mut b) = loopback_pair().await;

        assert_ok!(a.send("queued"));
        drain_until_pending(&b).await;

        b.close();
        b.close();

        assert_eq!(b.poll_received(), None);
        assert!(matches!(b.send("late"), Err(SendError::Closed)));
        assert!(!b.receive_failed());
    }

    async fn drain_until_pending(client: &DatagramClient) {
        for _ in 0..200 {
            if client.has_pending() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }
}
