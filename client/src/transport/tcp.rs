//! Reliable stream transport over a connected TCP socket

use super::{stock_received, Inbox, PeerClient, SharedInbox};
use crate::error::SendError;
use log::{debug, error, info, warn};
use shared::{wrap_frame, FrameBuffer};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long a closed client's writer may keep flushing queued frames
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Line-oriented framed messages over a persistent TCP connection.
///
/// Writes are queued to a writer task so `send` never blocks the simulation
/// loop. Must be constructed inside a tokio runtime.
pub struct StreamClient {
    peer_addr: SocketAddr,
    inbox: SharedInbox,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: watch::Sender<bool>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    flush: Option<JoinHandle<()>>,
}

impl StreamClient {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let inbox = Inbox::shared();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(receive_loop(read_half, inbox.clone(), shutdown_rx));
        let writer = tokio::spawn(send_loop(write_half, outbound_rx, inbox.clone()));

        info!("Stream client connected to {}", peer_addr);

        Ok(StreamClient {
            peer_addr,
            inbox,
            outbound: Some(outbound),
            shutdown,
            reader: Some(reader),
            writer: Some(writer),
            flush: None,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl PeerClient for StreamClient {
    fn send(&self, payload: &str) -> Result<(), SendError> {
        let outbound = self.outbound.as_ref().ok_or(SendError::Closed)?;

        let mut frame = wrap_frame(payload).map_err(|e| SendError::InvalidPayload {
            message: e.to_string(),
        })?;
        frame.push('\n');

        outbound.send(frame).map_err(|_| SendError::Closed)
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

        // Dropping the sender lets the writer flush what is already queued
        // and then shut down the write half; a peer that stops reading gets
        // the writer aborted once the flush window has passed.
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            match Handle::try_current() {
                Ok(runtime) => self.flush = Some(runtime.spawn(finish_writer(writer))),
                Err(_) => writer.abort(),
            }
        }

        self.inbox.lock().clear();
        info!("Stream client to {} closed", self.peer_addr);
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn receive_loop(
    read_half: OwnedReadHalf,
    inbox: SharedInbox,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    let mut frames = FrameBuffer::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Stream receive loop cancelled");
                break;
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    stock_received(&mut frames, &inbox, &line);
                }
                Ok(None) => {
                    info!("Peer closed the stream");
                    inbox.lock().mark_failed();
                    break;
                }
                Err(e) => {
                    error!("Error receiving on stream: {}", e);
                    inbox.lock().mark_failed();
                    break;
                }
            },
        }
    }
}

async fn finish_writer(mut writer: JoinHandle<()>) {
    if timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        warn!("Stream writer still blocked after close, aborting it");
        writer.abort();
        let _ = writer.await;
    }
}

async fn send_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbox: SharedInbox,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_half.write_all(frame.as_bytes()).await {
            error!("Error sending on stream: {}", e);
            inbox.lock().mark_failed();
            return;
        }
    }

    let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};
    use tokio_test::{assert_err, assert_ok};

    async fn connected_pair() -> (StreamClient, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = StreamClient::new(connected.unwrap()).unwrap();
        (client, accepted.unwrap().0)
    }

    async fn wait_for_pending(client: &StreamClient) {
        for _ in 0..200 {
            if client.has_pending() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_failure(client: &StreamClient) {
        for _ in 0..200 {
            if client.receive_failed() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_send_writes_delimited_line() {
        let (client, mut remote) = connected_pair().await;

        assert_ok!(client.send("hello"));

        let expected = b"::=::hello::=::\n";
        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(2), remote.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, expected);
    }

    #[tokio::test]
    async fn test_receives_frames_in_order() {
        let (client, mut remote) = connected_pair().await;

        remote
            .write_all(b"::=::first::=::\n::=::sec")
            .await
            .unwrap();
        remote.write_all(b"ond::=::\n").await.unwrap();

        wait_for_pending(&client).await;
        let mut received = Vec::new();
        for _ in 0..200 {
            while let Some(body) = client.poll_received() {
                received.push(body);
            }
            if received.len() == 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(received, vec!["first", "second"]);
        assert!(!client.receive_failed());
    }

    #[tokio::test]
    async fn test_peer_close_sets_sticky_failure() {
        let (client, remote) = connected_pair().await;
        drop(remote);

        wait_for_failure(&client).await;
        assert!(client.receive_failed());
        assert!(client.receive_failed());
    }

    #[tokio::test]
    async fn test_send_rejects_delimiter_in_payload() {
        let (client, _remote) = connected_pair().await;
        assert!(matches!(
            client.send("a::=::b"),
            Err(SendError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut client, mut remote) = connected_pair().await;

        remote.write_all(b"::=::queued::=::\n").await.unwrap();
        wait_for_pending(&client).await;

        client.close();
        client.close();

        assert_eq!(client.poll_received(), None);
        assert!(!client.has_pending());
        assert_err!(client.send("late"));
    }

    #[tokio::test]
    async fn test_close_flushes_queued_frames_then_ends_writer() {
        let (mut client, mut remote) = connected_pair().await;

        assert_ok!(client.send("last words"));
        client.close();

        let flush = client.flush.take().unwrap();
        assert_ok!(timeout(Duration::from_secs(2), flush).await);

        let mut received = Vec::new();
        timeout(Duration::from_secs(2), remote.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"::=::last words::=::\n");
    }

    #[tokio::test]
    async fn test_close_aborts_writer_blocked_on_silent_peer() {
        let (mut client, _remote) = connected_pair().await;

        // far more than the loopback socket buffers hold; the peer never reads
        let payload = "x".repeat(64 * 1024);
        for _ in 0..512 {
            assert_ok!(client.send(&payload));
        }
        sleep(Duration::from_millis(100)).await;

        client.close();

        let flush = client.flush.take().unwrap();
        assert_ok!(timeout(WRITER_FLUSH_TIMEOUT * 4, flush).await);
        assert!(client.writer.is_none());
    }
}
