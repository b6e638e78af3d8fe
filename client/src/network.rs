//! Match setup and the live peer link
//!
//! [`NetworkManager`] runs the rendezvous handshake, elects this peer's
//! [`Role`], and owns both transports for the rest of the match. Progress is
//! published on a `watch` channel so a lobby can show "waiting for opponent"
//! while the master sits in `accept`.

use crate::config::{PeerConfig, PortConfig, RendezvousConfig};
use crate::error::{HandshakeError, SendError};
use crate::rendezvous::{datagram_ports, parse_ipv4, MatchDirective, MatchmakingClient, Role};
use crate::transport::{DatagramClient, PeerClient, StreamClient};
use log::{error, info, warn};
use shared::PeerMessage;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Stream transport; ordered and delivered
    Reliable,
    /// Datagram transport; may drop
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingResponse,
    Listening,
    Connecting,
    Connected,
    Failed,
}

/// Per-tick surface the battle logic talks through.
pub trait PeerLink {
    fn role(&self) -> Role;

    /// Encodes `message` and hands it to the transport for `channel`.
    fn send(&mut self, channel: Channel, message: &PeerMessage) -> Result<(), SendError>;

    /// Oldest undecoded body received on `channel`.
    fn poll(&mut self, channel: Channel) -> Option<String>;

    fn has_pending(&self, channel: Channel) -> bool;

    /// True once either transport's receive loop has failed.
    fn receive_failed(&self) -> bool;
}

pub fn encode_payload(message: &PeerMessage) -> Result<String, SendError> {
    shared::encode(message).map_err(|e| SendError::InvalidPayload {
        message: e.to_string(),
    })
}

pub struct NetworkManager {
    rendezvous: RendezvousConfig,
    ports: PortConfig,
    role: Option<Role>,
    self_ip: Option<Ipv4Addr>,
    opponent_ip: Option<Ipv4Addr>,
    stream: Option<StreamClient>,
    datagram: Option<DatagramClient>,
    state: watch::Sender<HandshakeState>,
}

impl NetworkManager {
    pub fn new(config: &PeerConfig) -> Self {
        let (state, _) = watch::channel(HandshakeState::Idle);

        Self {
            rendezvous: config.rendezvous.clone(),
            ports: config.ports,
            role: None,
            self_ip: None,
            opponent_ip: None,
            stream: None,
            datagram: None,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HandshakeState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn self_ip(&self) -> Option<Ipv4Addr> {
        self.self_ip
    }

    pub fn opponent_ip(&self) -> Option<Ipv4Addr> {
        self.opponent_ip
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some() && self.datagram.is_some()
    }

    fn set_state(&self, state: HandshakeState) {
        self.state.send_replace(state);
    }

    /// Runs the whole handshake from `self_addr` (this peer's IPv4 address).
    ///
    /// On failure both transports are released and the state becomes
    /// `Failed`; nothing is retried.
    pub async fn request_match(&mut self, self_addr: &str) -> Result<Role, HandshakeError> {
        if self.is_connected() {
            return Err(HandshakeError::AlreadyConnected);
        }

        match self.handshake(self_addr).await {
            Ok(role) => Ok(role),
            Err(e) => {
                error!("Match request failed: {}", e);
                self.close_clients();
                self.set_state(HandshakeState::Failed);
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, self_addr: &str) -> Result<Role, HandshakeError> {
        let self_ip = parse_ipv4(self_addr)?;
        self.self_ip = Some(self_ip);

        let matchmaking = MatchmakingClient::new(&self.rendezvous)?;
        self.set_state(HandshakeState::AwaitingResponse);

        match matchmaking.request_match(self_ip).await? {
            MatchDirective::OpenServer => self.open_server(self_ip).await,
            MatchDirective::OpenClient(peer_ip) => self.open_client(self_ip, peer_ip).await,
        }
    }

    async fn open_server(&mut self, self_ip: Ipv4Addr) -> Result<Role, HandshakeError> {
        let addr = SocketAddr::from((self_ip, self.ports.p2p));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HandshakeError::Listen { addr, source })?;

        info!("Opened master client on {}, waiting for opponent", addr);
        self.set_state(HandshakeState::Listening);

        let (stream, peer) = listener.accept().await.map_err(HandshakeError::Accept)?;
        drop(listener);
        info!("Accepted opponent from {}", peer);

        let peer_ip = match peer.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(ip) => ip
                .to_ipv4_mapped()
                .ok_or_else(|| HandshakeError::InvalidAddress(ip.to_string()))?,
        };

        self.establish(Role::Master, self_ip, peer_ip, stream).await
    }

    async fn open_client(
        &mut self,
        self_ip: Ipv4Addr,
        peer_ip: Ipv4Addr,
    ) -> Result<Role, HandshakeError> {
        let addr = SocketAddr::from((peer_ip, self.ports.p2p));
        self.set_state(HandshakeState::Connecting);
        info!("Connecting to master client at {}", addr);

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| HandshakeError::Connect { addr, source })?;

        self.establish(Role::NonMaster, self_ip, peer_ip, stream)
            .await
    }

    async fn establish(
        &mut self,
        role: Role,
        self_ip: Ipv4Addr,
        peer_ip: Ipv4Addr,
        stream: TcpStream,
    ) -> Result<Role, HandshakeError> {
        let stream_addr = SocketAddr::from((peer_ip, self.ports.p2p));
        let stream = StreamClient::new(stream).map_err(|source| HandshakeError::Connect {
            addr: stream_addr,
            source,
        })?;
        self.stream = Some(stream);
        self.opponent_ip = Some(peer_ip);

        let ports = datagram_ports(self_ip, peer_ip, role, &self.ports);
        let datagram = DatagramClient::bind(ports.local, SocketAddr::from((peer_ip, ports.remote)))
            .await
            .map_err(|source| HandshakeError::Datagram {
                port: ports.local,
                source,
            })?;
        self.datagram = Some(datagram);
        self.role = Some(role);

        info!(
            "Matched as {:?} with {} (datagram {} -> {})",
            role, peer_ip, ports.local, ports.remote
        );
        self.set_state(HandshakeState::Connected);
        Ok(role)
    }

    /// Live link for the battle, once both transports are up.
    pub fn link(&self) -> Option<MatchLink<'_>> {
        Some(MatchLink {
            role: self.role?,
            stream: self.stream.as_ref()?,
            datagram: self.datagram.as_ref()?,
        })
    }

    /// Closes both transports. Safe to call repeatedly.
    pub fn close_clients(&mut self) {
        let had_clients = self.stream.is_some() || self.datagram.is_some();

        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        if let Some(mut datagram) = self.datagram.take() {
            datagram.close();
        }

        if had_clients {
            info!("Closed peer clients");
            self.set_state(HandshakeState::Idle);
        }
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.close_clients();
    }
}

/// Both transports of an established match.
pub struct MatchLink<'a> {
    role: Role,
    stream: &'a StreamClient,
    datagram: &'a DatagramClient,
}

impl MatchLink<'_> {
    fn client(&self, channel: Channel) -> &dyn PeerClient {
        match channel {
            Channel::Reliable => self.stream,
            Channel::Unreliable => self.datagram,
        }
    }
}

impl PeerLink for MatchLink<'_> {
    fn role(&self) -> Role {
        self.role
    }

    fn send(&mut self, channel: Channel, message: &PeerMessage) -> Result<(), SendError> {
        let payload = encode_payload(message)?;
        self.client(channel).send(&payload).map_err(|e| {
            if !matches!(e, SendError::WouldBlock) {
                warn!("Send on {:?} channel failed: {}", channel, e);
            }
            e
        })
    }

    fn poll(&mut self, channel: Channel) -> Option<String> {
        self.client(channel).poll_received()
    }

    fn has_pending(&self, channel: Channel) -> bool {
        self.client(channel).has_pending()
    }

    fn receive_failed(&self) -> bool {
        self.stream.receive_failed() || self.datagram.receive_failed()
    }
}
