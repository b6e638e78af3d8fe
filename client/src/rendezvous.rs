//! Rendezvous contract and the pure parts of the handshake
//!
//! The matchmaking endpoint receives a POST `{"Addr": "<self ipv4>"}` and
//! replies `{"Status", "Message", "Addr", "Memo"}`. The first peer to ask is
//! told `OPEN_SERVER` and becomes the master; the second is told
//! `OPEN_CLIENT` together with the master's address.

use crate::config::{PortConfig, RendezvousConfig};
use crate::error::HandshakeError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const OPEN_SERVER: &str = "OPEN_SERVER";
pub const OPEN_CLIENT: &str = "OPEN_CLIENT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRequest {
    #[serde(rename = "Addr")]
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResponse {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Message")]
    pub message: String,
    /// Master address; only meaningful with `OPEN_CLIENT`
    #[serde(rename = "Addr", default)]
    pub addr: String,
    #[serde(rename = "Memo", default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// What the rendezvous endpoint told this peer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDirective {
    /// Listen for the opponent and act as master
    OpenServer,
    /// Connect to the master at the given address
    OpenClient(Ipv4Addr),
}

/// Elected once per match by who accepted and who connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    NonMaster,
}

impl Role {
    pub fn is_master(self) -> bool {
        self == Role::Master
    }

    /// Id stamped on this peer's outgoing handle position.
    pub fn handle_id(self) -> i32 {
        match self {
            Role::Master => shared::MASTER_HANDLE_ID,
            Role::NonMaster => shared::NON_MASTER_HANDLE_ID,
        }
    }

    /// Id of the opponent's handle positions this peer applies.
    pub fn opponent_handle_id(self) -> i32 {
        match self {
            Role::Master => shared::NON_MASTER_HANDLE_ID,
            Role::NonMaster => shared::MASTER_HANDLE_ID,
        }
    }
}

/// Local and remote datagram ports for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramPorts {
    pub local: u16,
    pub remote: u16,
}

/// Picks datagram ports so two peers on one host never bind the same port.
///
/// Across hosts both sides use the master port. On one host the master binds
/// the master port and sends to the non-master port, and the non-master does
/// the reverse.
pub fn datagram_ports(
    self_ip: Ipv4Addr,
    peer_ip: Ipv4Addr,
    role: Role,
    ports: &PortConfig,
) -> DatagramPorts {
    if self_ip != peer_ip {
        return DatagramPorts {
            local: ports.master_udp,
            remote: ports.master_udp,
        };
    }

    match role {
        Role::Master => DatagramPorts {
            local: ports.master_udp,
            remote: ports.non_master_udp,
        },
        Role::NonMaster => DatagramPorts {
            local: ports.non_master_udp,
            remote: ports.master_udp,
        },
    }
}

pub fn parse_ipv4(address: &str) -> Result<Ipv4Addr, HandshakeError> {
    address
        .trim()
        .parse()
        .map_err(|_| HandshakeError::InvalidAddress(address.to_string()))
}

pub fn interpret_response(response: &MatchResponse) -> Result<MatchDirective, HandshakeError> {
    if response.status != STATUS_SUCCESS {
        return Err(HandshakeError::Rejected {
            status: response.status.clone(),
        });
    }

    match response.message.as_str() {
        OPEN_SERVER => Ok(MatchDirective::OpenServer),
        OPEN_CLIENT => parse_ipv4(&response.addr).map(MatchDirective::OpenClient),
        other => Err(HandshakeError::UnexpectedDirective(other.to_string())),
    }
}

/// HTTP client for the matchmaking endpoint.
#[derive(Debug, Clone)]
pub struct MatchmakingClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl MatchmakingClient {
    pub fn new(config: &RendezvousConfig) -> Result<Self, HandshakeError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            http,
            url: config.url.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Posts this peer's address and returns the endpoint's directive.
    pub async fn request_match(&self, self_ip: Ipv4Addr) -> Result<MatchDirective, HandshakeError> {
        let request = MatchRequest {
            addr: self_ip.to_string(),
        };
        info!("Requesting match for {} from {}", self_ip, self.url);

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let response: MatchResponse = response.json().await.map_err(|e| self.classify(e))?;
        debug!("Rendezvous replied {:?}", response);

        interpret_response(&response)
    }

    fn classify(&self, error: reqwest::Error) -> HandshakeError {
        if error.is_timeout() {
            HandshakeError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            HandshakeError::Request(error)
        }
    }
}
