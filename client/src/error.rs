//! Error types for the peer client

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure to hand a message to a transport.
#[derive(Error, Debug)]
pub enum SendError {
    /// The client was closed or its writer has shut down
    #[error("connection closed")]
    Closed,

    /// The message cannot be framed or encoded
    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },

    /// The datagram socket buffer is full; the packet was dropped
    #[error("send would block")]
    WouldBlock,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while setting up a match with the rendezvous endpoint and the peer.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),

    #[error("rendezvous request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rendezvous request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("rendezvous rejected the request with status {status:?}")]
    Rejected { status: String },

    #[error("unexpected rendezvous directive {0:?}")]
    UnexpectedDirective(String),

    #[error("failed to listen on {addr}: {source}")]
    Listen { addr: SocketAddr, source: io::Error },

    #[error("failed to accept peer: {0}")]
    Accept(io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("failed to open datagram socket on port {port}: {source}")]
    Datagram { port: u16, source: io::Error },

    #[error("a match is already in progress")]
    AlreadyConnected,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

/// Failures of a whole match run, from handshake to the end of the battle.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("failed to set up battle: {0}")]
    Battle(#[from] crate::state_machine::StateMachineError),

    #[error("handshake finished without a live link")]
    NotConnected,
}
