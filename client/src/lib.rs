//! # Peer Client Library
//!
//! Client side of a two-player air hockey match played directly between two
//! peers. A rendezvous endpoint only tells each peer whether to listen or to
//! connect; after that the peers talk to each other over two channels and
//! each keeps its own simulation of the table in step with the other's.
//!
//! ## Architecture Overview
//!
//! ### Match Setup
//! The first peer to ask the rendezvous endpoint becomes the **master** and
//! listens for a stream connection; the second connects to it. Once the
//! stream is up, both bind a datagram socket using a port rule that keeps two
//! peers on one machine from colliding.
//!
//! ### Two Channels
//! Handle positions are sent every tick over datagrams, where a lost packet
//! is simply superseded by the next one. Everything that must arrive (puck
//! state after a hit, goals, throw-ins, countdown ticks, time up) goes over
//! the stream.
//!
//! ### Cooperative Simulation
//! Sockets are read by background tasks that only fill a locked queue. The
//! simulation loop never blocks: once per fixed step it drains those queues,
//! advances its timers and its phase machine, and sends local state out.
//!
//! ### Mirrored Coordinates
//! Each peer sees the table from its own end. Outbound positions and
//! velocities are reflected through the table centre exactly once, on send,
//! so the receiver can apply them unchanged.
//!
//! ## Module Organization
//!
//! ### Transport Module (`transport`)
//! - Stream and datagram clients with background receive tasks
//! - Sticky receive-failure flag, idempotent close
//!
//! ### Rendezvous and Network Modules (`rendezvous`, `network`)
//! - Matchmaking request/response contract and role election
//! - Handshake driver publishing its progress
//! - The per-tick [`network::PeerLink`] surface
//!
//! ### Scheduling Modules (`timer`, `state_machine`)
//! - Fixed-step timers with interval and timeout callbacks
//! - Phase machine with deferred, last-wins transitions
//!
//! ### Battle Modules (`table`, `battle`)
//! - Headless table kinematics, contacts and goal detection
//! - Countdown, battle clock, scripted throw-ins, scoring and disconnects
//!
//! ### Application Modules (`config`, `app`, `error`)
//! - TOML configuration with defaults for every field
//! - The application context owning the network manager
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::app::AppContext;
//! use client::config::PeerConfig;
//!
//! # async fn play() -> Result<(), Box<dyn std::error::Error>> {
//! let mut app = AppContext::init(PeerConfig::default())?;
//! let outcome = app.run_match("192.168.0.10").await?;
//! println!("{:?}", outcome);
//! app.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod battle;
pub mod config;
pub mod error;
pub mod network;
pub mod rendezvous;
pub mod state_machine;
pub mod table;
pub mod timer;
pub mod transport;
