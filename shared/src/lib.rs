//! # Shared Protocol Library
//!
//! Everything the two peers of a match must agree on byte-for-byte lives here:
//! the synchronization records exchanged during a battle, the type-tagged
//! envelope that carries them, and the delimiter framing that separates them
//! on the wire.
//!
//! ## Layers
//!
//! A message travels through three layers on its way out and back in:
//!
//! 1. [`records`]: a typed value such as [`PuckState`] wrapped in the closed
//!    [`PeerMessage`] union.
//! 2. [`codec`]: the record is serialized to JSON and wrapped in an
//!    [`Envelope`] naming its type, which is itself serialized to JSON.
//! 3. [`framing`]: the envelope text is bounded on both sides by
//!    [`DELIMITER`]. Receivers feed raw socket data into a [`FrameBuffer`]
//!    which hands back complete bodies in arrival order.
//!
//! ## Coordinate convention
//!
//! Each peer renders its own half of the table at negative `z`. The opponent's
//! half is the point reflection of ours through the table centre, so every
//! outbound position and velocity is passed through [`Vec3::mirrored`]
//! (negating `x` and `z`) before it is sent. Receivers apply incoming values
//! as-is.

pub mod codec;
pub mod framing;
pub mod records;

pub use codec::{decode, encode, CodecError, Envelope};
pub use framing::{wrap_frame, FrameBuffer, FrameError, DELIMITER};
pub use records::{
    CountdownTick, GoalEvent, HandlePosition, PeerMessage, PuckState, Record, ThrowInEvent,
    TimeUp, Vec3,
};

/// Handle id sent by the master peer.
pub const MASTER_HANDLE_ID: i32 = 1;
/// Handle id sent by the non-master peer.
pub const NON_MASTER_HANDLE_ID: i32 = 0;
