//! Type-tagged JSON envelope around a single synchronization record

use crate::records::{
    CountdownTick, GoalEvent, HandlePosition, PeerMessage, PuckState, Record, ThrowInEvent,
    TimeUp,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode {type_name}: {source}")]
    Encode {
        type_name: &'static str,
        source: serde_json::Error,
    },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(serde_json::Error),

    #[error("malformed {type_name} payload: {source}")]
    MalformedPayload {
        type_name: String,
        source: serde_json::Error,
    },

    #[error("unknown record type {0:?}")]
    UnknownType(String),
}

/// Self-describing wrapper: `type_name` says which record `payload` holds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub type_name: String,
    pub payload: String,
}

/// Serializes a single record and wraps it with its type tag.
pub fn encode_record<T: Record>(value: &T) -> Result<String, CodecError> {
    let payload = serde_json::to_string(value).map_err(|source| CodecError::Encode {
        type_name: T::TYPE_NAME,
        source,
    })?;

    let envelope = Envelope {
        type_name: T::TYPE_NAME.to_string(),
        payload,
    };

    serde_json::to_string(&envelope).map_err(|source| CodecError::Encode {
        type_name: T::TYPE_NAME,
        source,
    })
}

pub fn encode(message: &PeerMessage) -> Result<String, CodecError> {
    match message {
        PeerMessage::HandlePosition(m) => encode_record(m),
        PeerMessage::PuckState(m) => encode_record(m),
        PeerMessage::Goal(m) => encode_record(m),
        PeerMessage::ThrowIn(m) => encode_record(m),
        PeerMessage::CountdownTick(m) => encode_record(m),
        PeerMessage::TimeUp(m) => encode_record(m),
    }
}

/// Reverses [`encode`]. Never panics on malformed or truncated input; callers
/// are expected to log the error and drop the message.
pub fn decode(text: &str) -> Result<PeerMessage, CodecError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(CodecError::MalformedEnvelope)?;

    match envelope.type_name.as_str() {
        HandlePosition::TYPE_NAME => payload::<HandlePosition>(&envelope),
        PuckState::TYPE_NAME => payload::<PuckState>(&envelope),
        GoalEvent::TYPE_NAME => payload::<GoalEvent>(&envelope),
        ThrowInEvent::TYPE_NAME => payload::<ThrowInEvent>(&envelope),
        CountdownTick::TYPE_NAME => payload::<CountdownTick>(&envelope),
        TimeUp::TYPE_NAME => payload::<TimeUp>(&envelope),
        _ => Err(CodecError::UnknownType(envelope.type_name)),
    }
}

fn payload<T: Record>(envelope: &Envelope) -> Result<PeerMessage, CodecError> {
    serde_json::from_str::<T>(&envelope.payload)
        .map(Into::into)
        .map_err(|source| CodecError::MalformedPayload {
            type_name: envelope.type_name.clone(),
            source,
        })
}
