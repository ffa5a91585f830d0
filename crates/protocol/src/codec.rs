//! MessagePack codec for [`Envelope`].
//!
//! Envelopes are packed as maps keyed by field name so peers that do not
//! share a schema still agree on the layout.

use crate::envelope::Envelope;

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("failed to serialize envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to deserialize envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Pack an envelope into a binary frame.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

/// Unpack a binary frame.  Inbound callers log and skip on error.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
