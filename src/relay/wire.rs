//! Frames on the overlay socket: `[u32 big-endian length][protobuf body]`
//! where the body is an envelope carrying either a status or a relay
//! message. The first client frame after connect must be a relay to the
//! broker whose payload is a `Join`.

use crate::relay::OverlayId;
use bytes::Bytes;
use prost::Message as _;
use tokio_util::codec::LengthDelimitedCodec;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusMessage {
    #[prost(uint32, tag = "1")]
    pub network_size: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelayMessage {
    /// Destination when client→server, rewritten to the true source when
    /// the server forwards.
    #[prost(bytes = "vec", tag = "1")]
    pub endpoint_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Join {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Body", tags = "1, 2")]
    pub body: Option<envelope::Body>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Status(super::StatusMessage),
        #[prost(message, tag = "2")]
        Relay(super::RelayMessage),
    }
}

/// Length-prefix codec matching the wire contract (4-byte big-endian
/// length, which is `LengthDelimitedCodec`'s default).
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::new()
}

pub fn status(network_size: u32) -> Bytes {
    encode(envelope::Body::Status(StatusMessage { network_size }))
}

pub fn relay(endpoint_id: &OverlayId, payload: Vec<u8>) -> Bytes {
    encode(envelope::Body::Relay(RelayMessage {
        endpoint_id: endpoint_id.as_bytes().to_vec(),
        payload,
    }))
}

/// The mandatory first frame: a relay to the broker carrying a `Join`.
pub fn join(id: &OverlayId) -> Bytes {
    relay(
        &OverlayId::BROKER,
        Join {
            id: id.as_bytes().to_vec(),
        }
        .encode_to_vec(),
    )
}

pub fn decode(frame: &[u8]) -> Result<envelope::Body, WireError> {
    Envelope::decode(frame)?.body.ok_or(WireError::EmptyBody)
}

pub fn decode_join(payload: &[u8]) -> Result<OverlayId, WireError> {
    let join = Join::decode(payload)?;
    OverlayId::from_bytes(&join.id).map_err(|_| WireError::MalformedId)
}

fn encode(body: envelope::Body) -> Bytes {
    Bytes::from(Envelope { body: Some(body) }.encode_to_vec())
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame")]
    Decode(#[from] prost::DecodeError),
    #[error("frame has no body")]
    EmptyBody,
    #[error("endpoint id has the wrong length")]
    MalformedId,
}
