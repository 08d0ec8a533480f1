//! Star-topology message bus: every peer holds one TCP connection to the
//! broker's relay server, which forwards peer-to-peer traffic.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{Client, Handle};
pub use server::Server;

use std::{fmt, str::FromStr};

pub const OVERLAY_ID_LEN: usize = 20;

/// Opaque 20-byte tag addressing a peer on the overlay.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId([u8; OVERLAY_ID_LEN]);

impl OverlayId {
    /// The broker's well-known address on the overlay.
    pub const BROKER: OverlayId = OverlayId([0u8; OVERLAY_ID_LEN]);

    pub fn random() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; OVERLAY_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        OverlayId(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvalidOverlayId> {
        if bytes.len() != OVERLAY_ID_LEN {
            return Err(InvalidOverlayId(bytes.len()));
        }

        let mut id = [0u8; OVERLAY_ID_LEN];
        id.copy_from_slice(bytes);
        Ok(OverlayId(id))
    }

    pub fn as_bytes(&self) -> &[u8; OVERLAY_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OverlayId({})", self)
    }
}

impl FromStr for OverlayId {
    type Err = InvalidOverlayId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InvalidOverlayId(s.len()))?;
        Self::from_bytes(&bytes)
    }
}

#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("an overlay id is {expected} bytes, got {0}", expected = OVERLAY_ID_LEN)]
pub struct InvalidOverlayId(usize);
