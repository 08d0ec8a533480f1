//! Protobuf schema for peer-to-peer exchange messages riding the relay
//! payload.

use crate::{
    exchange::{Message, PeerInfo},
    order::ExchangeId,
    payment::AccountId,
    wallet::SignedPartial,
};
use ::bitcoin::{consensus, hashes::Hash, secp256k1::PublicKey, Transaction, Txid};
use prost::Message as _;
use std::convert::TryFrom;
use uuid::Uuid;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerFrame {
    #[prost(bytes = "vec", tag = "1")]
    pub exchange_id: Vec<u8>,
    #[prost(oneof = "peer_frame::Body", tags = "2, 3, 4, 5, 6, 7, 8")]
    pub body: Option<peer_frame::Body>,
}

pub mod peer_frame {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "2")]
        PeerInfo(super::PeerInfoMessage),
        #[prost(message, tag = "3")]
        Deposit(super::DepositMessage),
        #[prost(message, tag = "4")]
        DepositSignature(super::DepositSignatureMessage),
        #[prost(message, tag = "5")]
        DepositBroadcast(super::DepositBroadcastMessage),
        #[prost(message, tag = "6")]
        StepRelease(super::StepMessage),
        #[prost(message, tag = "7")]
        StepConfirmation(super::StepMessage),
        #[prost(message, tag = "8")]
        Abort(super::AbortMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerInfoMessage {
    #[prost(string, tag = "1")]
    pub account: String,
    #[prost(bytes = "vec", tag = "2")]
    pub public_key: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DepositMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub tx: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DepositSignatureMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DepositBroadcastMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub txid: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StepMessage {
    #[prost(uint32, tag = "1")]
    pub step: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub tx: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbortMessage {
    #[prost(string, tag = "1")]
    pub reason: String,
}

pub fn encode(exchange_id: ExchangeId, message: &Message) -> Vec<u8> {
    let body = match message {
        Message::PeerInfo(info) => peer_frame::Body::PeerInfo(PeerInfoMessage {
            account: info.account.0.clone(),
            public_key: info.public_key.serialize().to_vec(),
        }),
        Message::Deposit { tx } => peer_frame::Body::Deposit(DepositMessage {
            tx: consensus::serialize(tx),
        }),
        Message::DepositSignature { signature } => {
            peer_frame::Body::DepositSignature(DepositSignatureMessage {
                signature: signature.0.clone(),
            })
        }
        Message::DepositBroadcast { txid } => {
            peer_frame::Body::DepositBroadcast(DepositBroadcastMessage {
                txid: txid.to_byte_array().to_vec(),
            })
        }
        Message::StepRelease {
            step,
            tx,
            signature,
        } => peer_frame::Body::StepRelease(StepMessage {
            step: *step,
            tx: consensus::serialize(tx),
            signature: signature.0.clone(),
        }),
        Message::StepConfirmation {
            step,
            tx,
            signature,
        } => peer_frame::Body::StepConfirmation(StepMessage {
            step: *step,
            tx: consensus::serialize(tx),
            signature: signature.0.clone(),
        }),
        Message::Abort { reason } => peer_frame::Body::Abort(AbortMessage {
            reason: reason.clone(),
        }),
    };

    PeerFrame {
        exchange_id: exchange_id.as_uuid().as_bytes().to_vec(),
        body: Some(body),
    }
    .encode_to_vec()
}

pub fn decode(payload: &[u8]) -> Result<(ExchangeId, Message), WireError> {
    let frame = PeerFrame::decode(payload)?;

    let exchange_id = ExchangeId::from_uuid(
        Uuid::from_slice(&frame.exchange_id).map_err(|_| WireError::MalformedExchangeId)?,
    );

    let message = match frame.body.ok_or(WireError::EmptyBody)? {
        peer_frame::Body::PeerInfo(info) => Message::PeerInfo(PeerInfo {
            account: AccountId(info.account),
            public_key: PublicKey::from_slice(&info.public_key)
                .map_err(|_| WireError::MalformedPublicKey)?,
        }),
        peer_frame::Body::Deposit(deposit) => Message::Deposit {
            tx: decode_tx(&deposit.tx)?,
        },
        peer_frame::Body::DepositSignature(sig) => Message::DepositSignature {
            signature: SignedPartial(sig.signature),
        },
        peer_frame::Body::DepositBroadcast(broadcast) => Message::DepositBroadcast {
            txid: decode_txid(&broadcast.txid)?,
        },
        peer_frame::Body::StepRelease(step) => Message::StepRelease {
            step: step.step,
            tx: decode_tx(&step.tx)?,
            signature: SignedPartial(step.signature),
        },
        peer_frame::Body::StepConfirmation(step) => Message::StepConfirmation {
            step: step.step,
            tx: decode_tx(&step.tx)?,
            signature: SignedPartial(step.signature),
        },
        peer_frame::Body::Abort(abort) => Message::Abort {
            reason: abort.reason,
        },
    };

    Ok((exchange_id, message))
}

fn decode_tx(bytes: &[u8]) -> Result<Transaction, WireError> {
    consensus::deserialize(bytes).map_err(|_| WireError::MalformedTransaction)
}

fn decode_txid(bytes: &[u8]) -> Result<Txid, WireError> {
    let array = <[u8; 32]>::try_from(bytes).map_err(|_| WireError::MalformedTxid)?;
    Ok(Txid::from_byte_array(array))
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed peer frame")]
    Decode(#[from] prost::DecodeError),
    #[error("peer frame has no body")]
    EmptyBody,
    #[error("exchange id is not a uuid")]
    MalformedExchangeId,
    #[error("public key does not parse")]
    MalformedPublicKey,
    #[error("transaction does not deserialize")]
    MalformedTransaction,
    #[error("txid must be 32 bytes")]
    MalformedTxid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use crate::wallet::KeyPair;

    #[test]
    fn peer_info_round_trip() {
        let exchange_id = ExchangeId::random();
        let message = Message::PeerInfo(PeerInfo {
            account: AccountId("account-1".to_string()),
            public_key: KeyPair::random().public,
        });

        let decoded = decode(&encode(exchange_id, &message)).unwrap();

        assert_eq!(decoded, (exchange_id, message));
    }

    #[test]
    fn step_release_round_trip() {
        let exchange_id = ExchangeId::random();
        let message = Message::StepRelease {
            step: 7,
            tx: test_support::placeholder_transaction(1234),
            signature: SignedPartial(vec![0xab; 64]),
        };

        let decoded = decode(&encode(exchange_id, &message)).unwrap();

        assert_eq!(decoded, (exchange_id, message));
    }

    #[test]
    fn abort_round_trip() {
        let exchange_id = ExchangeId::random();
        let message = Message::Abort {
            reason: "done with this".to_string(),
        };

        let decoded = decode(&encode(exchange_id, &message)).unwrap();

        assert_eq!(decoded, (exchange_id, message));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode(&[0x01, 0x02, 0x03]).is_err());
    }
}
