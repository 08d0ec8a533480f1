//! One matched counterparty trade: handshake, funds deposit, N-step
//! payment-release protocol and settlement.

mod buyer;
mod handshake;
pub mod runner;
mod seller;
pub mod wire;

pub use runner::{run, Timeouts};

use crate::{
    bitcoin, fiat,
    order::{ExchangeId, ExchangeSnapshot, ExchangeState, OrderId},
    payment::{AccountId, PaymentError},
    relay::OverlayId,
    wallet::{SignedPartial, WalletError},
};
use ::bitcoin::{secp256k1::PublicKey, Transaction, Txid};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Buyer => f.write_str("buyer"),
            Role::Seller => f.write_str("seller"),
        }
    }
}

/// Everything fixed at construction of an exchange.
#[derive(Debug, Clone)]
pub struct Params {
    pub exchange_id: ExchangeId,
    pub order_id: OrderId,
    pub role: Role,
    pub step_count: u32,
    pub bitcoin_amount: bitcoin::Amount,
    pub fiat_amount: fiat::Amount,
    pub counterpart: OverlayId,
}

impl Params {
    pub fn snapshot(&self, steps_completed: u32, state: ExchangeState) -> ExchangeSnapshot {
        ExchangeSnapshot {
            id: self.exchange_id,
            amount: self.bitcoin_amount,
            steps_completed,
            step_count: self.step_count,
            state,
        }
    }
}

/// What each side announces about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub account: AccountId,
    pub public_key: PublicKey,
}

/// The two broadcast deposit transactions funding an exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Deposits {
    pub buyer: Txid,
    pub seller: Txid,
}

/// Messages exchanged between the two matched peers over the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    PeerInfo(PeerInfo),
    /// The sender's unsigned deposit, to be co-signed by the receiver.
    Deposit { tx: Transaction },
    /// The receiver's signature over the sender's deposit.
    DepositSignature { signature: SignedPartial },
    /// The sender has broadcast its deposit.
    DepositBroadcast { txid: Txid },
    /// Buyer→seller: fiat for `step` was paid, here is the signed partial
    /// releasing `step / N` of the seller's deposit.
    StepRelease {
        step: u32,
        tx: Transaction,
        signature: SignedPartial,
    },
    /// Seller→buyer: the release was broadcast, here is the signed
    /// partial over the buyer's own deposit for `step`.
    StepConfirmation {
        step: u32,
        tx: Transaction,
        signature: SignedPartial,
    },
    Abort { reason: String },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::PeerInfo(_) => "peer info",
            Message::Deposit { .. } => "deposit",
            Message::DepositSignature { .. } => "deposit signature",
            Message::DepositBroadcast { .. } => "deposit broadcast",
            Message::StepRelease { .. } => "step release",
            Message::StepConfirmation { .. } => "step confirmation",
            Message::Abort { .. } => "abort",
        }
    }
}

/// Why an exchange failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Cause {
    #[error("counterpart did not complete the handshake in time")]
    HandshakeTimeout,
    #[error("step {step} timed out")]
    StepTimeout { step: u32 },
    #[error("counterpart aborted: {reason}")]
    CounterpartAbort { reason: String },
    #[error("counterpart violated the protocol: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error("relay connection is gone")]
    Transport,
}

/// Terminal and progress reports towards the owning order controller.
#[derive(Debug)]
pub enum Event {
    Progress(ExchangeSnapshot),
    Completed { id: ExchangeId },
    Failed { id: ExchangeId, cause: Cause },
}
