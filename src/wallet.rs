//! Contract towards the bitcoin wallet. The wallet owns UTXO selection,
//! transaction construction, signing and confirmation tracking; the
//! trading engine only ever sees the operations below.

use crate::bitcoin::Amount;
use ::bitcoin::{
    secp256k1::{PublicKey, SecretKey},
    Transaction, Txid,
};
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn random() -> Self {
        let (secret, public) = crate::SECP.generate_keypair(&mut rand::thread_rng());
        Self { secret, public }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ReservationId(Uuid);

impl ReservationId {
    pub fn random() -> Self {
        ReservationId(Uuid::new_v4())
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A signature over one party's half of a jointly-locked transaction,
/// opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPartial(pub Vec<u8>);

#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletError {
    #[error("not enough funds to reserve {needed}")]
    NotEnoughFunds { needed: Amount },
    #[error("transaction was rejected by the network: {0}")]
    Rejected(String),
    #[error("wallet is unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn create_key_pair(&self) -> KeyPair;

    /// Reserve `amount` so no other order can commit the same coins.
    async fn reserve(&self, amount: Amount) -> Result<ReservationId, WalletError>;

    /// Idempotent counterpart of [`Wallet::reserve`].
    async fn release(&self, reservation: ReservationId) -> Result<(), WalletError>;

    /// Build this party's deposit: `amount` locked so that it can only be
    /// spent jointly by `local` and `remote`, with a time-locked refund
    /// clause back to `local`.
    async fn create_deposit(
        &self,
        amount: Amount,
        local: PublicKey,
        remote: PublicKey,
    ) -> Result<Transaction, WalletError>;

    /// Build the transaction releasing `step / step_count` of `deposit`
    /// to its non-owning party.
    async fn create_release(
        &self,
        deposit: Txid,
        step: u32,
        step_count: u32,
    ) -> Result<Transaction, WalletError>;

    async fn sign_partial(
        &self,
        tx: &Transaction,
        key: &KeyPair,
    ) -> Result<SignedPartial, WalletError>;

    async fn broadcast(&self, tx: Transaction) -> Result<Txid, WalletError>;

    /// Resolves once `txid` has `required` confirmations. An error means
    /// the transaction was invalidated (for example by a re-org).
    async fn watch_confirmations(&self, txid: Txid, required: u32) -> Result<(), WalletError>;

    /// Broadcast the time-locked refund clause of `deposit` once its lock
    /// matures.
    async fn refund(&self, deposit: Txid) -> Result<Txid, WalletError>;

    async fn transfer(&self, amount: Amount, address: String) -> Result<Txid, WalletError>;
}
