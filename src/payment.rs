//! Contract towards the external fiat payment processor.

use crate::fiat;
use async_trait::async_trait;
use std::{fmt, time::SystemTime};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ReservationId(Uuid);

impl ReservationId {
    pub fn random() -> Self {
        ReservationId(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub step: u32,
    pub amount: fiat::Amount,
    pub reference: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("not enough fiat balance to cover {needed}")]
    InsufficientBalance { needed: fiat::Amount },
    #[error("payment was rejected by the processor: {0}")]
    Rejected(String),
    #[error("payment processor is unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn retrieve_account_id(&self) -> Result<AccountId, PaymentError>;

    /// Send fiat micro-payment `step` to `destination`.
    async fn pay(
        &self,
        step: u32,
        amount: fiat::Amount,
        destination: &AccountId,
    ) -> Result<PaymentReceipt, PaymentError>;

    /// Whether a credit of exactly `expected` has arrived since `since`.
    async fn verify_credit(
        &self,
        expected: fiat::Amount,
        since: SystemTime,
    ) -> Result<bool, PaymentError>;

    /// Earmark `amount` so no other order can commit the same balance.
    async fn reserve(&self, amount: fiat::Amount) -> Result<ReservationId, PaymentError>;

    /// Idempotent counterpart of [`PaymentProcessor::reserve`].
    async fn release(&self, reservation: ReservationId) -> Result<(), PaymentError>;
}
