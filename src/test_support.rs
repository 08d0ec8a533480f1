//! Deterministic doubles for the external wallet and payment processor.

use crate::{
    bitcoin, fiat,
    payment::{self, AccountId, PaymentError, PaymentProcessor, PaymentReceipt},
    wallet::{self, KeyPair, SignedPartial, Wallet, WalletError},
};
use ::bitcoin::{
    absolute, hashes::Hash, secp256k1::PublicKey, transaction, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::Mutex,
    time::SystemTime,
};

/// A syntactically valid transaction whose identity is derived from
/// `seed`, so distinct seeds give distinct txids.
pub fn placeholder_transaction(seed: u64) -> Transaction {
    #[allow(clippy::cast_possible_truncation)]
    let vout = (seed % u64::from(u32::MAX)) as u32;

    Transaction {
        version: transaction::Version::TWO,
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: ::bitcoin::Amount::from_sat(seed),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

#[derive(Debug)]
pub struct StaticWallet {
    state: Mutex<WalletState>,
}

#[derive(Debug)]
struct WalletState {
    balance: bitcoin::Amount,
    reservations: HashMap<wallet::ReservationId, bitcoin::Amount>,
    broadcast: Vec<Transaction>,
    counter: u64,
}

impl StaticWallet {
    pub fn with_balance(balance: bitcoin::Amount) -> Self {
        Self {
            state: Mutex::new(WalletState {
                balance,
                reservations: HashMap::new(),
                broadcast: Vec::new(),
                counter: 0,
            }),
        }
    }

    pub fn reserved(&self) -> bitcoin::Amount {
        let state = self.state.lock().unwrap();
        state.reservations.values().copied().sum()
    }

    pub fn reservation_ids(&self) -> Vec<wallet::ReservationId> {
        let state = self.state.lock().unwrap();
        state.reservations.keys().copied().collect()
    }

    pub fn broadcast_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().broadcast.clone()
    }
}

#[async_trait]
impl Wallet for StaticWallet {
    async fn create_key_pair(&self) -> KeyPair {
        KeyPair::random()
    }

    async fn reserve(
        &self,
        amount: bitcoin::Amount,
    ) -> Result<wallet::ReservationId, WalletError> {
        let mut state = self.state.lock().unwrap();
        let reserved: bitcoin::Amount = state.reservations.values().copied().sum();
        let available = state
            .balance
            .checked_sub(reserved)
            .unwrap_or(bitcoin::Amount::ZERO);

        if amount > available {
            return Err(WalletError::NotEnoughFunds { needed: amount });
        }

        let id = wallet::ReservationId::random();
        state.reservations.insert(id, amount);
        Ok(id)
    }

    async fn release(&self, reservation: wallet::ReservationId) -> Result<(), WalletError> {
        self.state.lock().unwrap().reservations.remove(&reservation);
        Ok(())
    }

    async fn create_deposit(
        &self,
        amount: bitcoin::Amount,
        _local: PublicKey,
        _remote: PublicKey,
    ) -> Result<Transaction, WalletError> {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        Ok(placeholder_transaction(amount.as_sat() + state.counter))
    }

    async fn create_release(
        &self,
        deposit: Txid,
        step: u32,
        step_count: u32,
    ) -> Result<Transaction, WalletError> {
        let tag = u64::from(deposit.to_byte_array()[0]);
        Ok(placeholder_transaction(
            tag + u64::from(step) * 1_000 + u64::from(step_count),
        ))
    }

    async fn sign_partial(
        &self,
        tx: &Transaction,
        _key: &KeyPair,
    ) -> Result<SignedPartial, WalletError> {
        Ok(SignedPartial(tx.compute_txid().to_byte_array().to_vec()))
    }

    async fn broadcast(&self, tx: Transaction) -> Result<Txid, WalletError> {
        let txid = tx.compute_txid();
        self.state.lock().unwrap().broadcast.push(tx);
        Ok(txid)
    }

    async fn watch_confirmations(
        &self,
        _txid: Txid,
        _required: u32,
    ) -> Result<(), WalletError> {
        Ok(())
    }

    async fn refund(&self, deposit: Txid) -> Result<Txid, WalletError> {
        let refund = placeholder_transaction(u64::from(deposit.to_byte_array()[0]) + 77);
        let txid = refund.compute_txid();
        self.state.lock().unwrap().broadcast.push(refund);
        Ok(txid)
    }

    async fn transfer(
        &self,
        _amount: bitcoin::Amount,
        _address: String,
    ) -> Result<Txid, WalletError> {
        Ok(Txid::all_zeros())
    }
}

#[derive(Debug)]
pub struct StaticPaymentProcessor {
    account: AccountId,
    state: Mutex<PaymentState>,
}

#[derive(Debug)]
struct PaymentState {
    balance: fiat::Amount,
    reservations: HashMap<payment::ReservationId, fiat::Amount>,
    payments: Vec<PaymentReceipt>,
}

impl StaticPaymentProcessor {
    pub fn with_balance(balance: fiat::Amount) -> Self {
        Self {
            account: AccountId(format!("account-{}", uuid::Uuid::new_v4())),
            state: Mutex::new(PaymentState {
                balance,
                reservations: HashMap::new(),
                payments: Vec::new(),
            }),
        }
    }

    pub fn payments(&self) -> Vec<PaymentReceipt> {
        self.state.lock().unwrap().payments.clone()
    }

    pub fn reserved(&self) -> fiat::Amount {
        let state = self.state.lock().unwrap();
        let currency = state.balance.currency();
        let minor = state
            .reservations
            .values()
            .map(fiat::Amount::as_minor_units)
            .sum();
        fiat::Amount::from_minor_units(currency, minor)
    }
}

#[async_trait]
impl PaymentProcessor for StaticPaymentProcessor {
    async fn retrieve_account_id(&self) -> Result<AccountId, PaymentError> {
        Ok(self.account.clone())
    }

    async fn pay(
        &self,
        step: u32,
        amount: fiat::Amount,
        destination: &AccountId,
    ) -> Result<PaymentReceipt, PaymentError> {
        let mut state = self.state.lock().unwrap();
        let receipt = PaymentReceipt {
            step,
            amount,
            reference: format!("{}-{}", destination, step),
        };
        state.payments.push(receipt.clone());
        Ok(receipt)
    }

    async fn verify_credit(
        &self,
        _expected: fiat::Amount,
        _since: SystemTime,
    ) -> Result<bool, PaymentError> {
        Ok(true)
    }

    async fn reserve(
        &self,
        amount: fiat::Amount,
    ) -> Result<payment::ReservationId, PaymentError> {
        let mut state = self.state.lock().unwrap();
        let reserved: u64 = state
            .reservations
            .values()
            .map(fiat::Amount::as_minor_units)
            .sum();
        let available = state.balance.as_minor_units().saturating_sub(reserved);

        if amount.as_minor_units() > available {
            return Err(PaymentError::InsufficientBalance { needed: amount });
        }

        let id = payment::ReservationId::random();
        state.reservations.insert(id, amount);
        Ok(id)
    }

    async fn release(&self, reservation: payment::ReservationId) -> Result<(), PaymentError> {
        self.state.lock().unwrap().reservations.remove(&reservation);
        Ok(())
    }
}
