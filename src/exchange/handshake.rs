//! Symmetric first phase of an exchange: announce peer info, co-sign the
//! two deposits, broadcast them and wait for confirmations.

use crate::{
    bitcoin,
    exchange::{runner::Actor, Cause, Deposits, Message, PeerInfo, Role},
    wallet::KeyPair,
};
use ::bitcoin::Txid;
use tokio::time::Instant;

/// Everything the step phase needs from a completed handshake.
#[derive(Debug)]
pub(super) struct Setup {
    pub deposits: Deposits,
    pub remote: PeerInfo,
    pub key: KeyPair,
    pub started_at: std::time::SystemTime,
}

pub(super) async fn run(actor: &mut Actor) -> Result<Setup, Cause> {
    let deadline = Instant::now() + actor.timeouts.handshake;
    let started_at = std::time::SystemTime::now();

    let key = actor.wallet.create_key_pair().await;
    let account = actor.payment.retrieve_account_id().await?;
    let local_info = Message::PeerInfo(PeerInfo {
        account,
        public_key: key.public,
    });
    actor.send(local_info.clone()).await?;

    // Counterpart announcement; ours is re-sent while we wait in case it
    // raced ahead of the counterpart joining the overlay.
    let remote = loop {
        let message = actor
            .recv(deadline, Some(&local_info), Cause::HandshakeTimeout)
            .await?;
        match message {
            Message::PeerInfo(info) => break info,
            Message::Abort { reason } => return Err(Cause::CounterpartAbort { reason }),
            other => drop_unexpected(&other, "awaiting peer info"),
        }
    };

    // Our deposit, locked to both keys, goes out for co-signing.
    let deposit_tx = actor
        .wallet
        .create_deposit(deposit_amount(actor), key.public, remote.public_key)
        .await?;
    let deposit_message = Message::Deposit {
        tx: deposit_tx.clone(),
    };
    actor.send(deposit_message.clone()).await?;

    let mut local_txid: Option<Txid> = None;
    let mut remote_txid: Option<Txid> = None;

    let (local, remote_deposit) = loop {
        if let (Some(local), Some(remote)) = (local_txid, remote_txid) {
            break (local, remote);
        }

        let message = actor
            .recv(deadline, Some(&deposit_message), Cause::HandshakeTimeout)
            .await?;
        match message {
            Message::Deposit { tx } => {
                // Counterpart's deposit; co-signing is idempotent, so a
                // re-sent deposit simply gets a fresh signature.
                let signature = actor.wallet.sign_partial(&tx, &key).await?;
                actor.send(Message::DepositSignature { signature }).await?;
            }
            Message::DepositSignature { signature: _ } => match local_txid {
                Some(txid) => {
                    actor.send(Message::DepositBroadcast { txid }).await?;
                }
                None => {
                    let txid = actor.wallet.broadcast(deposit_tx.clone()).await?;
                    actor.own_deposit = Some(txid);
                    local_txid = Some(txid);
                    actor.send(Message::DepositBroadcast { txid }).await?;
                }
            },
            Message::DepositBroadcast { txid } => remote_txid = Some(txid),
            Message::PeerInfo(_) => {
                // Counterpart has not seen our announcement yet.
                actor.send(local_info.clone()).await?;
            }
            Message::Abort { reason } => return Err(Cause::CounterpartAbort { reason }),
            other => drop_unexpected(&other, "co-signing deposits"),
        }
    };

    // A deposit invalidated while we wait (for example by a re-org) fails
    // the exchange; recovery is the time-locked refund.
    let required = actor.timeouts.required_confirmations;
    let confirmations = futures::future::try_join(
        actor.wallet.watch_confirmations(local, required),
        actor.wallet.watch_confirmations(remote_deposit, required),
    );
    match tokio::time::timeout_at(deadline, confirmations).await {
        Ok(Ok(((), ()))) => {}
        Ok(Err(e)) => return Err(Cause::Wallet(e)),
        Err(_elapsed) => return Err(Cause::HandshakeTimeout),
    }

    let deposits = match actor.params.role {
        Role::Buyer => Deposits {
            buyer: local,
            seller: remote_deposit,
        },
        Role::Seller => Deposits {
            buyer: remote_deposit,
            seller: local,
        },
    };

    Ok(Setup {
        deposits,
        remote,
        key,
        started_at,
    })
}

/// The seller locks up the full traded amount; the buyer posts two steps
/// worth of collateral against walking away mid-step.
fn deposit_amount(actor: &Actor) -> bitcoin::Amount {
    match actor.params.role {
        Role::Seller => actor.params.bitcoin_amount,
        Role::Buyer => {
            let step = actor.params.bitcoin_amount.as_sat() / u64::from(actor.params.step_count);
            bitcoin::Amount::from_sat(step.saturating_mul(2))
        }
    }
}

fn drop_unexpected(message: &Message, phase: &str) {
    tracing::debug!("dropping {} while {}", message.kind(), phase);
}
