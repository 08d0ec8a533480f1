//! Joint reservation of bitcoin and fiat before an order goes live. One
//! blocker serves the whole process so two orders can never over-commit
//! the same coins or balance; its mailbox serializes all mutations.

use crate::{
    bitcoin, fiat,
    order::OrderId,
    payment::{self, PaymentProcessor},
    wallet::{self, Wallet},
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub bitcoin: wallet::ReservationId,
    pub fiat: payment::ReservationId,
}

#[derive(Debug)]
pub enum Command {
    Block {
        order_id: OrderId,
        bitcoin: bitcoin::Amount,
        fiat: fiat::Amount,
    },
    /// Release both sides of an order's reservation; idempotent.
    Unblock { order_id: OrderId },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FundsEvent {
    Available { order_id: OrderId },
    Unavailable { order_id: OrderId },
}

pub struct FundsBlocker {
    wallet: Arc<dyn Wallet>,
    payment: Arc<dyn PaymentProcessor>,
    commands: mpsc::Receiver<Command>,
    revocations: mpsc::Receiver<wallet::ReservationId>,
    events: mpsc::Sender<FundsEvent>,
    held: HashMap<OrderId, Reservation>,
}

impl std::fmt::Debug for FundsBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundsBlocker")
            .field("held", &self.held)
            .finish()
    }
}

/// Returns the blocker plus the command and event endpoints. The
/// `revocations` stream is fed by the wallet whenever a re-org
/// invalidates a standing reservation.
pub fn new(
    wallet: Arc<dyn Wallet>,
    payment: Arc<dyn PaymentProcessor>,
    revocations: mpsc::Receiver<wallet::ReservationId>,
) -> (FundsBlocker, mpsc::Sender<Command>, mpsc::Receiver<FundsEvent>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let blocker = FundsBlocker {
        wallet,
        payment,
        commands: command_rx,
        revocations,
        events: event_tx,
        held: HashMap::new(),
    };

    (blocker, command_tx, event_rx)
}

impl FundsBlocker {
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Block { order_id, bitcoin, fiat }) => {
                        self.block(order_id, bitcoin, fiat).await;
                    }
                    Some(Command::Unblock { order_id }) => {
                        self.unblock(order_id).await;
                    }
                    None => return,
                },
                Some(revoked) = self.revocations.recv() => {
                    self.revoke(revoked).await;
                }
            }
        }
    }

    async fn block(&mut self, order_id: OrderId, btc: bitcoin::Amount, fiat: fiat::Amount) {
        if self.held.contains_key(&order_id) {
            self.emit(FundsEvent::Available { order_id }).await;
            return;
        }

        let bitcoin_reservation = match self.wallet.reserve(btc).await {
            Ok(reservation) => reservation,
            Err(e) => {
                tracing::warn!("cannot reserve {} for order {}: {}", btc, order_id, e);
                self.emit(FundsEvent::Unavailable { order_id }).await;
                return;
            }
        };

        let fiat_reservation = match self.payment.reserve(fiat).await {
            Ok(reservation) => reservation,
            Err(e) => {
                tracing::warn!("cannot reserve {} for order {}: {}", fiat, order_id, e);
                if let Err(e) = self.wallet.release(bitcoin_reservation).await {
                    tracing::error!("leaked bitcoin reservation: {}", e);
                }
                self.emit(FundsEvent::Unavailable { order_id }).await;
                return;
            }
        };

        self.held.insert(
            order_id,
            Reservation {
                bitcoin: bitcoin_reservation,
                fiat: fiat_reservation,
            },
        );
        self.emit(FundsEvent::Available { order_id }).await;
    }

    async fn unblock(&mut self, order_id: OrderId) {
        let reservation = match self.held.remove(&order_id) {
            Some(reservation) => reservation,
            None => return,
        };

        if let Err(e) = self.wallet.release(reservation.bitcoin).await {
            tracing::error!("could not release bitcoin reservation: {}", e);
        }
        if let Err(e) = self.payment.release(reservation.fiat).await {
            tracing::error!("could not release fiat reservation: {}", e);
        }
    }

    async fn revoke(&mut self, revoked: wallet::ReservationId) {
        let order_id = self
            .held
            .iter()
            .find(|(_, reservation)| reservation.bitcoin == revoked)
            .map(|(order_id, _)| *order_id);

        let order_id = match order_id {
            Some(order_id) => order_id,
            None => return,
        };

        tracing::warn!(
            "bitcoin reservation of order {} was invalidated",
            order_id
        );

        // The bitcoin side is already gone; only fiat remains to release.
        if let Some(reservation) = self.held.remove(&order_id) {
            if let Err(e) = self.payment.release(reservation.fiat).await {
                tracing::error!("could not release fiat reservation: {}", e);
            }
        }

        self.emit(FundsEvent::Unavailable { order_id }).await;
    }

    async fn emit(&self, event: FundsEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("nobody listens to funds events");
        }
    }
}
