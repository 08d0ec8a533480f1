use crate::{
    broker,
    exchange::{buyer, handshake, seller, wire, Cause, Event, Message, Params, Role},
    order::ExchangeState,
    payment::PaymentProcessor,
    relay::{self, OverlayId},
    wallet::Wallet,
};
use ::bitcoin::Txid;
use std::{cmp, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{timeout, Instant},
};

/// How often an unanswered message is re-sent while waiting. Loss on the
/// overlay is not masked, so liveness comes from retransmission.
const RETRANSMIT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone)]
pub struct Timeouts {
    pub handshake: Duration,
    pub step: Duration,
    pub required_confirmations: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(120),
            step: Duration::from_secs(90),
            required_confirmations: 1,
        }
    }
}

/// Drive one exchange to a terminal state, reporting progress and the
/// outcome through `events`.
pub async fn run(
    params: Params,
    wallet: Arc<dyn Wallet>,
    payment: Arc<dyn PaymentProcessor>,
    relay: relay::Handle,
    inbox: mpsc::Receiver<Message>,
    events: mpsc::Sender<Event>,
    timeouts: Timeouts,
) {
    let exchange_id = params.exchange_id;
    let role = params.role;
    tracing::info!(%exchange_id, %role, "starting exchange");

    let mut actor = Actor {
        params,
        wallet,
        payment,
        relay,
        inbox,
        events,
        timeouts,
        steps_completed: 0,
        own_deposit: None,
    };

    match execute(&mut actor).await {
        Ok(()) => {
            actor.emit_progress(ExchangeState::Succeeded).await;
            let _ = actor.events.send(Event::Completed { id: exchange_id }).await;
            tracing::info!(%exchange_id, "exchange completed");
        }
        Err(cause) => {
            tracing::warn!(%exchange_id, "exchange failed: {}", cause);

            if !matches!(cause, Cause::CounterpartAbort { .. } | Cause::Transport) {
                let abort = Message::Abort {
                    reason: cause.to_string(),
                };
                let _ = actor.send(abort).await;
            }

            // A failure before any step committed means the pairing never
            // produced anything; the broker learns so it can re-match.
            if actor.steps_completed == 0 {
                let payload = broker::rejection_payload(exchange_id, cause.to_string());
                let _ = actor.relay.send(OverlayId::BROKER, payload).await;
            }

            if let Some(deposit) = actor.own_deposit {
                match actor.wallet.refund(deposit).await {
                    Ok(txid) => tracing::info!(%exchange_id, "refund broadcast as {}", txid),
                    Err(e) => tracing::error!(%exchange_id, "could not refund deposit: {}", e),
                }
            }

            actor.emit_progress(ExchangeState::Failed).await;
            let _ = actor
                .events
                .send(Event::Failed {
                    id: exchange_id,
                    cause,
                })
                .await;
        }
    }
}

async fn execute(actor: &mut Actor) -> Result<(), Cause> {
    actor.emit_progress(ExchangeState::Running).await;

    let setup = handshake::run(actor).await?;
    tracing::info!(
        exchange_id = %actor.params.exchange_id,
        "handshake complete, deposits confirmed"
    );

    match actor.params.role {
        Role::Buyer => buyer::run(actor, &setup).await,
        Role::Seller => seller::run(actor, &setup).await,
    }
}

pub(super) struct Actor {
    pub(super) params: Params,
    pub(super) wallet: Arc<dyn Wallet>,
    pub(super) payment: Arc<dyn PaymentProcessor>,
    pub(super) relay: relay::Handle,
    pub(super) inbox: mpsc::Receiver<Message>,
    pub(super) events: mpsc::Sender<Event>,
    pub(super) timeouts: Timeouts,
    pub(super) steps_completed: u32,
    /// Set once our deposit hits the chain, so a failure can always fall
    /// back to the time-locked refund.
    pub(super) own_deposit: Option<Txid>,
}

impl Actor {
    pub(super) async fn send(&self, message: Message) -> Result<(), Cause> {
        let payload = wire::encode(self.params.exchange_id, &message);
        self.relay
            .send(self.params.counterpart, payload)
            .await
            .map_err(|_| Cause::Transport)
    }

    /// Next counterpart message, or `on_timeout` once `deadline` passes.
    /// While waiting, `retransmit` is re-sent every few seconds.
    pub(super) async fn recv(
        &mut self,
        deadline: Instant,
        retransmit: Option<&Message>,
        on_timeout: Cause,
    ) -> Result<Message, Cause> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(on_timeout);
            }

            let wait = cmp::min(RETRANSMIT_INTERVAL, deadline - now);
            let received = timeout(wait, self.inbox.recv()).await;
            match received {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => return Err(Cause::Transport),
                Err(_elapsed) => {
                    if let Some(message) = retransmit {
                        self.send(message.clone()).await?;
                    }
                }
            }
        }
    }

    pub(super) async fn complete_step(&mut self, step: u32) {
        self.steps_completed = step;
        tracing::info!(
            exchange_id = %self.params.exchange_id,
            "step {} of {} committed",
            step,
            self.params.step_count
        );
        self.emit_progress(ExchangeState::Running).await;
    }

    pub(super) async fn emit_progress(&self, state: ExchangeState) {
        let snapshot = self.params.snapshot(self.steps_completed, state);
        if self.events.send(Event::Progress(snapshot)).await.is_err() {
            tracing::debug!("nobody listens to exchange progress");
        }
    }
}
