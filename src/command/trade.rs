//! Wires one order through the whole engine: funds blocker, submission
//! supervisor, controller and exchange runners, all talking over a relay
//! client connection.

use crate::{
    bitcoin, broker,
    config::Settings,
    controller::{AfterExchange, CancelOutcome, Controller, MatchDecision, OrderEvent},
    exchange,
    fiat, funds,
    order::{ExchangeId, Order, Side},
    payment::PaymentProcessor,
    relay::{self, OverlayId},
    submission,
    wallet::{self, Wallet},
};
use anyhow::Context;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;

const EXCHANGE_EVENT_BUFFER: usize = 32;
const EXCHANGE_INBOX_BUFFER: usize = 32;

/// How long to wait before asking for funds again after a reservation
/// failed or was revoked.
const FUNDS_RETRY_INTERVAL: Duration = Duration::from_secs(30);

pub async fn trade(
    settings: Settings,
    wallet: Arc<dyn Wallet>,
    payment: Arc<dyn PaymentProcessor>,
    wallet_revocations: mpsc::Receiver<wallet::ReservationId>,
    order: Order,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        order.total() > bitcoin::Amount::ZERO,
        "cannot trade an order over zero bitcoin"
    );

    let local_id = OverlayId::random();
    tracing::info!(
        "trading order {} as {} on the overlay",
        order.id(),
        local_id
    );

    let (client, relay_handle, mut relay_events) =
        relay::client::new(settings.relay.connect, local_id);
    tokio::spawn(client.run());

    let (blocker, funds_commands, mut funds_events) =
        funds::new(wallet.clone(), payment.clone(), wallet_revocations);
    tokio::spawn(blocker.run());

    let (supervisor, submission_commands) =
        submission::new(relay_handle.clone(), settings.broker.resubmit_interval);
    tokio::spawn(supervisor.run());

    let mut controller = Controller::new(order, settings.exchange.step_count);
    let order_id = controller.order().id();
    let (required_bitcoin, required_fiat) =
        required_funds(controller.order(), settings.exchange.step_count)?;

    funds_commands
        .send(funds::Command::Block {
            order_id,
            bitcoin: required_bitcoin,
            fiat: required_fiat,
        })
        .await
        .context("funds blocker is gone")?;

    let (exchange_events_tx, mut exchange_events) = mpsc::channel(EXCHANGE_EVENT_BUFFER);
    let mut exchanges: HashMap<ExchangeId, mpsc::Sender<exchange::Message>> = HashMap::new();

    let mut funds_ok = false;
    let mut funds_retry = tokio::time::interval(FUNDS_RETRY_INTERVAL);

    loop {
        tokio::select! {
            Some(event) = funds_events.recv() => {
                match event {
                    funds::FundsEvent::Available { .. } => {
                        funds_ok = true;
                        if let Some(entry) = controller.funds_available() {
                            let _ = submission_commands
                                .send(submission::Command::KeepSubmitting(entry))
                                .await;
                        }
                    }
                    funds::FundsEvent::Unavailable { .. } => {
                        funds_ok = false;
                        controller.funds_unavailable();
                        let _ = submission_commands
                            .send(submission::Command::StopSubmitting(order_id))
                            .await;
                    }
                }
                report(&mut controller);
            }
            _ = funds_retry.tick() => {
                if !funds_ok && !controller.order().status().is_terminal() {
                    let _ = funds_commands
                        .send(funds::Command::Block {
                            order_id,
                            bitcoin: required_bitcoin,
                            fiat: required_fiat,
                        })
                        .await;
                }
            }
            Some(event) = relay_events.recv() => {
                match event {
                    relay::client::Event::Status { network_size } => {
                        tracing::debug!("overlay now has {} members", network_size);
                    }
                    relay::client::Event::Message { from, payload } => {
                        handle_relay_message(
                            from,
                            &payload,
                            &mut controller,
                            &mut exchanges,
                            &settings,
                            &wallet,
                            &payment,
                            &relay_handle,
                            &submission_commands,
                            &exchange_events_tx,
                        )
                        .await;
                        report(&mut controller);
                    }
                }
            }
            Some(event) = exchange_events.recv() => {
                let outcome = match event {
                    exchange::Event::Progress(snapshot) => {
                        controller.exchange_progress(snapshot);
                        None
                    }
                    exchange::Event::Completed { id } => {
                        exchanges.remove(&id);
                        Some(controller.exchange_succeeded(id))
                    }
                    exchange::Event::Failed { id, cause } => {
                        exchanges.remove(&id);
                        Some(controller.exchange_failed(id, &cause))
                    }
                };
                report(&mut controller);

                match outcome {
                    Some(AfterExchange::Completed) | Some(AfterExchange::CancelledNowIdle) => {
                        shutdown(&funds_commands, &submission_commands, order_id).await;
                        break;
                    }
                    Some(AfterExchange::BackOnMarket { entry }) => {
                        let _ = submission_commands
                            .send(submission::Command::KeepSubmitting(entry))
                            .await;
                    }
                    Some(AfterExchange::Idle) | None => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                match controller.cancel("interrupted by user") {
                    CancelOutcome::ReleaseFunds => {
                        report(&mut controller);
                        shutdown(&funds_commands, &submission_commands, order_id).await;
                        break;
                    }
                    CancelOutcome::WaitForExchanges => {
                        // Running exchanges finish their current step
                        // before the cancel takes effect.
                        report(&mut controller);
                        let _ = submission_commands
                            .send(submission::Command::StopSubmitting(order_id))
                            .await;
                    }
                    CancelOutcome::AlreadyTerminal => {}
                }
            }
        }
    }

    tracing::info!(
        "order {} finished as: {}",
        order_id,
        controller.order().status()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_relay_message(
    from: OverlayId,
    payload: &[u8],
    controller: &mut Controller,
    exchanges: &mut HashMap<ExchangeId, mpsc::Sender<exchange::Message>>,
    settings: &Settings,
    wallet: &Arc<dyn Wallet>,
    payment: &Arc<dyn PaymentProcessor>,
    relay_handle: &relay::Handle,
    submission_commands: &mpsc::Sender<submission::Command>,
    exchange_events: &mpsc::Sender<exchange::Event>,
) {
    if from == OverlayId::BROKER {
        let message = match broker::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("dropping malformed broker message: {}", e);
                return;
            }
        };

        match message {
            broker::BrokerMessage::Match(m) => match controller.accept_order_match(&m) {
                MatchDecision::Accepted(params) => {
                    tracing::info!(
                        "match accepted: exchange {} over {} with {}",
                        params.exchange_id,
                        params.bitcoin_amount,
                        params.counterpart
                    );

                    // Not in the book while an exchange runs.
                    let _ = submission_commands
                        .send(submission::Command::StopSubmitting(m.order_id))
                        .await;

                    let (inbox_tx, inbox_rx) = mpsc::channel(EXCHANGE_INBOX_BUFFER);
                    exchanges.insert(params.exchange_id, inbox_tx);
                    tokio::spawn(exchange::run(
                        params,
                        wallet.clone(),
                        payment.clone(),
                        relay_handle.clone(),
                        inbox_rx,
                        exchange_events.clone(),
                        settings.exchange.timeouts(),
                    ));
                }
                MatchDecision::Rejected { cause } => {
                    tracing::info!("match rejected: {}", cause);
                    let payload = broker::rejection_payload(m.exchange_id, cause);
                    let _ = relay_handle.send(OverlayId::BROKER, payload).await;
                }
                MatchDecision::AlreadyAccepted(id) => {
                    tracing::debug!("match for already running exchange {}", id);
                }
            },
            other => {
                tracing::debug!("ignoring broker message: {:?}", other);
            }
        }
        return;
    }

    // Anything that is not broker traffic is an exchange message from a
    // counterpart; route it to the owning runner.
    match exchange::wire::decode(payload) {
        Ok((exchange_id, message)) => match exchanges.get(&exchange_id) {
            Some(inbox) => {
                if inbox.send(message).await.is_err() {
                    tracing::debug!("exchange {} is gone, dropping message", exchange_id);
                }
            }
            None => {
                tracing::debug!(
                    "dropping {} for unknown exchange {} from {}",
                    message.kind(),
                    exchange_id,
                    from
                );
            }
        },
        Err(e) => tracing::debug!("dropping malformed peer message from {}: {}", from, e),
    }
}

/// What has to be locked up before the order may enter the book: an ask
/// locks the traded bitcoin, a bid locks the fiat counter-value plus two
/// steps of bitcoin collateral.
fn required_funds(
    order: &Order,
    step_count: u32,
) -> anyhow::Result<(bitcoin::Amount, fiat::Amount)> {
    let price = order.price();
    match order.side() {
        Side::Ask => Ok((order.total(), fiat::Amount::zero(price.currency()))),
        Side::Bid => {
            let converted = price.value_of(order.total())?;
            if !converted.is_exact() {
                tracing::debug!(
                    "fiat value of {} truncated by {}",
                    order.total(),
                    converted.lost
                );
            }
            let step = order.total().as_sat() / u64::from(step_count);
            let collateral = bitcoin::Amount::from_sat(step.saturating_mul(2));
            Ok((collateral, converted.amount))
        }
    }
}

fn report(controller: &mut Controller) {
    for event in controller.take_events() {
        match event {
            OrderEvent::Submitted { entry } => {
                tracing::info!(
                    "order {} submitted to the book: {} at {}",
                    entry.order_id,
                    entry.amount,
                    entry.price
                );
            }
            OrderEvent::Progressed { old, new } => {
                tracing::info!("progress: {:.0}% -> {:.0}%", old * 100.0, new * 100.0);
            }
            OrderEvent::StatusChanged { old, new } => {
                tracing::info!("status: {} -> {}", old, new);
            }
            OrderEvent::Finished { status } => {
                tracing::info!("order finished: {}", status);
            }
        }
    }
}

async fn shutdown(
    funds_commands: &mpsc::Sender<funds::Command>,
    submission_commands: &mpsc::Sender<submission::Command>,
    order_id: crate::order::OrderId,
) {
    let _ = submission_commands
        .send(submission::Command::StopSubmitting(order_id))
        .await;
    let _ = funds_commands
        .send(funds::Command::Unblock { order_id })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::file::File,
        fiat::Currency,
        order::OrderId,
        rate::Price,
        relay::Server,
        test_support::{StaticPaymentProcessor, StaticWallet},
    };
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn settings(relay_addr: std::net::SocketAddr) -> Settings {
        let mut settings = Settings::from_config_file_and_defaults(File::default()).unwrap();
        settings.relay.connect = relay_addr;
        settings.exchange.step_count = 3;
        settings.broker.resubmit_interval = Duration::from_millis(100);
        settings
    }

    fn order(side: Side) -> Order {
        Order::new(
            OrderId::random(),
            side,
            bitcoin::Amount::from_btc(1.0).unwrap(),
            Price::new(fiat::Amount::new(Currency::Eur, dec!(900)).unwrap()).unwrap(),
        )
    }

    /// A minimal broker: waits for entries from two different peers, then
    /// matches them pairwise with one shared exchange id.
    async fn run_broker(addr: std::net::SocketAddr) {
        let (client, handle, mut events) = relay::client::new(addr, OverlayId::BROKER);
        tokio::spawn(client.run());

        let mut entries: HashMap<OverlayId, broker::OrderBookEntry> = HashMap::new();
        let mut matched: HashSet<OverlayId> = HashSet::new();

        while let Some(event) = events.recv().await {
            let (from, payload) = match event {
                relay::client::Event::Message { from, payload } => (from, payload),
                relay::client::Event::Status { .. } => continue,
            };
            let entry = match broker::decode(&payload) {
                Ok(broker::BrokerMessage::Entry(entry)) => entry,
                _ => continue,
            };
            entries.insert(from, entry);

            let bid = entries
                .iter()
                .find(|(peer, e)| e.side == Side::Bid && !matched.contains(*peer))
                .map(|(peer, e)| (*peer, e.clone()));
            let ask = entries
                .iter()
                .find(|(peer, e)| e.side == Side::Ask && !matched.contains(*peer))
                .map(|(peer, e)| (*peer, e.clone()));

            if let (Some((bid_peer, bid_entry)), Some((ask_peer, ask_entry))) = (bid, ask) {
                let exchange_id = ExchangeId::random();
                let amount = std::cmp::min(bid_entry.amount, ask_entry.amount);
                let fiat_amount = bid_entry.price.value_of(amount).unwrap().amount;

                for (peer, own, other) in vec![
                    (bid_peer, &bid_entry, ask_peer),
                    (ask_peer, &ask_entry, bid_peer),
                ] {
                    let m = broker::OrderMatch {
                        order_id: own.order_id,
                        exchange_id,
                        counterpart: other,
                        bitcoin_amount: amount,
                        fiat_amount,
                    };
                    let payload = broker::encode(&broker::BrokerMessage::Match(m));
                    handle.send(peer, payload).await.unwrap();
                }

                matched.insert(bid_peer);
                matched.insert(ask_peer);
            }
        }
    }

    #[tokio::test]
    async fn two_peers_trade_an_order_to_completion() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run());
        tokio::spawn(run_broker(addr));

        let (_buyer_revoke, buyer_revocations) = mpsc::channel(1);
        let (_seller_revoke, seller_revocations) = mpsc::channel(1);

        let buyer = tokio::spawn(trade(
            settings(addr),
            Arc::new(StaticWallet::with_balance(
                bitcoin::Amount::from_btc(10.0).unwrap(),
            )),
            Arc::new(StaticPaymentProcessor::with_balance(
                fiat::Amount::from_minor_units(Currency::Eur, 1_000_000),
            )),
            buyer_revocations,
            order(Side::Bid),
        ));
        let seller = tokio::spawn(trade(
            settings(addr),
            Arc::new(StaticWallet::with_balance(
                bitcoin::Amount::from_btc(10.0).unwrap(),
            )),
            Arc::new(StaticPaymentProcessor::with_balance(
                fiat::Amount::from_minor_units(Currency::Eur, 0),
            )),
            seller_revocations,
            order(Side::Ask),
        ));

        let both = async { tokio::try_join!(buyer, seller) };
        let (buyer_result, seller_result) =
            tokio::time::timeout(Duration::from_secs(60), both)
                .await
                .expect("trade did not finish in time")
                .expect("trade task panicked");

        buyer_result.unwrap();
        seller_result.unwrap();
    }

    #[tokio::test]
    async fn order_without_funds_never_enters_the_book() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run());

        // The broker only observes; it must never see an entry.
        let (client, _handle, mut broker_events) = relay::client::new(addr, OverlayId::BROKER);
        tokio::spawn(client.run());

        let (_revoke, revocations) = mpsc::channel(1);
        tokio::spawn(trade(
            settings(addr),
            Arc::new(StaticWallet::with_balance(bitcoin::Amount::ZERO)),
            Arc::new(StaticPaymentProcessor::with_balance(
                fiat::Amount::from_minor_units(Currency::Eur, 0),
            )),
            revocations,
            order(Side::Ask),
        ));

        let saw_entry = tokio::time::timeout(Duration::from_millis(700), async {
            while let Some(event) = broker_events.recv().await {
                if let relay::client::Event::Message { payload, .. } = event {
                    if let Ok(broker::BrokerMessage::Entry(_)) = broker::decode(&payload) {
                        return true;
                    }
                }
            }
            false
        })
        .await;

        assert!(saw_entry.is_err(), "offline order leaked into the book");
    }

    #[test]
    fn bid_orders_lock_fiat_and_collateral() {
        let order = order(Side::Bid);

        let (btc, fiat) = required_funds(&order, 10).unwrap();

        assert_eq!(fiat, fiat::Amount::from_minor_units(Currency::Eur, 90_000));
        assert_eq!(btc, bitcoin::Amount::from_btc(0.2).unwrap());
    }

    #[test]
    fn ask_orders_lock_the_full_bitcoin_amount() {
        let order = order(Side::Ask);

        let (btc, fiat) = required_funds(&order, 10).unwrap();

        assert_eq!(btc, bitcoin::Amount::from_btc(1.0).unwrap());
        assert!(fiat.is_zero());
    }
}
