//! Keeps live orders in the broker's book. The broker treats absence of
//! refreshes as implicit withdrawal, so entries are re-published on an
//! interval until told to stop.

use crate::{
    broker::{self, OrderBookEntry},
    order::OrderId,
    relay::{self, OverlayId},
};
use std::{collections::HashMap, time::Duration};
use tokio::sync::mpsc;

const COMMAND_BUFFER: usize = 16;

#[derive(Debug)]
pub enum Command {
    KeepSubmitting(OrderBookEntry),
    StopSubmitting(OrderId),
}

#[derive(Debug)]
pub struct Supervisor {
    relay: relay::Handle,
    commands: mpsc::Receiver<Command>,
    entries: HashMap<OrderId, OrderBookEntry>,
    resubmit_interval: Duration,
}

pub fn new(
    relay: relay::Handle,
    resubmit_interval: Duration,
) -> (Supervisor, mpsc::Sender<Command>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

    let supervisor = Supervisor {
        relay,
        commands: command_rx,
        entries: HashMap::new(),
        resubmit_interval,
    };

    (supervisor, command_tx)
}

impl Supervisor {
    pub async fn run(mut self) {
        let mut refresh = tokio::time::interval(self.resubmit_interval);
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::KeepSubmitting(entry)) => {
                        tracing::info!(
                            "submitting order {} to the broker",
                            entry.order_id
                        );
                        self.publish(&entry).await;
                        self.entries.insert(entry.order_id, entry);
                    }
                    Some(Command::StopSubmitting(order_id)) => {
                        if self.entries.remove(&order_id).is_some() {
                            tracing::info!("order {} leaves the book", order_id);
                        }
                    }
                    None => return,
                },
                _ = refresh.tick() => {
                    for entry in self.entries.values() {
                        self.publish(entry).await;
                    }
                }
            }
        }
    }

    async fn publish(&self, entry: &OrderBookEntry) {
        let payload = broker::entry_payload(entry);
        if self.relay.send(OverlayId::BROKER, payload).await.is_err() {
            tracing::warn!("relay is gone, cannot publish order book entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bitcoin,
        broker::BrokerMessage,
        fiat::{self, Currency},
        order::Side,
        rate::Price,
        relay::{client, Server},
    };
    use rust_decimal_macros::dec;

    fn entry() -> OrderBookEntry {
        OrderBookEntry {
            order_id: OrderId::random(),
            side: Side::Ask,
            amount: bitcoin::Amount::from_btc(2.0).unwrap(),
            price: Price::new(fiat::Amount::new(Currency::Eur, dec!(900)).unwrap()).unwrap(),
        }
    }

    async fn recv_entry(events: &mut mpsc::Receiver<client::Event>) -> Option<OrderBookEntry> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for broker traffic")?;
            match event {
                client::Event::Message { payload, .. } => {
                    match broker::decode(&payload).expect("broker frame") {
                        BrokerMessage::Entry(entry) => return Some(entry),
                        other => panic!("unexpected broker message: {:?}", other),
                    }
                }
                client::Event::Status { .. } => continue,
            }
        }
    }

    #[tokio::test]
    async fn entries_are_republished_until_stopped() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run());

        // The broker occupies its well-known id on the overlay.
        let (broker_client, _broker_handle, mut broker_events) =
            client::new(addr, OverlayId::BROKER);
        tokio::spawn(broker_client.run());

        let (peer_client, peer_handle, _peer_events) =
            client::new(addr, OverlayId::random());
        tokio::spawn(peer_client.run());

        let (supervisor, commands) = new(peer_handle, Duration::from_millis(50));
        tokio::spawn(supervisor.run());

        let entry = entry();
        commands
            .send(Command::KeepSubmitting(entry.clone()))
            .await
            .unwrap();

        // Initial publish plus at least one refresh.
        assert_eq!(recv_entry(&mut broker_events).await, Some(entry.clone()));
        assert_eq!(recv_entry(&mut broker_events).await, Some(entry.clone()));

        commands
            .send(Command::StopSubmitting(entry.order_id))
            .await
            .unwrap();

        // Drain what was already in flight, then expect silence.
        tokio::time::sleep(Duration::from_millis(100)).await;
        while tokio::time::timeout(Duration::from_millis(120), broker_events.recv())
            .await
            .is_ok()
        {}

        let silence =
            tokio::time::timeout(Duration::from_millis(200), broker_events.recv()).await;
        assert!(silence.is_err(), "entry kept flowing after stop");
    }
}
