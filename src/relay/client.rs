use crate::relay::{
    wire::{self, envelope::Body},
    OverlayId,
};
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, time::Duration};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::sleep,
};
use tokio_util::codec::Framed;

const OUTBOUND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// What the overlay surfaces to the rest of the peer.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Message { from: OverlayId, payload: Vec<u8> },
    Status { network_size: u32 },
}

/// Cheap handle for sending over the overlay from anywhere in the peer.
#[derive(Debug, Clone)]
pub struct Handle {
    tx: mpsc::Sender<Outbound>,
}

impl Handle {
    pub async fn send(&self, to: OverlayId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(Outbound { to, payload })
            .await
            .map_err(|_| TransportError)
    }
}

#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("relay client has shut down")]
pub struct TransportError;

#[derive(Debug)]
struct Outbound {
    to: OverlayId,
    payload: Vec<u8>,
}

/// The peer-side half of the overlay. `run` connects, joins as
/// `local_id` and keeps the connection alive with bounded exponential
/// backoff; frames lost while disconnected are not masked.
#[derive(Debug)]
pub struct Client {
    connect: SocketAddr,
    local_id: OverlayId,
    outbound: mpsc::Receiver<Outbound>,
    events: mpsc::Sender<Event>,
    initial_backoff: Duration,
}

pub fn new(connect: SocketAddr, local_id: OverlayId) -> (Client, Handle, mpsc::Receiver<Event>) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let client = Client {
        connect,
        local_id,
        outbound: outbound_rx,
        events: event_tx,
        initial_backoff: INITIAL_BACKOFF,
    };

    (client, Handle { tx: outbound_tx }, event_rx)
}

impl Client {
    #[cfg(test)]
    fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub async fn run(mut self) {
        let mut backoff = self.initial_backoff;

        loop {
            match TcpStream::connect(self.connect).await {
                Ok(stream) => {
                    tracing::debug!("connected to relay server at {}", self.connect);
                    match self.session(stream).await {
                        SessionEnd::Joined => backoff = self.initial_backoff,
                        SessionEnd::NeverJoined => {}
                        SessionEnd::Shutdown => return,
                    }
                    tracing::warn!("lost connection to relay server");
                }
                Err(e) => {
                    tracing::warn!("cannot reach relay server at {}: {}", self.connect, e);
                }
            }

            sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    }

    /// Runs one connected session until the socket dies or the peer shuts
    /// down. Reports whether the join round-trip succeeded so the
    /// reconnect loop can reset its backoff.
    async fn session(&mut self, stream: TcpStream) -> SessionEnd {
        let mut framed = Framed::new(stream, wire::codec());
        let mut joined = false;

        if framed.send(wire::join(&self.local_id)).await.is_err() {
            return SessionEnd::NeverJoined;
        }

        loop {
            tokio::select! {
                outbound = self.outbound.recv() => {
                    match outbound {
                        Some(Outbound { to, payload }) => {
                            if framed.send(wire::relay(&to, payload)).await.is_err() {
                                return ended(joined);
                            }
                        }
                        // All handles dropped: the peer is going away.
                        None => return SessionEnd::Shutdown,
                    }
                }
                frame = framed.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        _ => return ended(joined),
                    };
                    match wire::decode(&frame) {
                        Ok(Body::Status(status)) => {
                            joined = true;
                            if self
                                .events
                                .send(Event::Status { network_size: status.network_size })
                                .await
                                .is_err()
                            {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Ok(Body::Relay(relay)) => {
                            let from = match OverlayId::from_bytes(&relay.endpoint_id) {
                                Ok(from) => from,
                                Err(e) => {
                                    tracing::debug!("dropping frame with bad source id: {}", e);
                                    continue;
                                }
                            };
                            let event = Event::Message { from, payload: relay.payload };
                            if self.events.send(event).await.is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Err(e) => tracing::debug!("dropping malformed frame: {}", e),
                    }
                }
            }
        }
    }
}

enum SessionEnd {
    Joined,
    NeverJoined,
    Shutdown,
}

fn ended(joined: bool) -> SessionEnd {
    if joined {
        SessionEnd::Joined
    } else {
        SessionEnd::NeverJoined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Server;
    use std::time::Duration;

    async fn recv_event(events: &mut mpsc::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("client gone")
    }

    #[tokio::test]
    async fn two_clients_can_talk_through_the_server() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.run());

        let alice_id = OverlayId::random();
        let bob_id = OverlayId::random();

        let (alice, alice_handle, mut alice_events) = new(addr, alice_id);
        tokio::spawn(alice.run());
        assert_eq!(
            recv_event(&mut alice_events).await,
            Event::Status { network_size: 1 }
        );

        let (bob, _bob_handle, mut bob_events) = new(addr, bob_id);
        tokio::spawn(bob.run());
        assert_eq!(
            recv_event(&mut alice_events).await,
            Event::Status { network_size: 2 }
        );
        assert_eq!(
            recv_event(&mut bob_events).await,
            Event::Status { network_size: 2 }
        );

        alice_handle.send(bob_id, b"ping".to_vec()).await.unwrap();

        assert_eq!(
            recv_event(&mut bob_events).await,
            Event::Message {
                from: alice_id,
                payload: b"ping".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn client_rejoins_after_server_restart() {
        let server = Server::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = server.local_addr();
        let server_task = tokio::spawn(server.run());

        let (client, _handle, mut events) = new(addr, OverlayId::random());
        let client = client.with_initial_backoff(Duration::from_millis(50));
        tokio::spawn(client.run());

        assert_eq!(recv_event(&mut events).await, Event::Status { network_size: 1 });

        // Kill the server; the port is freed once the task is gone.
        server_task.abort();
        let _ = server_task.await;

        // The client keeps retrying until a new server appears on the
        // same address, then re-joins with the same id.
        let replacement = loop {
            match Server::bind(addr).await {
                Ok(server) => break server,
                Err(_) => sleep(Duration::from_millis(20)).await,
            }
        };
        tokio::spawn(replacement.run());

        assert_eq!(recv_event(&mut events).await, Event::Status { network_size: 1 });
    }
}
