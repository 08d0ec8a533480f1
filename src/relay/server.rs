use crate::relay::{
    wire::{self, envelope::Body},
    OverlayId,
};
use futures::{SinkExt, StreamExt};
use std::{collections::HashMap, net::SocketAddr};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::codec::Framed;

const REGISTRY_BUFFER: usize = 64;
const WORKER_BUFFER: usize = 16;

/// The broker-side half of the overlay: accepts connections, keeps the
/// `id → worker` mapping and forwards relay frames between workers.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot bind relay server to {addr}")]
pub struct BindError {
    pub addr: SocketAddr,
    #[source]
    source: std::io::Error,
}

impl Server {
    pub async fn bind(addr: SocketAddr) -> Result<Server, BindError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BindError { addr, source })?;
        let local_addr = listener.local_addr().map_err(|source| BindError { addr, source })?;

        tracing::info!("relay server listening on {}", local_addr);

        Ok(Server {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) {
        let (registry_tx, mut registry_rx) = mpsc::channel(REGISTRY_BUFFER);
        let mut registry = Registry::default();
        let mut next_serial: u64 = 0;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            next_serial += 1;
                            tracing::debug!("connection from {}", peer);
                            tokio::spawn(worker(stream, next_serial, registry_tx.clone()));
                        }
                        Err(e) => tracing::warn!("failed to accept connection: {}", e),
                    }
                }
                Some(command) = registry_rx.recv() => {
                    registry.handle(command);
                }
            }
        }
    }
}

#[derive(Debug)]
enum Command {
    Join {
        id: OverlayId,
        serial: u64,
        worker: mpsc::Sender<Delivery>,
    },
    Relay {
        from: OverlayId,
        serial: u64,
        to: OverlayId,
        payload: Vec<u8>,
    },
    Leave {
        id: OverlayId,
        serial: u64,
    },
}

#[derive(Debug)]
enum Delivery {
    Status { network_size: u32 },
    Relay { from: OverlayId, payload: Vec<u8> },
    Terminate,
}

#[derive(Debug, Default)]
struct Registry {
    members: HashMap<OverlayId, Member>,
}

#[derive(Debug)]
struct Member {
    serial: u64,
    worker: mpsc::Sender<Delivery>,
}

impl Registry {
    fn handle(&mut self, command: Command) {
        match command {
            Command::Join { id, serial, worker } => {
                // Last writer wins: a previous worker under the same id is
                // told to terminate.
                if let Some(previous) = self.members.insert(id, Member { serial, worker }) {
                    tracing::info!("{} re-joined, terminating previous worker", id);
                    let _ = previous.worker.try_send(Delivery::Terminate);
                } else {
                    tracing::info!("{} joined", id);
                }
                self.broadcast_status();
            }
            Command::Relay {
                from,
                serial,
                to,
                payload,
            } => {
                // A displaced worker may still race frames in; only the
                // current owner of the id may send under it.
                let owns_id = self
                    .members
                    .get(&from)
                    .map_or(false, |member| member.serial == serial);
                if !owns_id {
                    tracing::debug!("dropping relay from displaced worker for {}", from);
                    return;
                }

                match self.members.get(&to) {
                    Some(member) => self.deliver(member, Delivery::Relay { from, payload }),
                    None => tracing::debug!("dropping relay to unknown endpoint {}", to),
                }
            }
            Command::Leave { id, serial } => {
                let still_mapped = self
                    .members
                    .get(&id)
                    .map_or(false, |member| member.serial == serial);
                if still_mapped {
                    self.members.remove(&id);
                    tracing::info!("{} left", id);
                    self.broadcast_status();
                }
            }
        }
    }

    fn broadcast_status(&self) {
        #[allow(clippy::cast_possible_truncation)]
        let network_size = self.members.len() as u32;
        for member in self.members.values() {
            self.deliver(member, Delivery::Status { network_size });
        }
    }

    // Best effort: a worker with a full mailbox loses the frame, the same
    // way a full socket buffer would.
    fn deliver(&self, member: &Member, delivery: Delivery) {
        if member.worker.try_send(delivery).is_err() {
            tracing::debug!("worker mailbox full, dropping delivery");
        }
    }
}

async fn worker(stream: TcpStream, serial: u64, registry: mpsc::Sender<Command>) {
    let mut framed = Framed::new(stream, wire::codec());

    // The first frame must be a relay to the broker carrying a join.
    let id = match framed.next().await {
        Some(Ok(frame)) => match wire::decode(&frame) {
            Ok(Body::Relay(relay)) => match wire::decode_join(&relay.payload) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!("worker received malformed join: {}", e);
                    return;
                }
            },
            Ok(Body::Status(_)) | Err(_) => {
                tracing::warn!("worker received invalid first frame, closing");
                return;
            }
        },
        _ => return,
    };

    let (worker_tx, mut worker_rx) = mpsc::channel(WORKER_BUFFER);
    if registry
        .send(Command::Join {
            id,
            serial,
            worker: worker_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(frame)) => match wire::decode(&frame) {
                        Ok(Body::Relay(relay)) => {
                            let to = match OverlayId::from_bytes(&relay.endpoint_id) {
                                Ok(to) => to,
                                Err(e) => {
                                    tracing::debug!("dropping frame with bad endpoint id: {}", e);
                                    continue;
                                }
                            };
                            let command = Command::Relay {
                                from: id,
                                serial,
                                to,
                                payload: relay.payload,
                            };
                            if registry.send(command).await.is_err() {
                                break;
                            }
                        }
                        Ok(Body::Status(_)) => {
                            tracing::debug!("client sent a status frame, dropping");
                        }
                        Err(e) => tracing::debug!("dropping malformed frame: {}", e),
                    },
                    Some(Err(e)) => {
                        tracing::debug!("worker socket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            delivery = worker_rx.recv() => {
                match delivery {
                    Some(Delivery::Status { network_size }) => {
                        if framed.send(wire::status(network_size)).await.is_err() {
                            break;
                        }
                    }
                    Some(Delivery::Relay { from, payload }) => {
                        if framed.send(wire::relay(&from, payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Delivery::Terminate) | None => break,
                }
            }
        }
    }

    let _ = registry.send(Command::Leave { id, serial }).await;
}
