//! Owns one order and the set of its exchanges: admits broker matches,
//! folds exchange progress into the order and decides what has to happen
//! next (submission, funds release, nothing).
//!
//! All methods are synchronous; events raised by a mutation are buffered
//! and drained with [`Controller::take_events`] at the end of the
//! message handler driving this controller.

use crate::{
    broker::{OrderBookEntry, OrderMatch},
    exchange::{Cause, Params, Role},
    order::{ExchangeId, ExchangeSnapshot, ExchangeState, Order, OrderStatus, Side},
    relay::OverlayId,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Submitted { entry: OrderBookEntry },
    Progressed { old: f64, new: f64 },
    StatusChanged { old: OrderStatus, new: OrderStatus },
    Finished { status: OrderStatus },
}

#[derive(Debug)]
pub enum MatchDecision {
    Accepted(Params),
    Rejected { cause: String },
    AlreadyAccepted(ExchangeId),
}

/// What the driver has to do after an exchange reached a terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum AfterExchange {
    /// The order is done; release remaining funds and stop submitting.
    Completed,
    /// A deferred cancellation can now release funds.
    CancelledNowIdle,
    /// Residual amount remains; put the order back into the book.
    BackOnMarket { entry: OrderBookEntry },
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// No exchange is running; funds can be released right away.
    ReleaseFunds,
    /// A running exchange finishes its current step first; funds are
    /// released once it terminates.
    WaitForExchanges,
    AlreadyTerminal,
}

#[derive(Debug)]
pub struct Controller {
    order: Order,
    step_count: u32,
    running: HashMap<ExchangeId, OverlayId>,
    terminated: HashSet<ExchangeId>,
    blacklist: HashSet<OverlayId>,
    funds_available: bool,
    events: Vec<OrderEvent>,
    finished_emitted: bool,
}

impl Controller {
    pub fn new(order: Order, step_count: u32) -> Self {
        Self {
            order,
            step_count,
            running: HashMap::new(),
            terminated: HashSet::new(),
            blacklist: HashSet::new(),
            funds_available: false,
            events: Vec::new(),
            finished_emitted: false,
        }
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn take_events(&mut self) -> Vec<OrderEvent> {
        std::mem::take(&mut self.events)
    }

    /// Funds are reserved; if the order wants to be in the book, return
    /// the entry to keep submitting.
    pub fn funds_available(&mut self) -> Option<OrderBookEntry> {
        let before = self.snapshot();
        self.funds_available = true;

        let entry = if self.order.should_be_on_market() {
            self.order.set_status(OrderStatus::InMarket);
            let entry = self.book_entry();
            self.events.push(OrderEvent::Submitted {
                entry: entry.clone(),
            });
            Some(entry)
        } else {
            None
        };

        self.settle(before);
        entry
    }

    /// A reservation was revoked; the order leaves the book until funds
    /// come back.
    pub fn funds_unavailable(&mut self) {
        let before = self.snapshot();
        self.funds_available = false;

        if !self.order.status().is_terminal() {
            self.order.set_status(OrderStatus::Offline);
        }

        self.settle(before);
    }

    pub fn accept_order_match(&mut self, m: &OrderMatch) -> MatchDecision {
        if self.running.contains_key(&m.exchange_id) {
            return MatchDecision::AlreadyAccepted(m.exchange_id);
        }
        if self.terminated.contains(&m.exchange_id) {
            return self.reject("exchange already terminated");
        }
        if m.order_id != self.order.id() {
            return self.reject("match addresses a different order");
        }
        if m.fiat_amount.currency() != self.order.price().currency() {
            return self.reject("currency mismatch");
        }
        if self.order.status().is_terminal() || !self.funds_available {
            return self.reject("order is not in the market");
        }
        if m.bitcoin_amount > self.order.amounts().pending {
            return self.reject("match exceeds pending amount");
        }
        if self.running.values().any(|peer| *peer == m.counterpart) {
            return self.reject("already exchanging with this counterpart");
        }
        if self.blacklist.contains(&m.counterpart) {
            return self.reject("counterpart is blacklisted for this session");
        }

        let before = self.snapshot();

        let role = match self.order.side() {
            Side::Bid => Role::Buyer,
            Side::Ask => Role::Seller,
        };
        let params = Params {
            exchange_id: m.exchange_id,
            order_id: m.order_id,
            role,
            step_count: self.step_count,
            bitcoin_amount: m.bitcoin_amount,
            fiat_amount: m.fiat_amount,
            counterpart: m.counterpart,
        };

        self.running.insert(m.exchange_id, m.counterpart);
        self.order.upsert_exchange(ExchangeSnapshot {
            id: m.exchange_id,
            amount: m.bitcoin_amount,
            steps_completed: 0,
            step_count: self.step_count,
            state: ExchangeState::Running,
        });
        if !self.order.status().is_terminal() {
            self.order.set_status(OrderStatus::InProgress);
        }

        self.settle(before);
        MatchDecision::Accepted(params)
    }

    /// Overwrite the snapshot of a running exchange and re-derive the
    /// order's amounts, progress and status.
    pub fn exchange_progress(&mut self, snapshot: ExchangeSnapshot) {
        if !self.running.contains_key(&snapshot.id) {
            tracing::debug!(
                "ignoring progress for unknown exchange {}",
                snapshot.id
            );
            return;
        }

        let before = self.snapshot();
        self.order.upsert_exchange(snapshot);
        self.settle(before);
    }

    pub fn exchange_succeeded(&mut self, id: ExchangeId) -> AfterExchange {
        self.conclude(id, None)
    }

    pub fn exchange_failed(&mut self, id: ExchangeId, cause: &Cause) -> AfterExchange {
        self.conclude(id, Some(cause))
    }

    pub fn cancel(&mut self, reason: &str) -> CancelOutcome {
        if self.order.status().is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }

        let before = self.snapshot();
        self.order.set_status(OrderStatus::Cancelled {
            reason: reason.to_string(),
        });
        self.settle(before);

        if self.running.is_empty() {
            CancelOutcome::ReleaseFunds
        } else {
            CancelOutcome::WaitForExchanges
        }
    }

    fn conclude(&mut self, id: ExchangeId, failure: Option<&Cause>) -> AfterExchange {
        let counterpart = match self.running.remove(&id) {
            Some(counterpart) => counterpart,
            None => {
                tracing::debug!("ignoring conclusion of unknown exchange {}", id);
                return AfterExchange::Idle;
            }
        };
        self.terminated.insert(id);

        let before = self.snapshot();

        if let Some(snapshot) = self.order.exchange(&id).copied() {
            let state = match failure {
                None => ExchangeState::Succeeded,
                Some(_) => ExchangeState::Failed,
            };
            let steps_completed = match failure {
                None => snapshot.step_count,
                Some(_) => snapshot.steps_completed,
            };
            self.order.upsert_exchange(ExchangeSnapshot {
                state,
                steps_completed,
                ..snapshot
            });
        }

        if let Some(Cause::ProtocolViolation(violation)) = failure {
            tracing::warn!(
                "blacklisting {} for this session: {}",
                counterpart,
                violation
            );
            self.blacklist.insert(counterpart);
        }

        let outcome = match self.order.status() {
            OrderStatus::Cancelled { .. } if self.running.is_empty() => {
                AfterExchange::CancelledNowIdle
            }
            OrderStatus::Cancelled { .. } => AfterExchange::Idle,
            OrderStatus::Completed => AfterExchange::Completed,
            _ if self.order.should_be_on_market() && self.funds_available => {
                self.order.set_status(OrderStatus::InMarket);
                let entry = self.book_entry();
                self.events.push(OrderEvent::Submitted {
                    entry: entry.clone(),
                });
                AfterExchange::BackOnMarket { entry }
            }
            _ => AfterExchange::Idle,
        };

        self.settle(before);
        outcome
    }

    fn reject(&self, cause: &str) -> MatchDecision {
        MatchDecision::Rejected {
            cause: cause.to_string(),
        }
    }

    fn book_entry(&self) -> OrderBookEntry {
        OrderBookEntry {
            order_id: self.order.id(),
            side: self.order.side(),
            amount: self.order.amounts().pending,
            price: self.order.price(),
        }
    }

    fn snapshot(&self) -> (f64, OrderStatus) {
        (self.order.progress(), self.order.status().clone())
    }

    fn settle(&mut self, before: (f64, OrderStatus)) {
        let (old_progress, old_status) = before;

        let new_progress = self.order.progress();
        #[allow(clippy::float_cmp)]
        {
            if new_progress != old_progress {
                self.events.push(OrderEvent::Progressed {
                    old: old_progress,
                    new: new_progress,
                });
            }
        }

        let new_status = self.order.status().clone();
        if new_status != old_status {
            self.events.push(OrderEvent::StatusChanged {
                old: old_status,
                new: new_status.clone(),
            });

            if new_status.is_terminal() && !self.finished_emitted {
                self.finished_emitted = true;
                self.events.push(OrderEvent::Finished { status: new_status });
            }
        }
    }
}
