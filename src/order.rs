use crate::{bitcoin, rate::Price};
use std::{collections::HashMap, fmt};
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn random() -> Self {
        OrderId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        OrderId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn random() -> Self {
        ExchangeId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        ExchangeId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Buy bitcoin for fiat (`Bid`) or sell bitcoin for fiat (`Ask`).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString,
)]
pub enum Side {
    #[strum(to_string = "bid", serialize = "buy")]
    Bid,
    #[strum(to_string = "ask", serialize = "sell")]
    Ask,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    NotStarted,
    InMarket,
    Offline,
    InProgress,
    Completed,
    Cancelled { reason: String },
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled { .. })
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::NotStarted => write!(f, "not started"),
            OrderStatus::InMarket => write!(f, "in market"),
            OrderStatus::Offline => write!(f, "offline"),
            OrderStatus::InProgress => write!(f, "in progress"),
            OrderStatus::Completed => write!(f, "completed"),
            OrderStatus::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Running,
    Succeeded,
    Failed,
}

/// The order-facing view of one exchange, overwritten wholesale on every
/// progress report.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExchangeSnapshot {
    pub id: ExchangeId,
    pub amount: bitcoin::Amount,
    pub steps_completed: u32,
    pub step_count: u32,
    pub state: ExchangeState,
}

impl ExchangeSnapshot {
    /// Fraction of this exchange's amount that has been released on-chain.
    fn partial(&self) -> u128 {
        u128::from(self.amount.as_sat()) * u128::from(self.steps_completed)
            / u128::from(self.step_count)
    }
}

/// Breakdown of an order's total into settled, in-flight and remaining
/// bitcoin. Always sums to the order total.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Amounts {
    pub exchanged: bitcoin::Amount,
    pub exchanging: bitcoin::Amount,
    pub pending: bitcoin::Amount,
}

#[derive(Debug, Clone)]
pub struct Order {
    id: OrderId,
    side: Side,
    total: bitcoin::Amount,
    price: Price,
    exchanges: HashMap<ExchangeId, ExchangeSnapshot>,
    status: OrderStatus,
}

impl Order {
    pub fn new(id: OrderId, side: Side, total: bitcoin::Amount, price: Price) -> Self {
        Self {
            id,
            side,
            total,
            price,
            exchanges: HashMap::new(),
            status: OrderStatus::NotStarted,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn total(&self) -> bitcoin::Amount {
        self.total
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn status(&self) -> &OrderStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: OrderStatus) -> OrderStatus {
        std::mem::replace(&mut self.status, status)
    }

    pub fn exchange(&self, id: &ExchangeId) -> Option<&ExchangeSnapshot> {
        self.exchanges.get(id)
    }

    pub fn has_running_exchange(&self) -> bool {
        self.exchanges
            .values()
            .any(|exchange| exchange.state == ExchangeState::Running)
    }

    /// Record the latest snapshot of an exchange, replacing any previous
    /// snapshot under the same id. Monotonicity of `steps_completed` is
    /// the caller's obligation.
    pub fn upsert_exchange(&mut self, snapshot: ExchangeSnapshot) {
        self.exchanges.insert(snapshot.id, snapshot);
        self.refresh_status();
    }

    pub fn amounts(&self) -> Amounts {
        let exchanged = self.sum_amounts(ExchangeState::Succeeded);
        let exchanging = self.sum_amounts(ExchangeState::Running);

        let pending = self
            .total
            .checked_sub(exchanged)
            .and_then(|rest| rest.checked_sub(exchanging))
            .unwrap_or_else(|| {
                tracing::error!(
                    order_id = %self.id,
                    "exchanges exceed order total, reporting zero pending"
                );
                bitcoin::Amount::ZERO
            });

        Amounts {
            exchanged,
            exchanging,
            pending,
        }
    }

    /// Overall completion in `[0, 1]`: settled amounts count fully,
    /// running exchanges at `steps_completed / step_count` of their size.
    pub fn progress(&self) -> f64 {
        let settled: u128 = self
            .exchanges
            .values()
            .map(|exchange| match exchange.state {
                ExchangeState::Succeeded => u128::from(exchange.amount.as_sat()),
                ExchangeState::Running => exchange.partial(),
                ExchangeState::Failed => 0,
            })
            .sum();

        #[allow(clippy::cast_precision_loss)]
        let progress = settled as f64 / self.total.as_sat() as f64;
        progress.min(1.0)
    }

    /// The order wants to be visible to the broker: there is residual
    /// pending amount, no exchange is running and it is not terminal.
    pub fn should_be_on_market(&self) -> bool {
        self.amounts().pending > bitcoin::Amount::ZERO
            && !self.has_running_exchange()
            && !self.status.is_terminal()
    }

    fn sum_amounts(&self, state: ExchangeState) -> bitcoin::Amount {
        self.exchanges
            .values()
            .filter(|exchange| exchange.state == state)
            .map(|exchange| exchange.amount)
            .sum()
    }

    fn refresh_status(&mut self) {
        let amounts = self.amounts();

        let done = !self.exchanges.is_empty()
            && amounts.pending == bitcoin::Amount::ZERO
            && amounts.exchanging == bitcoin::Amount::ZERO;

        if done && !self.status.is_terminal() {
            self.status = OrderStatus::Completed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiat::{self, Currency};
    use rust_decimal_macros::dec;

    fn btc(btc: f64) -> bitcoin::Amount {
        bitcoin::Amount::from_btc(btc).unwrap()
    }

    fn eur_price(value: rust_decimal::Decimal) -> Price {
        Price::new(fiat::Amount::new(Currency::Eur, value).unwrap()).unwrap()
    }

    fn running(id: ExchangeId, amount: bitcoin::Amount, steps: u32, of: u32) -> ExchangeSnapshot {
        ExchangeSnapshot {
            id,
            amount,
            steps_completed: steps,
            step_count: of,
            state: ExchangeState::Running,
        }
    }

    fn succeeded(id: ExchangeId, amount: bitcoin::Amount, of: u32) -> ExchangeSnapshot {
        ExchangeSnapshot {
            id,
            amount,
            steps_completed: of,
            step_count: of,
            state: ExchangeState::Succeeded,
        }
    }

    #[test]
    fn fresh_order_has_all_amount_pending() {
        let order = Order::new(OrderId::random(), Side::Bid, btc(10.0), eur_price(dec!(10)));

        assert_eq!(order.progress(), 0.0);
        assert_eq!(
            order.amounts(),
            Amounts {
                exchanged: bitcoin::Amount::ZERO,
                exchanging: bitcoin::Amount::ZERO,
                pending: btc(10.0),
            }
        );
        assert_eq!(order.status(), &OrderStatus::NotStarted);
        assert!(order.should_be_on_market());
    }

    #[test]
    fn half_completed_exchange_yields_half_progress() {
        let mut order = Order::new(OrderId::random(), Side::Bid, btc(10.0), eur_price(dec!(10)));

        order.upsert_exchange(running(ExchangeId::random(), btc(10.0), 5, 10));

        assert_eq!(order.progress(), 0.5);
        assert_eq!(
            order.amounts(),
            Amounts {
                exchanged: bitcoin::Amount::ZERO,
                exchanging: btc(10.0),
                pending: bitcoin::Amount::ZERO,
            }
        );
        assert!(!order.should_be_on_market());
    }

    #[test]
    fn re_adding_an_exchange_overwrites_the_snapshot() {
        let mut order = Order::new(OrderId::random(), Side::Bid, btc(10.0), eur_price(dec!(10)));
        let exchange_id = ExchangeId::random();

        order.upsert_exchange(running(exchange_id, btc(10.0), 5, 10));
        order.upsert_exchange(running(exchange_id, btc(10.0), 6, 10));

        assert_eq!(order.progress(), 0.6);
        assert_eq!(order.exchanges.len(), 1);
    }

    #[test]
    fn mixed_settled_and_running_exchanges() {
        let mut order = Order::new(OrderId::random(), Side::Bid, btc(20.0), eur_price(dec!(10)));

        order.upsert_exchange(succeeded(ExchangeId::random(), btc(10.0), 10));
        order.upsert_exchange(running(ExchangeId::random(), btc(10.0), 5, 10));

        assert_eq!(order.progress(), 0.75);
        assert_eq!(
            order.amounts(),
            Amounts {
                exchanged: btc(10.0),
                exchanging: btc(10.0),
                pending: bitcoin::Amount::ZERO,
            }
        );
    }

    #[test]
    fn order_completes_when_all_exchanges_succeed() {
        let mut order = Order::new(OrderId::random(), Side::Bid, btc(20.0), eur_price(dec!(1)));

        order.upsert_exchange(succeeded(ExchangeId::random(), btc(10.0), 10));
        order.upsert_exchange(succeeded(ExchangeId::random(), btc(10.0), 10));

        assert_eq!(order.status(), &OrderStatus::Completed);
        assert_eq!(order.progress(), 1.0);
        assert!(!order.should_be_on_market());
    }

    #[test]
    fn failed_exchange_returns_amount_to_pending() {
        let mut order = Order::new(OrderId::random(), Side::Bid, btc(10.0), eur_price(dec!(10)));
        let exchange_id = ExchangeId::random();

        order.upsert_exchange(running(exchange_id, btc(10.0), 5, 10));
        assert_eq!(order.progress(), 0.5);

        order.upsert_exchange(ExchangeSnapshot {
            state: ExchangeState::Failed,
            ..running(exchange_id, btc(10.0), 5, 10)
        });

        assert_eq!(order.progress(), 0.0);
        assert_eq!(order.amounts().pending, btc(10.0));
        assert!(order.should_be_on_market());
    }

    #[test]
    fn cancelled_order_never_flips_to_completed() {
        let mut order = Order::new(OrderId::random(), Side::Bid, btc(10.0), eur_price(dec!(10)));
        order.set_status(OrderStatus::Cancelled {
            reason: "user".to_string(),
        });

        order.upsert_exchange(succeeded(ExchangeId::random(), btc(10.0), 10));

        assert!(matches!(order.status(), OrderStatus::Cancelled { .. }));
        assert!(!order.should_be_on_market());
    }
}
