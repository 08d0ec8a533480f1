//! Messages exchanged with the broker over the relay, addressed to
//! [`crate::relay::OverlayId::BROKER`].

use crate::{
    bitcoin, fiat,
    order::{ExchangeId, OrderId, Side},
    rate::Price,
    relay::OverlayId,
};
use prost::Message as _;
use uuid::Uuid;

/// Canonical representation of an order in the broker's book.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookEntry {
    pub order_id: OrderId,
    pub side: Side,
    pub amount: bitcoin::Amount,
    pub price: Price,
}

/// The broker paired our order with a counterparty.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderMatch {
    pub order_id: OrderId,
    pub exchange_id: ExchangeId,
    pub counterpart: OverlayId,
    pub bitcoin_amount: bitcoin::Amount,
    pub fiat_amount: fiat::Amount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRejection {
    pub exchange_id: ExchangeId,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerMessage {
    Entry(OrderBookEntry),
    Match(OrderMatch),
    Rejection(ExchangeRejection),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BrokerFrame {
    #[prost(oneof = "broker_frame::Body", tags = "1, 2, 3")]
    pub body: Option<broker_frame::Body>,
}

pub mod broker_frame {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        Entry(super::EntryMessage),
        #[prost(message, tag = "2")]
        Match(super::MatchMessage),
        #[prost(message, tag = "3")]
        Rejection(super::RejectionMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EntryMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub order_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub side: String,
    #[prost(uint64, tag = "3")]
    pub amount_satoshi: u64,
    #[prost(uint64, tag = "4")]
    pub price_minor_units: u64,
    #[prost(string, tag = "5")]
    pub currency: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MatchMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub order_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub exchange_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub counterpart: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub amount_satoshi: u64,
    #[prost(uint64, tag = "5")]
    pub fiat_minor_units: u64,
    #[prost(string, tag = "6")]
    pub currency: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RejectionMessage {
    #[prost(bytes = "vec", tag = "1")]
    pub exchange_id: Vec<u8>,
    #[prost(string, tag = "2")]
    pub cause: String,
}

pub fn encode(message: &BrokerMessage) -> Vec<u8> {
    let body = match message {
        BrokerMessage::Entry(entry) => broker_frame::Body::Entry(EntryMessage {
            order_id: uuid_bytes(entry.order_id.as_uuid()),
            side: side_code(entry.side).to_string(),
            amount_satoshi: entry.amount.as_sat(),
            price_minor_units: entry.price.per_btc().as_minor_units(),
            currency: entry.price.currency().code().to_string(),
        }),
        BrokerMessage::Match(m) => broker_frame::Body::Match(MatchMessage {
            order_id: uuid_bytes(m.order_id.as_uuid()),
            exchange_id: uuid_bytes(m.exchange_id.as_uuid()),
            counterpart: m.counterpart.as_bytes().to_vec(),
            amount_satoshi: m.bitcoin_amount.as_sat(),
            fiat_minor_units: m.fiat_amount.as_minor_units(),
            currency: m.fiat_amount.currency().code().to_string(),
        }),
        BrokerMessage::Rejection(rejection) => broker_frame::Body::Rejection(RejectionMessage {
            exchange_id: uuid_bytes(rejection.exchange_id.as_uuid()),
            cause: rejection.cause.clone(),
        }),
    };

    BrokerFrame { body: Some(body) }.encode_to_vec()
}

pub fn decode(payload: &[u8]) -> Result<BrokerMessage, WireError> {
    let frame = BrokerFrame::decode(payload)?;

    let message = match frame.body.ok_or(WireError::EmptyBody)? {
        broker_frame::Body::Entry(entry) => BrokerMessage::Entry(OrderBookEntry {
            order_id: OrderId::from_uuid(decode_uuid(&entry.order_id)?),
            side: decode_side(&entry.side)?,
            amount: bitcoin::Amount::from_sat(entry.amount_satoshi),
            price: Price::new(fiat::Amount::from_minor_units(
                decode_currency(&entry.currency)?,
                entry.price_minor_units,
            ))
            .map_err(|_| WireError::ZeroPrice)?,
        }),
        broker_frame::Body::Match(m) => BrokerMessage::Match(OrderMatch {
            order_id: OrderId::from_uuid(decode_uuid(&m.order_id)?),
            exchange_id: ExchangeId::from_uuid(decode_uuid(&m.exchange_id)?),
            counterpart: OverlayId::from_bytes(&m.counterpart)
                .map_err(|_| WireError::MalformedCounterpart)?,
            bitcoin_amount: bitcoin::Amount::from_sat(m.amount_satoshi),
            fiat_amount: fiat::Amount::from_minor_units(
                decode_currency(&m.currency)?,
                m.fiat_minor_units,
            ),
        }),
        broker_frame::Body::Rejection(rejection) => BrokerMessage::Rejection(ExchangeRejection {
            exchange_id: ExchangeId::from_uuid(decode_uuid(&rejection.exchange_id)?),
            cause: rejection.cause,
        }),
    };

    Ok(message)
}

pub fn entry_payload(entry: &OrderBookEntry) -> Vec<u8> {
    encode(&BrokerMessage::Entry(entry.clone()))
}

pub fn rejection_payload(exchange_id: ExchangeId, cause: String) -> Vec<u8> {
    encode(&BrokerMessage::Rejection(ExchangeRejection {
        exchange_id,
        cause,
    }))
}

fn side_code(side: Side) -> &'static str {
    match side {
        Side::Bid => "bid",
        Side::Ask => "ask",
    }
}

fn decode_side(code: &str) -> Result<Side, WireError> {
    match code {
        "bid" => Ok(Side::Bid),
        "ask" => Ok(Side::Ask),
        _ => Err(WireError::UnknownSide),
    }
}

fn decode_currency(code: &str) -> Result<fiat::Currency, WireError> {
    code.parse().map_err(|_| WireError::UnknownCurrency)
}

fn uuid_bytes(uuid: &Uuid) -> Vec<u8> {
    uuid.as_bytes().to_vec()
}

fn decode_uuid(bytes: &[u8]) -> Result<Uuid, WireError> {
    Uuid::from_slice(bytes).map_err(|_| WireError::MalformedId)
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed broker frame")]
    Decode(#[from] prost::DecodeError),
    #[error("broker frame has no body")]
    EmptyBody,
    #[error("id is not a uuid")]
    MalformedId,
    #[error("counterpart id has the wrong length")]
    MalformedCounterpart,
    #[error("unknown side")]
    UnknownSide,
    #[error("unknown currency")]
    UnknownCurrency,
    #[error("order book entry with zero price")]
    ZeroPrice,
}
