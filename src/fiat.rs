use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    fmt,
    str::FromStr,
};

/// The set of fiat currencies a payment processor account can hold.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
}

impl Currency {
    /// Number of decimal places of the currency's minor unit.
    pub fn scale(self) -> u32 {
        match self {
            Currency::Eur | Currency::Usd | Currency::Gbp => 2,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "GBP" => Ok(Currency::Gbp),
            _ => Err(UnknownCurrency(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown currency code: {0}")]
pub struct UnknownCurrency(String);

/// An exact, non-negative amount of a single fiat currency.
///
/// The inner decimal never carries more fractional digits than the
/// currency's minor unit allows, so equality and arithmetic are exact.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Amount {
    currency: Currency,
    value: Decimal,
}

impl Amount {
    pub fn new(currency: Currency, value: Decimal) -> Result<Self, Error> {
        if value.is_sign_negative() {
            return Err(Error::Negative(value));
        }

        let normalized = value.normalize();
        if normalized.scale() > currency.scale() {
            return Err(Error::ExceedsScale { value, currency });
        }

        Ok(Self {
            currency,
            value: normalized,
        })
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            currency,
            value: Decimal::ZERO,
        }
    }

    /// Construct from an integer count of the currency's minor unit
    /// (cents for EUR).
    pub fn from_minor_units(currency: Currency, minor_units: u64) -> Self {
        Self {
            currency,
            value: Decimal::new(
                i64::try_from(minor_units).unwrap_or(i64::MAX),
                currency.scale(),
            )
            .normalize(),
        }
    }

    pub fn as_minor_units(&self) -> u64 {
        let mut scaled = self.value;
        scaled.rescale(self.currency.scale());
        u64::try_from(scaled.mantissa()).unwrap_or(0)
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, Error> {
        self.same_currency(rhs)?;
        Ok(Self {
            currency: self.currency,
            value: self
                .value
                .checked_add(rhs.value)
                .ok_or(Error::Overflow)?,
        })
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self, Error> {
        self.same_currency(rhs)?;
        let value = self.value.checked_sub(rhs.value).ok_or(Error::Overflow)?;
        if value.is_sign_negative() {
            return Err(Error::Negative(value));
        }
        Ok(Self {
            currency: self.currency,
            value,
        })
    }

    /// Split into `n` parts of whole minor units which sum exactly to
    /// `self`; the first part absorbs the remainder.
    pub fn split(self, n: u32) -> Vec<Amount> {
        assert!(n >= 1, "cannot split into zero parts");

        let total = self.as_minor_units();
        let n64 = u64::from(n);
        let per_part = total / n64;
        let remainder = total % n64;

        let mut parts = vec![Amount::from_minor_units(self.currency, per_part); n as usize];
        parts[0] = Amount::from_minor_units(self.currency, per_part + remainder);
        parts
    }

    fn same_currency(&self, other: Self) -> Result<(), Error> {
        if self.currency != other.currency {
            return Err(Error::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut scaled = self.value;
        scaled.rescale(self.currency.scale());
        write!(f, "{} {}", scaled, self.currency)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("amounts of {left} and {right} cannot be combined")]
    CurrencyMismatch { left: Currency, right: Currency },
    #[error("{value} has more precision than a {currency} amount can carry")]
    ExceedsScale { value: Decimal, currency: Currency },
    #[error("fiat amounts cannot be negative, got {0}")]
    Negative(Decimal),
    #[error("fiat amount arithmetic overflowed")]
    Overflow,
}
