use crate::{bitcoin, fiat};
use rust_decimal::{Decimal, RoundingStrategy};

/// A price expressed as fiat per whole bitcoin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Price(fiat::Amount);

impl Price {
    pub fn new(per_btc: fiat::Amount) -> Result<Self, ZeroPrice> {
        if per_btc.is_zero() {
            return Err(ZeroPrice);
        }
        Ok(Price(per_btc))
    }

    pub fn currency(&self) -> fiat::Currency {
        self.0.currency()
    }

    pub fn per_btc(&self) -> fiat::Amount {
        self.0
    }

    /// Fiat value of `amount` at this price.
    ///
    /// The exact product usually carries more precision than the
    /// currency's minor unit; the value is truncated towards zero and the
    /// discarded fraction is reported alongside so no rounding ever
    /// happens silently.
    pub fn value_of(&self, amount: bitcoin::Amount) -> anyhow::Result<Converted> {
        let sats = Decimal::from(amount.as_sat());
        let btc = sats
            .checked_div(Decimal::from(10u64.pow(bitcoin::SATS_IN_BITCOIN_EXP)))
            .expect("divisor is a non-zero constant");

        let exact = self
            .0
            .value()
            .checked_mul(btc)
            .ok_or_else(|| anyhow::anyhow!("fiat value of {} overflows", amount))?;

        let scale = self.currency().scale();
        let truncated =
            exact.round_dp_with_strategy(scale, RoundingStrategy::ToZero);

        Ok(Converted {
            amount: fiat::Amount::new(self.currency(), truncated)?,
            lost: exact - truncated,
        })
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/BTC", self.0)
    }
}

/// Result of a bitcoin→fiat conversion with the rounding made explicit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Converted {
    pub amount: fiat::Amount,
    /// Fraction of a minor unit discarded by truncation.
    pub lost: Decimal,
}

impl Converted {
    pub fn is_exact(&self) -> bool {
        self.lost.is_zero()
    }
}

#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("a price of zero admits no conversion")]
pub struct ZeroPrice;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiat::Currency;
    use rust_decimal_macros::dec;

    fn eur_per_btc(value: Decimal) -> Price {
        Price::new(fiat::Amount::new(Currency::Eur, value).unwrap()).unwrap()
    }

    #[test]
    fn whole_bitcoin_at_round_price_converts_exactly() {
        let price = eur_per_btc(dec!(900));

        let converted = price.value_of(bitcoin::Amount::from_btc(2.0).unwrap()).unwrap();

        assert_eq!(
            converted.amount,
            fiat::Amount::new(Currency::Eur, dec!(1800)).unwrap()
        );
        assert!(converted.is_exact());
    }

    #[test]
    fn sub_cent_value_is_truncated_and_reported() {
        let price = eur_per_btc(dec!(900));

        // 1 satoshi at 900 EUR/BTC is 0.000009 EUR.
        let converted = price.value_of(bitcoin::Amount::from_sat(1)).unwrap();

        assert_eq!(converted.amount, fiat::Amount::zero(Currency::Eur));
        assert!(!converted.is_exact());
        assert_eq!(converted.lost, dec!(0.000009));
    }

    #[test]
    fn zero_price_is_rejected() {
        let res = Price::new(fiat::Amount::zero(Currency::Eur));

        assert!(res.is_err());
    }
}
