use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TradelaneError};

/// Which leg of the corridor a quote prices.
///
/// The rate is always quoted as local-currency units per settlement-asset
/// unit (e.g. NGN per USDC), so the conversion formula depends on direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionDirection {
    /// Local deposit converted into the settlement asset (onramp leg)
    LocalToAsset,
    /// Settlement asset disbursed in the counterparty's currency (payout leg)
    AssetToLocal,
}

/// A point-in-time price snapshot from an external rail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub source_currency: String,
    pub destination_currency: String,
    pub source_amount: Decimal,
    pub destination_amount: Decimal,
    /// Local-currency units per settlement-asset unit
    pub rate: Decimal,
    /// Fee charged in source-currency units
    pub fee: Decimal,
    pub expires_at: DateTime<Utc>,
    pub direction: ConversionDirection,
}

impl Quote {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Reject an expired quote. Any operation that consumes a quote must
    /// call this first; expired pricing is never executed against.
    pub fn ensure_fresh(&self) -> Result<()> {
        if self.is_expired() {
            return Err(TradelaneError::QuoteExpired {
                expires_at: self.expires_at,
            });
        }
        Ok(())
    }

    /// Destination amount implied by (source_amount, fee, rate)
    pub fn expected_destination(&self) -> Result<Decimal> {
        if self.rate <= Decimal::ZERO {
            return Err(TradelaneError::RateUnavailable(format!(
                "non-positive rate {} for {}/{}",
                self.rate, self.source_currency, self.destination_currency
            )));
        }

        let net = self.source_amount - self.fee;
        let expected = match self.direction {
            ConversionDirection::LocalToAsset => net / self.rate,
            ConversionDirection::AssetToLocal => net * self.rate,
        };
        Ok(expected)
    }

    /// Validate the quote's internal consistency: non-negative amounts and a
    /// destination amount that matches the rate/fee within `tolerance`.
    pub fn check_consistency(&self, tolerance: Decimal) -> Result<()> {
        if self.source_amount <= Decimal::ZERO {
            return Err(TradelaneError::InvalidAmount(format!(
                "quote source amount must be positive, got {}",
                self.source_amount
            )));
        }
        if self.fee < Decimal::ZERO || self.fee >= self.source_amount {
            return Err(TradelaneError::RateUnavailable(format!(
                "fee {} out of range for source amount {}",
                self.fee, self.source_amount
            )));
        }
        if self.destination_amount < Decimal::ZERO {
            return Err(TradelaneError::RateUnavailable(format!(
                "negative destination amount {}",
                self.destination_amount
            )));
        }

        let expected = self.expected_destination()?;
        let drift = (self.destination_amount - expected).abs();
        if drift > tolerance {
            return Err(TradelaneError::RateUnavailable(format!(
                "destination amount {} deviates from implied {} by {}",
                self.destination_amount, expected, drift
            )));
        }

        Ok(())
    }
}
