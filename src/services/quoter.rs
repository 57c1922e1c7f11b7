//! Rate quoting with a short-TTL cache.
//!
//! Quotes are snapshots; the cache bounds request volume against the rail
//! but never serves pricing past its own expiry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::domain::{ConversionDirection, Quote};
use crate::error::{Result, TradelaneError};
use crate::rails::{retry_with_backoff, RateRail, RetryPolicy};

/// Tolerance when checking a rail's destination amount against the implied
/// rate/fee arithmetic.
const CONSISTENCY_TOLERANCE: &str = "0.01";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuoteKey {
    source: String,
    dest: String,
    amount: Decimal,
    direction: ConversionDirection,
}

#[derive(Clone)]
struct CachedQuote {
    quote: Quote,
    fetched_at: DateTime<Utc>,
}

pub struct RateQuoter {
    rail: Arc<dyn RateRail>,
    cache: DashMap<QuoteKey, CachedQuote>,
    cache_ttl: ChronoDuration,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl RateQuoter {
    pub fn new(
        rail: Arc<dyn RateRail>,
        cache_ttl_secs: u64,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            rail,
            cache: DashMap::new(),
            // TTL is capped at 60s regardless of configuration
            cache_ttl: ChronoDuration::seconds(cache_ttl_secs.min(60) as i64),
            retry,
            call_timeout,
        }
    }

    /// Fetch a quote for converting `amount` of `source` into `dest`.
    /// Rejects non-positive amounts synchronously; transient rail errors are
    /// retried with bounded backoff.
    pub async fn get_quote(
        &self,
        source: &str,
        dest: &str,
        amount: Decimal,
        direction: ConversionDirection,
    ) -> Result<Quote> {
        if amount <= Decimal::ZERO {
            return Err(TradelaneError::InvalidAmount(format!(
                "quote amount must be positive, got {amount}"
            )));
        }

        let key = QuoteKey {
            source: source.to_string(),
            dest: dest.to_string(),
            amount,
            direction,
        };

        if let Some(cached) = self.cache.get(&key) {
            let now = Utc::now();
            if now - cached.fetched_at < self.cache_ttl && !cached.quote.is_expired_at(now) {
                debug!("Serving cached quote for {}/{}", source, dest);
                return Ok(cached.quote.clone());
            }
        }

        let quote = self.fetch(source, dest, amount, direction).await?;
        self.cache.insert(
            key,
            CachedQuote {
                quote: quote.clone(),
                fetched_at: Utc::now(),
            },
        );

        Ok(quote)
    }

    async fn fetch(
        &self,
        source: &str,
        dest: &str,
        amount: Decimal,
        direction: ConversionDirection,
    ) -> Result<Quote> {
        let rail = self.rail.clone();
        let call_timeout = self.call_timeout;

        let response = retry_with_backoff(self.retry, "get_rate", || {
            let rail = rail.clone();
            let source = source.to_string();
            let dest = dest.to_string();
            async move {
                match timeout(call_timeout, rail.get_rate(amount, &source, &dest)).await {
                    Ok(result) => result,
                    Err(_) => Err(TradelaneError::ProviderUnavailable(format!(
                        "rate request for {}/{} timed out after {:?}",
                        source, dest, call_timeout
                    ))),
                }
            }
        })
        .await?;

        let quote = Quote {
            source_currency: source.to_string(),
            destination_currency: dest.to_string(),
            source_amount: amount,
            destination_amount: response.dest_amount,
            rate: response.rate,
            fee: response.fee,
            expires_at: response.expires_at,
            direction,
        };

        let tolerance = CONSISTENCY_TOLERANCE
            .parse::<Decimal>()
            .unwrap_or(Decimal::ZERO);
        quote.check_consistency(tolerance)?;

        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rails::traits::MockRateRail;
    use crate::rails::RateResponse;
    use rust_decimal_macros::dec;

    fn rate_response(expires_in_secs: i64) -> RateResponse {
        RateResponse {
            rate: dec!(1580),
            fee: dec!(15_000),
            dest_amount: dec!(623.42),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        }
    }

    fn quoter(rail: MockRateRail, ttl_secs: u64) -> RateQuoter {
        RateQuoter::new(
            Arc::new(rail),
            ttl_secs,
            RetryPolicy::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn rejects_non_positive_amounts() {
        let rail = MockRateRail::new();
        let quoter = quoter(rail, 60);

        for amount in [Decimal::ZERO, dec!(-5)] {
            let result = quoter
                .get_quote("NGN", "USDC", amount, ConversionDirection::LocalToAsset)
                .await;
            assert!(matches!(result, Err(TradelaneError::InvalidAmount(_))));
        }
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let mut rail = MockRateRail::new();
        rail.expect_get_rate()
            .times(1)
            .returning(|_, _, _| Ok(rate_response(30)));

        let quoter = quoter(rail, 60);

        let first = quoter
            .get_quote(
                "NGN",
                "USDC",
                dec!(1_000_000),
                ConversionDirection::LocalToAsset,
            )
            .await
            .unwrap();
        let second = quoter
            .get_quote(
                "NGN",
                "USDC",
                dec!(1_000_000),
                ConversionDirection::LocalToAsset,
            )
            .await
            .unwrap();

        assert_eq!(first.destination_amount, second.destination_amount);
        assert_eq!(first.expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn expired_cached_quote_refetched() {
        let mut rail = MockRateRail::new();
        // First response expires immediately; second is fresh
        let mut seq = mockall::Sequence::new();
        rail.expect_get_rate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(rate_response(-1)));
        rail.expect_get_rate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(rate_response(30)));

        let quoter = quoter(rail, 60);

        // First fetch returns the already-expired quote; a consumer would
        // reject it and re-quote.
        let stale = quoter
            .get_quote(
                "NGN",
                "USDC",
                dec!(1_000_000),
                ConversionDirection::LocalToAsset,
            )
            .await
            .unwrap();
        assert!(stale.is_expired());

        let fresh = quoter
            .get_quote(
                "NGN",
                "USDC",
                dec!(1_000_000),
                ConversionDirection::LocalToAsset,
            )
            .await
            .unwrap();
        assert!(!fresh.is_expired());
    }

    #[tokio::test]
    async fn inconsistent_rail_response_rejected() {
        let mut rail = MockRateRail::new();
        rail.expect_get_rate().returning(|_, _, _| {
            Ok(RateResponse {
                rate: dec!(1580),
                fee: dec!(15_000),
                dest_amount: dec!(700),
                expires_at: Utc::now() + ChronoDuration::seconds(30),
            })
        });

        let quoter = quoter(rail, 60);
        let result = quoter
            .get_quote(
                "NGN",
                "USDC",
                dec!(1_000_000),
                ConversionDirection::LocalToAsset,
            )
            .await;

        assert!(matches!(result, Err(TradelaneError::RateUnavailable(_))));
    }
}
