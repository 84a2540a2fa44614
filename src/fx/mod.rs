//! USD/ILS exchange-rate lookup.
//!
//! [`FxLookup`] layers an in-process cache and the persisted `fx_rates`
//! table in front of an [`FxRateSource`], walking back over prior dates when
//! the requested day has no published rate (weekends, holidays).

pub mod boi;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::db::{FxRateRecord, FxRateStore};
use crate::error::FxError;

pub use boi::BoiClient;

/// Rate scale kept for USD/ILS quotes.
pub const RATE_SCALE: u32 = 6;

pub fn quantize_rate(rate: Decimal) -> Decimal {
    rate.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A provider of published daily rates.
#[async_trait]
pub trait FxRateSource: Send + Sync {
    /// Short tag persisted alongside cached rates (e.g. `"BOI"`).
    fn name(&self) -> &'static str;

    /// The rate published for exactly `date`, with the date it was quoted
    /// for. `Ok(None)` means the source has no quote for that day.
    async fn rate_on(&self, date: NaiveDate) -> Result<Option<(Decimal, NaiveDate)>, FxError>;
}

/// Two-tier cached lookup over an [`FxRateSource`].
pub struct FxLookup {
    source: Arc<dyn FxRateSource>,
    store: Arc<dyn FxRateStore>,
    memory: Mutex<HashMap<NaiveDate, Decimal>>,
    lookback_days: u32,
}

impl FxLookup {
    pub fn new(
        source: Arc<dyn FxRateSource>,
        store: Arc<dyn FxRateStore>,
        lookback_days: u32,
    ) -> Self {
        Self {
            source,
            store,
            memory: Mutex::new(HashMap::new()),
            lookback_days,
        }
    }

    fn remembered(&self, date: NaiveDate) -> Option<Decimal> {
        match self.memory.lock() {
            Ok(guard) => guard.get(&date).copied(),
            Err(poisoned) => poisoned.into_inner().get(&date).copied(),
        }
    }

    fn remember(&self, date: NaiveDate, rate: Decimal) {
        match self.memory.lock() {
            Ok(mut guard) => {
                guard.insert(date, rate);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(date, rate);
            }
        }
    }

    /// Rate for `target`, or for the nearest earlier date within the lookback window.
    ///
    /// Returns `(rate, date_actually_used)`.
    pub async fn usd_ils_rate(&self, target: NaiveDate) -> Result<(Decimal, NaiveDate), FxError> {
        for offset in 0..=self.lookback_days {
            let day = target - Duration::days(i64::from(offset));

            if let Some(rate) = self.remembered(day) {
                return Ok((rate, day));
            }

            if let Some(cached) = self.store.get_fx_rate(day).await? {
                let rate = quantize_rate(cached.rate_usd_ils);
                self.remember(day, rate);
                return Ok((rate, day));
            }

            let Some((rate, quoted_for)) = self.source.rate_on(day).await? else {
                debug!(date = %day, "No FX quote; trying the previous day");
                continue;
            };
            let rate = quantize_rate(rate);
            self.remember(quoted_for, rate);
            self.store
                .put_fx_rate(&FxRateRecord {
                    rate_date: quoted_for,
                    rate_usd_ils: rate,
                    source: self.source.name().to_string(),
                })
                .await?;
            return Ok((rate, quoted_for));
        }

        Err(FxError::NoRate {
            date: target,
            searched_days: self.lookback_days,
        })
    }
}

#[cfg(all(test, feature = "libsql"))]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::db::libsql::LibSqlBackend;
    use crate::db::{Database, FxRateStore};
    use crate::error::FxError;

    use super::{FxLookup, FxRateSource};

    struct FakeSource {
        rates: HashMap<NaiveDate, Decimal>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FxRateSource for FakeSource {
        fn name(&self) -> &'static str {
            "FAKE"
        }

        async fn rate_on(&self, date: NaiveDate) -> Result<Option<(Decimal, NaiveDate)>, FxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rates.get(&date).map(|rate| (*rate, date)))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    async fn store() -> Arc<LibSqlBackend> {
        let db = LibSqlBackend::new_memory().await.expect("memory db");
        db.run_migrations().await.expect("migrations");
        Arc::new(db)
    }

    #[tokio::test]
    async fn walks_back_to_last_published_rate_and_caches_it() {
        let source = Arc::new(FakeSource {
            // Friday quote; the lookup is for Sunday.
            rates: HashMap::from([(date(2025, 3, 7), dec!(3.6412345))]),
            calls: AtomicUsize::new(0),
        });
        let db = store().await;
        let lookup = FxLookup::new(source.clone(), db.clone(), 10);

        let (rate, used) = lookup.usd_ils_rate(date(2025, 3, 9)).await.expect("rate");
        assert_eq!(rate, dec!(3.641235));
        assert_eq!(used, date(2025, 3, 7));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        let persisted = db
            .get_fx_rate(date(2025, 3, 7))
            .await
            .expect("query")
            .expect("persisted");
        assert_eq!(persisted.rate_usd_ils, dec!(3.641235));
        assert_eq!(persisted.source, "FAKE");

        // Served from memory, no further source calls.
        let again = lookup.usd_ils_rate(date(2025, 3, 7)).await.expect("rate");
        assert_eq!(again, (dec!(3.641235), date(2025, 3, 7)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persisted_rates_survive_a_fresh_lookup() {
        let db = store().await;
        let first = FxLookup::new(
            Arc::new(FakeSource {
                rates: HashMap::from([(date(2025, 1, 2), dec!(3.65))]),
                calls: AtomicUsize::new(0),
            }),
            db.clone(),
            10,
        );
        first.usd_ils_rate(date(2025, 1, 2)).await.expect("rate");

        let empty = Arc::new(FakeSource {
            rates: HashMap::new(),
            calls: AtomicUsize::new(0),
        });
        let second = FxLookup::new(empty.clone(), db, 10);
        let (rate, _) = second.usd_ils_rate(date(2025, 1, 2)).await.expect("rate");
        assert_eq!(rate, dec!(3.65));
        assert_eq!(empty.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gives_up_after_the_lookback_window() {
        let source = Arc::new(FakeSource {
            rates: HashMap::from([(date(2025, 1, 1), dec!(3.70))]),
            calls: AtomicUsize::new(0),
        });
        let lookup = FxLookup::new(source.clone(), store().await, 10);

        let err = lookup
            .usd_ils_rate(date(2025, 1, 20))
            .await
            .expect_err("outside window");
        assert!(matches!(err, FxError::NoRate { searched_days: 10, .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 11);
    }
}
