//! Parallel per-day reads on top of [`RevalidatingCache`].
//!
//! Some upstreams are queried one calendar day at a time. `DayFanOut` issues
//! one cache read per day (today plus `days_back` previous days) concurrently,
//! each under its own key, then merges the batches. Today's batch is always
//! kept in full; items from past days are kept only when the caller's
//! eligibility predicate accepts them.
//!
//! Days are computed in a fixed UTC offset so that keys roll over at local
//! midnight for the audience being served, not at UTC midnight.

use std::future::Future;

use futures_util::future::join_all;
use time::{Date, Duration as TimeDuration, OffsetDateTime, UtcOffset};

use crate::error::Result;
use crate::key::CacheKey;
use crate::revalidate::RevalidatingCache;

/// Fan-out of cache reads across consecutive days.
#[derive(Debug, Clone)]
pub struct DayFanOut {
    name: String,
    offset: UtcOffset,
    days_back: u32,
}

impl DayFanOut {
    pub fn new(name: impl Into<String>, offset: UtcOffset, days_back: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            days_back,
        }
    }

    /// The current date in this fan-out's offset.
    pub fn today(&self) -> Date {
        OffsetDateTime::now_utc().to_offset(self.offset).date()
    }

    /// Cache key for one day's batch.
    pub fn day_key(&self, date: Date) -> CacheKey {
        CacheKey::new(&self.name)
            .named("date", date)
            .named("tz", self.offset)
    }

    /// Dates covered by a fan-out starting at `today`, newest first.
    pub fn dates(&self, today: Date) -> Vec<Date> {
        (0..=self.days_back)
            .filter_map(|back| today.checked_sub(TimeDuration::days(i64::from(back))))
            .collect()
    }

    /// Read every day's batch through `cache` and merge them.
    pub async fn fetch<T, F, Fut, P>(
        &self,
        cache: &RevalidatingCache<CacheKey, Vec<T>>,
        fetch_day: F,
        eligible: P,
    ) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Date) -> Fut,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
        P: Fn(&T) -> bool,
    {
        self.fetch_from(self.today(), cache, fetch_day, eligible).await
    }

    /// Like [`fetch`](Self::fetch) with an explicit "today".
    pub async fn fetch_from<T, F, Fut, P>(
        &self,
        today: Date,
        cache: &RevalidatingCache<CacheKey, Vec<T>>,
        fetch_day: F,
        eligible: P,
    ) -> Result<Vec<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Date) -> Fut,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
        P: Fn(&T) -> bool,
    {
        let dates = self.dates(today);
        let reads = dates.iter().map(|&date| {
            let upstream = fetch_day(date);
            cache.get(self.day_key(date), move || upstream)
        });
        let batches = join_all(reads).await;

        let mut merged = Vec::new();
        for (date, batch) in dates.into_iter().zip(batches) {
            if date == today {
                merged.extend(batch?);
                continue;
            }
            match batch {
                Ok(items) => merged.extend(items.into_iter().filter(|item| eligible(item))),
                Err(e) => {
                    tracing::warn!(
                        fanout = %self.name,
                        date = %date,
                        error = %e,
                        "Skipping past day batch after fetch failure"
                    );
                }
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::expiration::ExpirationPolicy;
    use std::time::Duration;
    use time::macros::{date, offset};

    fn cache() -> RevalidatingCache<CacheKey, Vec<(Date, u32)>> {
        RevalidatingCache::new("days", ExpirationPolicy::fixed(Duration::from_secs(60)))
    }

    #[test]
    fn dates_are_newest_first() {
        let fanout = DayFanOut::new("picks", offset!(UTC), 2);
        assert_eq!(
            fanout.dates(date!(2026 - 03 - 01)),
            vec![date!(2026 - 03 - 01), date!(2026 - 02 - 28), date!(2026 - 02 - 27)]
        );
    }

    #[test]
    fn day_keys_include_date_and_offset() {
        let fanout = DayFanOut::new("picks", offset!(+2), 0);
        let key = fanout.day_key(date!(2026 - 10 - 16));
        assert_eq!(key.named_arg("date"), Some("2026-10-16"));
        assert_ne!(
            key,
            DayFanOut::new("picks", offset!(UTC), 0).day_key(date!(2026 - 10 - 16))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn today_is_kept_whole_and_past_days_filtered() {
        let fanout = DayFanOut::new("picks", offset!(UTC), 2);
        let today = date!(2026 - 10 - 16);
        let cache = cache();

        let merged = fanout
            .fetch_from(
                today,
                &cache,
                |date| async move { Ok(vec![(date, 1), (date, 2), (date, 3)]) },
                |(_, score)| *score >= 2,
            )
            .await
            .unwrap();

        assert_eq!(merged.len(), 3 + 2 + 2);
        assert_eq!(merged.iter().filter(|(d, _)| *d == today).count(), 3);
        assert!(merged.iter().filter(|(d, _)| *d != today).all(|(_, s)| *s >= 2));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_past_day_is_skipped_but_today_failure_propagates() {
        let fanout = DayFanOut::new("picks", offset!(UTC), 1);
        let today = date!(2026 - 10 - 16);

        let cache = cache();
        let merged = fanout
            .fetch_from(
                today,
                &cache,
                move |date| async move {
                    if date == today {
                        Ok(vec![(date, 5)])
                    } else {
                        Err(Error::transient("upstream timeout"))
                    }
                },
                |_| true,
            )
            .await
            .unwrap();
        assert_eq!(merged, vec![(today, 5)]);

        let cache = self::cache();
        let result = fanout
            .fetch_from(
                today,
                &cache,
                move |date| async move {
                    if date == today {
                        Err(Error::transient("upstream timeout"))
                    } else {
                        Ok(vec![(date, 1)])
                    }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
    }
}
