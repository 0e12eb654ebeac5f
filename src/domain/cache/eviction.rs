//! Victim selection for the in-memory tier

use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// Entry metadata an eviction policy ranks on
///
/// Sequence numbers come from a per-cache logical clock, so ordering stays
/// deterministic when wall-clock timestamps collide.
pub trait EvictionCandidate {
    fn created_at(&self) -> DateTime<Utc>;
    fn access_count(&self) -> u64;
    fn expires_at(&self) -> Option<DateTime<Utc>>;
    /// Logical time of insertion
    fn insert_seq(&self) -> u64;
    /// Logical time of the last insert or touch
    fn touch_seq(&self) -> u64;
}

/// Strategy for choosing which entry leaves a full cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Least recently touched
    #[default]
    Recency,
    /// Lowest access count, oldest insertion first on ties
    Frequency,
    /// Oldest insertion
    InsertionOrder,
    /// Least remaining TTL; entries without TTL only when none has one
    ExpiryProximity,
    /// Highest `age_hours / (access_count + 1)`
    Adaptive,
}

impl EvictionPolicy {
    /// Picks the key to evict, or `None` for an empty iterator
    pub fn select_victim<'a, K, E>(
        &self,
        entries: impl IntoIterator<Item = (&'a K, &'a E)>,
        now: DateTime<Utc>,
    ) -> Option<&'a K>
    where
        K: 'a,
        E: EvictionCandidate + 'a,
    {
        let entries = entries.into_iter();

        match self {
            Self::Recency => entries.min_by_key(|(_, e)| e.touch_seq()).map(|(k, _)| k),
            Self::Frequency => entries
                .min_by_key(|(_, e)| (e.access_count(), e.insert_seq()))
                .map(|(k, _)| k),
            Self::InsertionOrder => oldest(entries),
            Self::ExpiryProximity => {
                let entries: Vec<_> = entries.collect();

                entries
                    .iter()
                    .filter_map(|(k, e)| e.expires_at().map(|at| (at, e.insert_seq(), *k)))
                    .min_by_key(|(at, seq, _)| (*at, *seq))
                    .map(|(_, _, k)| k)
                    .or_else(|| oldest(entries.into_iter()))
            }
            Self::Adaptive => entries
                .map(|(k, e)| (adaptive_score(e, now), e.insert_seq(), k))
                .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
                .map(|(_, _, k)| k),
        }
    }

    /// Evicts until `entries` can take `incoming` more items without exceeding
    /// `max_entries`; returns what was removed and whether room was made
    pub fn make_room<K, E>(
        &self,
        entries: &mut HashMap<K, E>,
        max_entries: usize,
        incoming: usize,
        now: DateTime<Utc>,
    ) -> EvictionOutcome<K, E>
    where
        K: Eq + Hash + Clone,
        E: EvictionCandidate,
    {
        let target = max_entries.saturating_sub(incoming);
        let mut evicted = Vec::new();

        while entries.len() > target {
            let Some(victim) = self.select_victim(entries.iter(), now).cloned() else {
                break;
            };

            if let Some(entry) = entries.remove(&victim) {
                evicted.push((victim, entry));
            }
        }

        EvictionOutcome {
            room_made: entries.len() + incoming <= max_entries,
            evicted,
        }
    }
}

/// Result of a [`EvictionPolicy::make_room`] pass
#[derive(Debug)]
pub struct EvictionOutcome<K, E> {
    pub evicted: Vec<(K, E)>,
    /// False when capacity could not be restored (e.g. `max_entries` of 0)
    pub room_made: bool,
}

fn oldest<'a, K, E>(entries: impl Iterator<Item = (&'a K, &'a E)>) -> Option<&'a K>
where
    K: 'a,
    E: EvictionCandidate + 'a,
{
    entries
        .min_by_key(|(_, e)| (e.created_at(), e.insert_seq()))
        .map(|(k, _)| k)
}

fn adaptive_score<E: EvictionCandidate>(entry: &E, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - entry.created_at()).num_milliseconds().max(0) as f64 / 3_600_000.0;
    age_hours / (entry.access_count() as f64 + 1.0)
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recency => write!(f, "recency"),
            Self::Frequency => write!(f, "frequency"),
            Self::InsertionOrder => write!(f, "insertion_order"),
            Self::ExpiryProximity => write!(f, "expiry_proximity"),
            Self::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl FromStr for EvictionPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recency" | "lru" => Ok(Self::Recency),
            "frequency" | "lfu" => Ok(Self::Frequency),
            "insertion_order" | "fifo" => Ok(Self::InsertionOrder),
            "expiry_proximity" | "ttl" => Ok(Self::ExpiryProximity),
            "adaptive" => Ok(Self::Adaptive),
            _ => Err(DomainError::configuration(format!(
                "Unknown eviction policy: {}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone)]
    struct Entry {
        created_at: DateTime<Utc>,
        access_count: u64,
        expires_at: Option<DateTime<Utc>>,
        insert_seq: u64,
        touch_seq: u64,
    }

    impl Entry {
        fn new(seq: u64, now: DateTime<Utc>) -> Self {
            Self {
                created_at: now,
                access_count: 0,
                expires_at: None,
                insert_seq: seq,
                touch_seq: seq,
            }
        }
    }

    impl EvictionCandidate for Entry {
        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
        fn access_count(&self) -> u64 {
            self.access_count
        }
        fn expires_at(&self) -> Option<DateTime<Utc>> {
            self.expires_at
        }
        fn insert_seq(&self) -> u64 {
            self.insert_seq
        }
        fn touch_seq(&self) -> u64 {
            self.touch_seq
        }
    }

    fn three_entries(now: DateTime<Utc>) -> HashMap<&'static str, Entry> {
        HashMap::from([
            ("k1", Entry::new(1, now)),
            ("k2", Entry::new(2, now)),
            ("k3", Entry::new(3, now)),
        ])
    }

    #[test]
    fn test_recency_evicts_least_recently_touched() {
        let now = Utc::now();
        let mut entries = three_entries(now);
        entries.get_mut("k1").unwrap().touch_seq = 4;

        let outcome = EvictionPolicy::Recency.make_room(&mut entries, 3, 1, now);

        assert!(outcome.room_made);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].0, "k2");
        assert!(entries.contains_key("k1"));
    }

    #[test]
    fn test_frequency_breaks_ties_by_insertion() {
        let now = Utc::now();
        let mut entries = three_entries(now);
        entries.get_mut("k1").unwrap().access_count = 5;

        let victim = EvictionPolicy::Frequency.select_victim(entries.iter(), now);
        assert_eq!(victim, Some(&"k2"));
    }

    #[test]
    fn test_insertion_order_evicts_oldest() {
        let now = Utc::now();
        let mut entries = three_entries(now);
        entries.get_mut("k3").unwrap().created_at = now - Duration::hours(1);

        let victim = EvictionPolicy::InsertionOrder.select_victim(entries.iter(), now);
        assert_eq!(victim, Some(&"k3"));
    }

    #[test]
    fn test_expiry_proximity_skips_entries_without_ttl() {
        let now = Utc::now();
        let mut entries = three_entries(now);
        entries.get_mut("k2").unwrap().expires_at = Some(now + Duration::minutes(10));
        entries.get_mut("k3").unwrap().expires_at = Some(now + Duration::minutes(1));

        let victim = EvictionPolicy::ExpiryProximity.select_victim(entries.iter(), now);
        assert_eq!(victim, Some(&"k3"));
    }

    #[test]
    fn test_expiry_proximity_falls_back_to_insertion_order() {
        let now = Utc::now();
        let entries = three_entries(now);

        let victim = EvictionPolicy::ExpiryProximity.select_victim(entries.iter(), now);
        assert_eq!(victim, Some(&"k1"));
    }

    #[test]
    fn test_adaptive_prefers_stale_and_rarely_used() {
        let now = Utc::now();
        let mut entries = three_entries(now);

        let stale_popular = entries.get_mut("k1").unwrap();
        stale_popular.created_at = now - Duration::hours(10);
        stale_popular.access_count = 99;

        let stale_unused = entries.get_mut("k2").unwrap();
        stale_unused.created_at = now - Duration::hours(2);

        let victim = EvictionPolicy::Adaptive.select_victim(entries.iter(), now);
        assert_eq!(victim, Some(&"k2"));
    }

    #[test]
    fn test_make_room_handles_overshoot() {
        let now = Utc::now();
        let mut entries = three_entries(now);

        let outcome = EvictionPolicy::InsertionOrder.make_room(&mut entries, 2, 1, now);

        assert!(outcome.room_made);
        assert_eq!(outcome.evicted.len(), 2);
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("k3"));
    }

    #[test]
    fn test_make_room_reports_impossible_capacity() {
        let now = Utc::now();
        let mut entries: HashMap<&str, Entry> = HashMap::new();

        let outcome = EvictionPolicy::Recency.make_room(&mut entries, 0, 1, now);

        assert!(!outcome.room_made);
        assert!(outcome.evicted.is_empty());
    }

    #[test]
    fn test_policy_from_str_aliases() {
        assert_eq!("LRU".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Recency);
        assert_eq!("fifo".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::InsertionOrder);
        assert!("random".parse::<EvictionPolicy>().is_err());
    }
}
