//! In-process cache adapter.
//!
//! A single mutex guards the whole entry map, which is what makes every
//! trait method (including the composite ones) atomic per key. Expiry is
//! lazy: an expired entry is dropped the moment any operation touches it.
//! For keys nothing touches anymore, [`MemoryCache::spawn_sweeper`] starts
//! a background task that removes expired entries on an interval.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use drawbridge::cache_adapter::{CacheAdapter, CasOutcome, ScoredMember};
use drawbridge::prelude::*;

/// Extra margin on a window key's expiry, so the key outlives the last
/// member it still has to count.
const WINDOW_TTL_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Payload {
	Str(Box<str>),
	Zset(HashMap<Box<str>, i64>),
	List(VecDeque<Box<str>>),
}

#[derive(Debug)]
struct Entry {
	payload: Payload,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_expired(&self, now: Instant) -> bool {
		self.expires_at.is_some_and(|at| at <= now)
	}
}

#[derive(Debug, Default)]
pub struct MemoryCache {
	entries: Mutex<HashMap<Box<str>, Entry>>,
}

fn wrong_type() -> Error {
	Error::Internal("wrong entry type for key".into())
}

/// Resolve an inclusive `(start, stop)` rank range (negative values count
/// from the end) against a collection of `len` elements.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
	let n = len as i64;
	if n == 0 {
		return None;
	}
	let mut s = if start < 0 { n + start } else { start };
	let mut e = if stop < 0 { n + stop } else { stop };
	if s < 0 {
		s = 0;
	}
	if e >= n {
		e = n - 1;
	}
	if s > e {
		return None;
	}
	Some((s as usize, e as usize))
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Run `f` on the live (non-expired) entry map.
	fn with<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<Box<str>, Entry>) -> T) -> T {
		let mut entries = self.entries.lock();
		let now = Instant::now();
		if entries.get(key).is_some_and(|e| e.is_expired(now)) {
			entries.remove(key);
		}
		f(&mut entries)
	}

	/// Sorted `(member, score)` snapshot of a zset entry.
	fn zset_sorted(members: &HashMap<Box<str>, i64>) -> Vec<ScoredMember> {
		let mut items: Vec<ScoredMember> = members
			.iter()
			.map(|(member, score)| ScoredMember { member: member.clone(), score: *score })
			.collect();
		items.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.member.cmp(&b.member)));
		items
	}

	/// Spawn a background task that drops expired entries every `interval`.
	pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
		let cache = Arc::clone(self);
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let now = Instant::now();
				cache.entries.lock().retain(|_, entry| !entry.is_expired(now));
			}
		})
	}

	/// Number of live entries, for tests and diagnostics.
	pub fn len(&self) -> usize {
		let now = Instant::now();
		self.entries.lock().values().filter(|e| !e.is_expired(now)).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[async_trait]
impl CacheAdapter for MemoryCache {
	async fn get(&self, key: &str) -> ClResult<Option<Box<str>>> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { payload: Payload::Str(value), .. }) => Ok(Some(value.clone())),
			Some(_) => Err(wrong_type()),
			None => Ok(None),
		})
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()> {
		self.with(key, |entries| {
			entries.insert(
				key.into(),
				Entry {
					payload: Payload::Str(value.into()),
					expires_at: ttl.map(|ttl| Instant::now() + ttl),
				},
			);
			Ok(())
		})
	}

	async fn get_del(&self, key: &str) -> ClResult<Option<Box<str>>> {
		self.with(key, |entries| match entries.remove(key) {
			Some(Entry { payload: Payload::Str(value), .. }) => Ok(Some(value)),
			Some(entry) => {
				entries.insert(key.into(), entry);
				Err(wrong_type())
			}
			None => Ok(None),
		})
	}

	async fn compare_and_delete(&self, key: &str, expected: &str) -> ClResult<CasOutcome> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { payload: Payload::Str(value), .. }) => {
				if value.as_ref() == expected {
					entries.remove(key);
					Ok(CasOutcome::Deleted)
				} else {
					Ok(CasOutcome::Mismatch)
				}
			}
			Some(_) => Err(wrong_type()),
			None => Ok(CasOutcome::Missing),
		})
	}

	async fn delete(&self, key: &str) -> ClResult<bool> {
		self.with(key, |entries| Ok(entries.remove(key).is_some()))
	}

	async fn exists(&self, key: &str) -> ClResult<bool> {
		self.with(key, |entries| Ok(entries.contains_key(key)))
	}

	async fn ttl_remaining(&self, key: &str) -> ClResult<Option<Duration>> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { expires_at: Some(at), .. }) => {
				Ok(Some(at.saturating_duration_since(Instant::now())))
			}
			Some(Entry { expires_at: None, .. }) => Ok(None),
			None => Err(Error::NotFound),
		})
	}

	async fn expire(&self, key: &str, ttl: Duration) -> ClResult<bool> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(entry) => {
				entry.expires_at = Some(Instant::now() + ttl);
				Ok(true)
			}
			None => Ok(false),
		})
	}

	async fn incr(&self, key: &str, by: i64, ttl: Option<Duration>) -> ClResult<i64> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(Entry { payload: Payload::Str(value), .. }) => {
				let current: i64 = value.parse().map_err(|_| Error::Parse)?;
				let next = current + by;
				*value = next.to_string().into_boxed_str();
				Ok(next)
			}
			Some(_) => Err(wrong_type()),
			None => {
				entries.insert(
					key.into(),
					Entry {
						payload: Payload::Str(by.to_string().into_boxed_str()),
						expires_at: ttl.map(|ttl| Instant::now() + ttl),
					},
				);
				Ok(by)
			}
		})
	}

	async fn zadd(&self, key: &str, member: &str, score: i64) -> ClResult<()> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(Entry { payload: Payload::Zset(members), .. }) => {
				members.insert(member.into(), score);
				Ok(())
			}
			Some(_) => Err(wrong_type()),
			None => {
				let mut members = HashMap::new();
				members.insert(member.into(), score);
				entries.insert(
					key.into(),
					Entry { payload: Payload::Zset(members), expires_at: None },
				);
				Ok(())
			}
		})
	}

	async fn zrem(&self, key: &str, member: &str) -> ClResult<bool> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(Entry { payload: Payload::Zset(members), .. }) => {
				let removed = members.remove(member).is_some();
				if members.is_empty() {
					entries.remove(key);
				}
				Ok(removed)
			}
			Some(_) => Err(wrong_type()),
			None => Ok(false),
		})
	}

	async fn zcard(&self, key: &str) -> ClResult<u64> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { payload: Payload::Zset(members), .. }) => Ok(members.len() as u64),
			Some(_) => Err(wrong_type()),
			None => Ok(0),
		})
	}

	async fn zcount(&self, key: &str, min: i64, max: i64) -> ClResult<u64> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { payload: Payload::Zset(members), .. }) => {
				Ok(members.values().filter(|score| (min..=max).contains(score)).count() as u64)
			}
			Some(_) => Err(wrong_type()),
			None => Ok(0),
		})
	}

	async fn zrange(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<ScoredMember>> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { payload: Payload::Zset(members), .. }) => {
				let sorted = Self::zset_sorted(members);
				match resolve_range(sorted.len(), start, stop) {
					Some((s, e)) => Ok(sorted[s..=e].to_vec()),
					None => Ok(Vec::new()),
				}
			}
			Some(_) => Err(wrong_type()),
			None => Ok(Vec::new()),
		})
	}

	async fn zpop_min(&self, key: &str) -> ClResult<Option<ScoredMember>> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(Entry { payload: Payload::Zset(members), .. }) => {
				let min = Self::zset_sorted(members).into_iter().next();
				if let Some(ref item) = min {
					members.remove(&item.member);
					if members.is_empty() {
						entries.remove(key);
					}
				}
				Ok(min)
			}
			Some(_) => Err(wrong_type()),
			None => Ok(None),
		})
	}

	async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> ClResult<u64> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(Entry { payload: Payload::Zset(members), .. }) => {
				let before = members.len();
				members.retain(|_, score| !(min..=max).contains(score));
				let removed = (before - members.len()) as u64;
				if members.is_empty() {
					entries.remove(key);
				}
				Ok(removed)
			}
			Some(_) => Err(wrong_type()),
			None => Ok(0),
		})
	}

	async fn window_add_and_count(
		&self,
		key: &str,
		member: &str,
		now: i64,
		window: Duration,
	) -> ClResult<u64> {
		let cutoff = now - window.as_millis() as i64;
		self.with(key, |entries| {
			let entry = entries.entry(key.into()).or_insert_with(|| Entry {
				payload: Payload::Zset(HashMap::new()),
				expires_at: None,
			});
			let Payload::Zset(members) = &mut entry.payload else {
				return Err(wrong_type());
			};
			members.retain(|_, score| *score > cutoff);
			members.insert(member.into(), now);
			entry.expires_at = Some(Instant::now() + window + WINDOW_TTL_SLACK);
			Ok(members.len() as u64)
		})
	}

	async fn list_push_back(&self, key: &str, value: &str) -> ClResult<u64> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(Entry { payload: Payload::List(items), .. }) => {
				items.push_back(value.into());
				Ok(items.len() as u64)
			}
			Some(_) => Err(wrong_type()),
			None => {
				let mut items = VecDeque::new();
				items.push_back(value.into());
				entries.insert(
					key.into(),
					Entry { payload: Payload::List(items), expires_at: None },
				);
				Ok(1)
			}
		})
	}

	async fn list_range(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<Box<str>>> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { payload: Payload::List(items), .. }) => {
				match resolve_range(items.len(), start, stop) {
					Some((s, e)) => Ok(items.iter().skip(s).take(e - s + 1).cloned().collect()),
					None => Ok(Vec::new()),
				}
			}
			Some(_) => Err(wrong_type()),
			None => Ok(Vec::new()),
		})
	}

	async fn list_trim_front(&self, key: &str, count: u64) -> ClResult<()> {
		self.with(key, |entries| match entries.get_mut(key) {
			Some(Entry { payload: Payload::List(items), .. }) => {
				for _ in 0..count {
					if items.pop_front().is_none() {
						break;
					}
				}
				if items.is_empty() {
					entries.remove(key);
				}
				Ok(())
			}
			Some(_) => Err(wrong_type()),
			None => Ok(()),
		})
	}

	async fn list_len(&self, key: &str) -> ClResult<u64> {
		self.with(key, |entries| match entries.get(key) {
			Some(Entry { payload: Payload::List(items), .. }) => Ok(items.len() as u64),
			Some(_) => Err(wrong_type()),
			None => Ok(0),
		})
	}

	async fn ping(&self) -> ClResult<()> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_resolve_range() {
		assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
		assert_eq!(resolve_range(5, 1, 2), Some((1, 2)));
		assert_eq!(resolve_range(5, 0, 99), Some((0, 4)));
		assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
		assert_eq!(resolve_range(5, 4, 2), None);
		assert_eq!(resolve_range(0, 0, -1), None);
	}
}

// vim: ts=4
