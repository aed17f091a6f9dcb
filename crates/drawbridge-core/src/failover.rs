//! Failover cache decorator.
//!
//! Wraps a primary cache tier and an optional durable fallback behind the
//! same adapter trait, so feature code never branches on availability.
//! Every call gets a hard timeout; a timeout or a store-level failure on
//! the primary marks it down and routes the call to the fallback. While the
//! primary is down a liveness probe runs at most once per probe interval,
//! so recovery does not need a restart.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::FailoverConfig;
use crate::prelude::*;
use drawbridge_types::cache_adapter::{CacheAdapter, CasOutcome, ScoredMember};
use drawbridge_types::types::now_millis;

#[derive(Debug)]
pub struct FailoverCache {
	primary: Arc<dyn CacheAdapter>,
	fallback: Option<Arc<dyn CacheAdapter>>,
	op_timeout: Duration,
	probe_interval: Duration,
	primary_up: AtomicBool,
	last_probe_ms: AtomicI64,
}

/// Run an operation on the primary, falling back on timeout or store
/// failure. Domain errors (NotFound etc.) pass through untouched.
macro_rules! failover {
	($self:ident . $op:ident ( $($arg:expr),* )) => {{
		if $self.primary_usable().await {
			match tokio::time::timeout($self.op_timeout, $self.primary.$op($($arg),*)).await {
				Ok(Ok(value)) => return Ok(value),
				Ok(Err(Error::StoreUnavailable | Error::DbError)) | Err(_) => $self.mark_primary_down(),
				Ok(Err(err)) => return Err(err),
			}
		}
		match &$self.fallback {
			Some(fallback) => {
				match tokio::time::timeout($self.op_timeout, fallback.$op($($arg),*)).await {
					Ok(res) => res,
					Err(_) => Err(Error::StoreUnavailable),
				}
			}
			None => Err(Error::StoreUnavailable),
		}
	}};
}

impl FailoverCache {
	pub fn new(
		primary: Arc<dyn CacheAdapter>,
		fallback: Option<Arc<dyn CacheAdapter>>,
		config: &FailoverConfig,
	) -> Self {
		Self {
			primary,
			fallback,
			op_timeout: config.op_timeout(),
			probe_interval: config.probe_interval(),
			primary_up: AtomicBool::new(true),
			last_probe_ms: AtomicI64::new(0),
		}
	}

	pub fn is_primary_up(&self) -> bool {
		self.primary_up.load(Ordering::Relaxed)
	}

	fn mark_primary_down(&self) {
		if self.primary_up.swap(false, Ordering::Relaxed) {
			warn!("Primary cache marked down, serving from fallback");
		}
		self.last_probe_ms.store(now_millis(), Ordering::Relaxed);
	}

	/// True when the primary can serve the next call. A downed primary is
	/// re-probed at most once per probe interval; only the task winning the
	/// probe slot pays for the ping.
	async fn primary_usable(&self) -> bool {
		if self.primary_up.load(Ordering::Relaxed) {
			return true;
		}
		let now = now_millis();
		let last = self.last_probe_ms.load(Ordering::Relaxed);
		if now - last < self.probe_interval.as_millis() as i64 {
			return false;
		}
		if self
			.last_probe_ms
			.compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
			.is_err()
		{
			return false;
		}
		match tokio::time::timeout(self.op_timeout, self.primary.ping()).await {
			Ok(Ok(())) => {
				self.primary_up.store(true, Ordering::Relaxed);
				info!("Primary cache back online");
				true
			}
			_ => false,
		}
	}
}

#[async_trait]
impl CacheAdapter for FailoverCache {
	async fn get(&self, key: &str) -> ClResult<Option<Box<str>>> {
		failover!(self.get(key))
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()> {
		failover!(self.set(key, value, ttl))
	}

	async fn get_del(&self, key: &str) -> ClResult<Option<Box<str>>> {
		failover!(self.get_del(key))
	}

	async fn compare_and_delete(&self, key: &str, expected: &str) -> ClResult<CasOutcome> {
		failover!(self.compare_and_delete(key, expected))
	}

	async fn delete(&self, key: &str) -> ClResult<bool> {
		failover!(self.delete(key))
	}

	async fn exists(&self, key: &str) -> ClResult<bool> {
		failover!(self.exists(key))
	}

	async fn ttl_remaining(&self, key: &str) -> ClResult<Option<Duration>> {
		failover!(self.ttl_remaining(key))
	}

	async fn expire(&self, key: &str, ttl: Duration) -> ClResult<bool> {
		failover!(self.expire(key, ttl))
	}

	async fn incr(&self, key: &str, by: i64, ttl: Option<Duration>) -> ClResult<i64> {
		failover!(self.incr(key, by, ttl))
	}

	async fn zadd(&self, key: &str, member: &str, score: i64) -> ClResult<()> {
		failover!(self.zadd(key, member, score))
	}

	async fn zrem(&self, key: &str, member: &str) -> ClResult<bool> {
		failover!(self.zrem(key, member))
	}

	async fn zcard(&self, key: &str) -> ClResult<u64> {
		failover!(self.zcard(key))
	}

	async fn zcount(&self, key: &str, min: i64, max: i64) -> ClResult<u64> {
		failover!(self.zcount(key, min, max))
	}

	async fn zrange(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<ScoredMember>> {
		failover!(self.zrange(key, start, stop))
	}

	async fn zpop_min(&self, key: &str) -> ClResult<Option<ScoredMember>> {
		failover!(self.zpop_min(key))
	}

	async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> ClResult<u64> {
		failover!(self.zrem_range_by_score(key, min, max))
	}

	async fn window_add_and_count(
		&self,
		key: &str,
		member: &str,
		now: i64,
		window: Duration,
	) -> ClResult<u64> {
		failover!(self.window_add_and_count(key, member, now, window))
	}

	async fn list_push_back(&self, key: &str, value: &str) -> ClResult<u64> {
		failover!(self.list_push_back(key, value))
	}

	async fn list_range(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<Box<str>>> {
		failover!(self.list_range(key, start, stop))
	}

	async fn list_trim_front(&self, key: &str, count: u64) -> ClResult<()> {
		failover!(self.list_trim_front(key, count))
	}

	async fn list_len(&self, key: &str) -> ClResult<u64> {
		failover!(self.list_len(key))
	}

	async fn ping(&self) -> ClResult<()> {
		failover!(self.ping())
	}
}


// vim: ts=4
