//! Sliding-window rate limiter.
//!
//! Counts events in an exact sliding window backed by a score-ordered set
//! under `rate:{category}:{identifier}`. The prune + insert + count +
//! expire cycle is one atomic cache call, so concurrent requests against
//! the same identifier are counted correctly. When the cache tier is
//! unavailable, the rule's fail mode decides: security-critical counters
//! (login, captcha, SMS) fail closed and deny; quota-style counters fail
//! open and allow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::prelude::*;
use drawbridge_types::cache_adapter::CacheAdapter;
use drawbridge_types::types::now_millis;
use drawbridge_types::utils::cache_key;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailMode {
	/// Allow the request when the store cannot answer.
	Open,
	/// Deny the request when the store cannot answer.
	Closed,
}

#[derive(Clone, Debug)]
pub struct RateLimitRule {
	pub category: Box<str>,
	pub max_attempts: u32,
	pub window: Duration,
	pub fail_mode: FailMode,
}

impl RateLimitRule {
	pub fn new(
		category: impl Into<Box<str>>,
		max_attempts: u32,
		window: Duration,
		fail_mode: FailMode,
	) -> Self {
		Self { category: category.into(), max_attempts, window, fail_mode }
	}
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimitDecision {
	pub allowed: bool,
	/// Events currently in the window, including this one. Zero when the
	/// decision was made in degraded mode.
	pub current: u32,
	pub remaining: u32,
	/// True when the store was unavailable and the fail mode decided.
	pub degraded: bool,
}

/// Counters for diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct LimiterStats {
	pub total_denied: u64,
	pub total_degraded: u64,
}

#[derive(Debug)]
pub struct SlidingWindowLimiter {
	cache: Arc<dyn CacheAdapter>,
	/// Suffix tie-breaker so two events in the same millisecond stay
	/// distinct members.
	seq: AtomicU64,
	total_denied: AtomicU64,
	total_degraded: AtomicU64,
}

impl SlidingWindowLimiter {
	pub fn new(cache: Arc<dyn CacheAdapter>) -> Self {
		Self {
			cache,
			seq: AtomicU64::new(0),
			total_denied: AtomicU64::new(0),
			total_degraded: AtomicU64::new(0),
		}
	}

	/// Record an event and decide in one step. The event counts against the
	/// window even when the decision is a denial.
	pub async fn check_and_record(
		&self,
		rule: &RateLimitRule,
		identifier: &str,
	) -> ClResult<RateLimitDecision> {
		let key = cache_key("rate", &rule.category, identifier);
		let now = now_millis();
		let member = format!("{}-{}", now, self.seq.fetch_add(1, Ordering::Relaxed));

		match self.cache.window_add_and_count(&key, &member, now, rule.window).await {
			Ok(count) => {
				let allowed = count <= u64::from(rule.max_attempts);
				if !allowed {
					self.total_denied.fetch_add(1, Ordering::Relaxed);
					debug!("Rate limit hit for {}:{} ({} in window)", rule.category, identifier, count);
				}
				Ok(RateLimitDecision {
					allowed,
					current: count as u32,
					remaining: rule.max_attempts.saturating_sub(count as u32),
					degraded: false,
				})
			}
			Err(Error::StoreUnavailable) => {
				self.total_degraded.fetch_add(1, Ordering::Relaxed);
				let allowed = rule.fail_mode == FailMode::Open;
				warn!(
					"Rate limit store unavailable for {}:{}, failing {}",
					rule.category,
					identifier,
					if allowed { "open" } else { "closed" }
				);
				if !allowed {
					self.total_denied.fetch_add(1, Ordering::Relaxed);
				}
				Ok(RateLimitDecision { allowed, current: 0, remaining: 0, degraded: true })
			}
			Err(err) => Err(err),
		}
	}

	/// Current count in the window without recording anything.
	pub async fn peek(&self, rule: &RateLimitRule, identifier: &str) -> ClResult<u32> {
		let key = cache_key("rate", &rule.category, identifier);
		let cutoff = now_millis() - rule.window.as_millis() as i64;
		let count = self.cache.zcount(&key, cutoff + 1, i64::MAX).await?;
		Ok(count as u32)
	}

	/// Reset the window for an identifier (e.g. after a successful login).
	pub async fn clear(&self, category: &str, identifier: &str) -> ClResult<()> {
		self.cache.delete(&cache_key("rate", category, identifier)).await?;
		Ok(())
	}

	pub fn stats(&self) -> LimiterStats {
		LimiterStats {
			total_denied: self.total_denied.load(Ordering::Relaxed),
			total_degraded: self.total_degraded.load(Ordering::Relaxed),
		}
	}
}


// vim: ts=4
