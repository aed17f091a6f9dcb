//! Adapter trait for the fast cache tier.
//!
//! Every key is an opaque UTF-8 string following the
//! `{domain}:{scope}:{identifier}` naming convention (see
//! [`crate::utils::cache_key`]). Implementations must make each method
//! atomic per key: two concurrent calls touching the same key behave as if
//! they executed one after the other. The composite methods
//! ([`CacheAdapter::get_del`], [`CacheAdapter::compare_and_delete`],
//! [`CacheAdapter::incr`], [`CacheAdapter::window_add_and_count`]) exist
//! exactly because the callers need their read-modify-write cycles to be a
//! single linearizable step.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

use crate::prelude::*;

/// Outcome of a compare-and-delete operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CasOutcome {
	/// The key held the expected value and has been deleted.
	Deleted,
	/// The key exists but holds a different value; nothing was deleted.
	Mismatch,
	/// The key does not exist (or expired).
	Missing,
}

/// A member of a score-ordered set together with its score.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScoredMember {
	pub member: Box<str>,
	pub score: i64,
}

#[async_trait]
pub trait CacheAdapter: Debug + Send + Sync {
	// String entries
	//****************
	async fn get(&self, key: &str) -> ClResult<Option<Box<str>>>;

	/// Set a value. `ttl == None` means the entry never expires.
	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()>;

	/// Atomically read and delete. Returns `None` if the key was absent.
	async fn get_del(&self, key: &str) -> ClResult<Option<Box<str>>>;

	/// Atomically delete the key only if it holds `expected`.
	async fn compare_and_delete(&self, key: &str, expected: &str) -> ClResult<CasOutcome>;

	/// Delete a key of any kind. Returns whether it existed.
	async fn delete(&self, key: &str) -> ClResult<bool>;

	async fn exists(&self, key: &str) -> ClResult<bool>;

	/// Remaining time to live. `Ok(None)` if the key exists without expiry,
	/// `Err(Error::NotFound)` if the key is absent.
	async fn ttl_remaining(&self, key: &str) -> ClResult<Option<Duration>>;

	/// Set or replace the expiry of an existing key. Returns false if the
	/// key is absent.
	async fn expire(&self, key: &str, ttl: Duration) -> ClResult<bool>;

	/// Atomically increment a counter, creating it at 0 first. The TTL is
	/// only applied when the counter is created.
	async fn incr(&self, key: &str, by: i64, ttl: Option<Duration>) -> ClResult<i64>;

	// Score-ordered sets
	//********************
	/// Add a member with a score, replacing the score if the member exists.
	async fn zadd(&self, key: &str, member: &str, score: i64) -> ClResult<()>;

	async fn zrem(&self, key: &str, member: &str) -> ClResult<bool>;

	async fn zcard(&self, key: &str) -> ClResult<u64>;

	/// Count members with `min <= score <= max`.
	async fn zcount(&self, key: &str, min: i64, max: i64) -> ClResult<u64>;

	/// Members ordered by ascending score. `stop == -1` means "to the end",
	/// following the usual inclusive rank-range convention.
	async fn zrange(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<ScoredMember>>;

	/// Atomically remove and return the member with the lowest score.
	async fn zpop_min(&self, key: &str) -> ClResult<Option<ScoredMember>>;

	/// Remove members with `min <= score <= max`, returning how many.
	async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> ClResult<u64>;

	/// The sliding-window composite: in one atomic step, drop members with
	/// `score <= now - window`, insert `member` at `now`, refresh the key
	/// expiry to `window` plus a small slack, and return the resulting
	/// cardinality. Scores are unix milliseconds here.
	async fn window_add_and_count(
		&self,
		key: &str,
		member: &str,
		now: i64,
		window: Duration,
	) -> ClResult<u64>;

	// Lists
	//*******
	/// Append to the tail, returning the new length.
	async fn list_push_back(&self, key: &str, value: &str) -> ClResult<u64>;

	/// Elements by inclusive index range, `stop == -1` meaning "to the end".
	async fn list_range(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<Box<str>>>;

	/// Drop `count` elements from the head.
	async fn list_trim_front(&self, key: &str, count: u64) -> ClResult<()>;

	async fn list_len(&self, key: &str) -> ClResult<u64>;

	// Liveness
	//**********
	/// Cheap liveness probe, used by the failover layer.
	async fn ping(&self) -> ClResult<()>;
}

// vim: ts=4
