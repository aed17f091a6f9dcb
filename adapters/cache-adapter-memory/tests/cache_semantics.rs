//! Semantics tests for the in-process cache adapter
//!
//! Exercises the per-key atomic operations the security layer is built on:
//! TTL expiry, get-and-delete, compare-and-delete, counters, score-ordered
//! sets, and lists.

use std::sync::Arc;
use std::time::Duration;

use drawbridge::cache_adapter::{CacheAdapter, CasOutcome};
use drawbridge::error::Error;
use drawbridge_cache_adapter_memory::MemoryCache;

#[tokio::test]
async fn test_set_get_and_ttl_expiry() {
	let cache = MemoryCache::new();

	cache.set("a:b:1", "hello", Some(Duration::from_millis(50))).await.unwrap();
	assert_eq!(cache.get("a:b:1").await.unwrap().as_deref(), Some("hello"));

	tokio::time::sleep(Duration::from_millis(80)).await;
	assert_eq!(cache.get("a:b:1").await.unwrap(), None);
	assert!(matches!(cache.ttl_remaining("a:b:1").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_get_del_returns_value_exactly_once() {
	let cache = MemoryCache::new();

	cache.set("code:captcha:x", "ABCD", None).await.unwrap();
	assert_eq!(cache.get_del("code:captcha:x").await.unwrap().as_deref(), Some("ABCD"));
	assert_eq!(cache.get_del("code:captcha:x").await.unwrap(), None);
}

#[tokio::test]
async fn test_compare_and_delete_outcomes() {
	let cache = MemoryCache::new();

	cache.set("k", "v1", None).await.unwrap();
	assert_eq!(cache.compare_and_delete("k", "other").await.unwrap(), CasOutcome::Mismatch);
	assert_eq!(cache.compare_and_delete("k", "v1").await.unwrap(), CasOutcome::Deleted);
	assert_eq!(cache.compare_and_delete("k", "v1").await.unwrap(), CasOutcome::Missing);
}

#[tokio::test]
async fn test_concurrent_compare_and_delete_has_one_winner() {
	let cache = Arc::new(MemoryCache::new());
	cache.set("k", "v", None).await.unwrap();

	let mut set = tokio::task::JoinSet::new();
	for _ in 0..16 {
		let cache = Arc::clone(&cache);
		set.spawn(async move { cache.compare_and_delete("k", "v").await.unwrap() });
	}

	let mut winners = 0;
	while let Some(res) = set.join_next().await {
		if res.unwrap() == CasOutcome::Deleted {
			winners += 1;
		}
	}
	assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_incr_creates_and_counts() {
	let cache = MemoryCache::new();

	assert_eq!(cache.incr("cnt", 1, Some(Duration::from_secs(60))).await.unwrap(), 1);
	assert_eq!(cache.incr("cnt", 1, Some(Duration::from_secs(60))).await.unwrap(), 2);
	assert_eq!(cache.incr("cnt", 3, None).await.unwrap(), 5);
	// TTL set at creation survives later increments
	assert!(cache.ttl_remaining("cnt").await.unwrap().is_some());
}

#[tokio::test]
async fn test_zset_ordering_and_pop_min() {
	let cache = MemoryCache::new();

	cache.zadd("z", "c", 30).await.unwrap();
	cache.zadd("z", "a", 10).await.unwrap();
	cache.zadd("z", "b", 20).await.unwrap();

	assert_eq!(cache.zcard("z").await.unwrap(), 3);
	assert_eq!(cache.zcount("z", 15, 30).await.unwrap(), 2);

	let all = cache.zrange("z", 0, -1).await.unwrap();
	let members: Vec<&str> = all.iter().map(|m| m.member.as_ref()).collect();
	assert_eq!(members, ["a", "b", "c"]);

	let popped = cache.zpop_min("z").await.unwrap().unwrap();
	assert_eq!(popped.member.as_ref(), "a");
	assert_eq!(popped.score, 10);
	assert_eq!(cache.zcard("z").await.unwrap(), 2);
}

#[tokio::test]
async fn test_window_add_and_count_prunes_old_members() {
	let cache = MemoryCache::new();
	let window = Duration::from_millis(200);

	assert_eq!(cache.window_add_and_count("w", "m1", 1_000, window).await.unwrap(), 1);
	assert_eq!(cache.window_add_and_count("w", "m2", 1_100, window).await.unwrap(), 2);
	// m1 (score 1000) falls out of the window ending at 1250
	assert_eq!(cache.window_add_and_count("w", "m3", 1_250, window).await.unwrap(), 2);
	// at 1400 only m3 (score 1250) is young enough
	assert_eq!(cache.window_add_and_count("w", "m4", 1_400, window).await.unwrap(), 2);

	// the key outlives the window itself by the slack margin
	let remaining = cache.ttl_remaining("w").await.unwrap().unwrap();
	assert!(remaining > window);
}

#[tokio::test]
async fn test_list_push_range_trim() {
	let cache = MemoryCache::new();

	for i in 0..5 {
		cache.list_push_back("l", &format!("e{}", i)).await.unwrap();
	}
	assert_eq!(cache.list_len("l").await.unwrap(), 5);

	let head = cache.list_range("l", 0, 2).await.unwrap();
	assert_eq!(head.len(), 3);
	assert_eq!(head[0].as_ref(), "e0");

	cache.list_trim_front("l", 3).await.unwrap();
	let rest = cache.list_range("l", 0, -1).await.unwrap();
	let rest: Vec<&str> = rest.iter().map(|v| v.as_ref()).collect();
	assert_eq!(rest, ["e3", "e4"]);
}

#[tokio::test]
async fn test_sweeper_removes_expired_entries() {
	let cache = Arc::new(MemoryCache::new());
	cache.set("gone", "v", Some(Duration::from_millis(20))).await.unwrap();
	cache.set("stays", "v", None).await.unwrap();

	let handle = cache.spawn_sweeper(Duration::from_millis(30));
	tokio::time::sleep(Duration::from_millis(120)).await;
	handle.abort();

	assert_eq!(cache.len(), 1);
	assert_eq!(cache.get("stays").await.unwrap().as_deref(), Some("v"));
}

// vim: ts=4
