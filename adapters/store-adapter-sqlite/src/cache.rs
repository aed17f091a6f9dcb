//! Durable cache tier over SQLite.
//!
//! Implements the cache adapter trait on the same database as the durable
//! store, so the failover layer can keep serving security-critical state
//! when the primary cache is down. Expiry is stored as unix millis and
//! checked lazily in every query; [`StoreBackedCache::spawn_sweeper`]
//! removes rows nothing reads anymore. Composite operations run as a single
//! statement (`DELETE ... RETURNING`) or inside one transaction, which is
//! what keeps them atomic per key under SQLite's serialized writes.

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, Row};
use std::sync::Arc;
use std::time::Duration;

use crate::utils::{collect_res, inspect, map_res};
use drawbridge::cache_adapter::{CacheAdapter, CasOutcome, ScoredMember};
use drawbridge::prelude::*;
use drawbridge::types::now_millis;

/// Extra margin on a window key's expiry, so the key outlives the last
/// member it still has to count.
const WINDOW_TTL_SLACK_MS: i64 = 1_000;

#[derive(Clone, Debug)]
pub struct StoreBackedCache {
	db: SqlitePool,
}

impl StoreBackedCache {
	pub fn new(db: SqlitePool) -> Self {
		Self { db }
	}

	/// Drop a score-ordered set whose key-level expiry has passed.
	async fn purge_zset_if_expired(&self, key: &str, now: i64) -> ClResult<()> {
		let row = sqlx::query("SELECT expires_at FROM zset_meta WHERE key = ?1")
			.bind(key)
			.fetch_optional(&self.db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		if let Some(row) = row {
			let expires_at: Option<i64> = row.try_get("expires_at").or(Err(Error::DbError))?;
			if expires_at.is_some_and(|at| at <= now) {
				let mut tx = self.db.begin().await.inspect_err(inspect).or(Err(Error::DbError))?;
				sqlx::query("DELETE FROM zset_cache WHERE key = ?1")
					.bind(key)
					.execute(&mut *tx)
					.await
					.inspect_err(inspect)
					.or(Err(Error::DbError))?;
				sqlx::query("DELETE FROM zset_meta WHERE key = ?1")
					.bind(key)
					.execute(&mut *tx)
					.await
					.inspect_err(inspect)
					.or(Err(Error::DbError))?;
				tx.commit().await.inspect_err(inspect).or(Err(Error::DbError))?;
			}
		}
		Ok(())
	}

	/// Spawn a background task that removes expired rows every `interval`.
	pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
		let cache = Arc::clone(self);
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				let now = now_millis();
				let res = sqlx::query("DELETE FROM kv_cache WHERE expires_at IS NOT NULL AND expires_at <= ?1")
					.bind(now)
					.execute(&cache.db)
					.await;
				if let Err(err) = res {
					inspect(&err);
					continue;
				}
				let res = sqlx::query(
					"DELETE FROM zset_cache WHERE key IN
					(SELECT key FROM zset_meta WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
				)
				.bind(now)
				.execute(&cache.db)
				.await;
				if let Err(err) = res {
					inspect(&err);
					continue;
				}
				let res = sqlx::query("DELETE FROM zset_meta WHERE expires_at IS NOT NULL AND expires_at <= ?1")
					.bind(now)
					.execute(&cache.db)
					.await;
				if let Err(err) = res {
					inspect(&err);
				}
			}
		})
	}
}

#[async_trait]
impl CacheAdapter for StoreBackedCache {
	async fn get(&self, key: &str) -> ClResult<Option<Box<str>>> {
		let row = sqlx::query(
			"SELECT value FROM kv_cache WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
		)
		.bind(key)
		.bind(now_millis())
		.fetch_optional(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		match row {
			Some(row) => {
				let value: String = row.try_get("value").or(Err(Error::DbError))?;
				Ok(Some(value.into_boxed_str()))
			}
			None => Ok(None),
		}
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClResult<()> {
		let expires_at = ttl.map(|ttl| now_millis() + ttl.as_millis() as i64);
		sqlx::query("INSERT OR REPLACE INTO kv_cache (key, value, expires_at) VALUES (?1, ?2, ?3)")
			.bind(key)
			.bind(value)
			.bind(expires_at)
			.execute(&self.db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		Ok(())
	}

	async fn get_del(&self, key: &str) -> ClResult<Option<Box<str>>> {
		let row = sqlx::query(
			"DELETE FROM kv_cache WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
			RETURNING value",
		)
		.bind(key)
		.bind(now_millis())
		.fetch_optional(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		match row {
			Some(row) => {
				let value: String = row.try_get("value").or(Err(Error::DbError))?;
				Ok(Some(value.into_boxed_str()))
			}
			None => Ok(None),
		}
	}

	async fn compare_and_delete(&self, key: &str, expected: &str) -> ClResult<CasOutcome> {
		let now = now_millis();
		let deleted = sqlx::query(
			"DELETE FROM kv_cache WHERE key = ?1 AND value = ?2
				AND (expires_at IS NULL OR expires_at > ?3)
			RETURNING key",
		)
		.bind(key)
		.bind(expected)
		.bind(now)
		.fetch_optional(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		if deleted.is_some() {
			return Ok(CasOutcome::Deleted);
		}

		let exists = sqlx::query(
			"SELECT 1 FROM kv_cache WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
		)
		.bind(key)
		.bind(now)
		.fetch_optional(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		Ok(if exists.is_some() { CasOutcome::Mismatch } else { CasOutcome::Missing })
	}

	async fn delete(&self, key: &str) -> ClResult<bool> {
		let mut tx = self.db.begin().await.inspect_err(inspect).or(Err(Error::DbError))?;

		let mut existed = false;
		for sql in [
			"DELETE FROM kv_cache WHERE key = ?1",
			"DELETE FROM zset_cache WHERE key = ?1",
			"DELETE FROM zset_meta WHERE key = ?1",
			"DELETE FROM list_cache WHERE key = ?1",
		] {
			let res = sqlx::query(sql)
				.bind(key)
				.execute(&mut *tx)
				.await
				.inspect_err(inspect)
				.or(Err(Error::DbError))?;
			existed |= res.rows_affected() > 0;
		}

		tx.commit().await.inspect_err(inspect).or(Err(Error::DbError))?;
		Ok(existed)
	}

	async fn exists(&self, key: &str) -> ClResult<bool> {
		let now = now_millis();
		self.purge_zset_if_expired(key, now).await?;

		let row = sqlx::query(
			"SELECT 1 AS hit FROM kv_cache WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
			UNION SELECT 1 FROM zset_cache WHERE key = ?1
			UNION SELECT 1 FROM list_cache WHERE key = ?1",
		)
		.bind(key)
		.bind(now)
		.fetch_optional(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		Ok(row.is_some())
	}

	async fn ttl_remaining(&self, key: &str) -> ClResult<Option<Duration>> {
		let now = now_millis();

		let row = sqlx::query(
			"SELECT expires_at FROM kv_cache WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
			UNION ALL
			SELECT expires_at FROM zset_meta WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
		)
		.bind(key)
		.bind(now)
		.fetch_optional(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		match row {
			Some(row) => {
				let expires_at: Option<i64> = row.try_get("expires_at").or(Err(Error::DbError))?;
				Ok(expires_at.map(|at| Duration::from_millis(at.saturating_sub(now).max(0) as u64)))
			}
			None => {
				let list = sqlx::query("SELECT 1 FROM list_cache WHERE key = ?1")
					.bind(key)
					.fetch_optional(&self.db)
					.await
					.inspect_err(inspect)
					.or(Err(Error::DbError))?;
				if list.is_some() {
					Ok(None)
				} else {
					Err(Error::NotFound)
				}
			}
		}
	}

	async fn expire(&self, key: &str, ttl: Duration) -> ClResult<bool> {
		let now = now_millis();
		let expires_at = now + ttl.as_millis() as i64;

		let res = sqlx::query(
			"UPDATE kv_cache SET expires_at = ?2
			WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?3)",
		)
		.bind(key)
		.bind(expires_at)
		.bind(now)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		if res.rows_affected() > 0 {
			return Ok(true);
		}

		let members = sqlx::query("SELECT 1 FROM zset_cache WHERE key = ?1")
			.bind(key)
			.fetch_optional(&self.db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		if members.is_some() {
			sqlx::query("INSERT OR REPLACE INTO zset_meta (key, expires_at) VALUES (?1, ?2)")
				.bind(key)
				.bind(expires_at)
				.execute(&self.db)
				.await
				.inspect_err(inspect)
				.or(Err(Error::DbError))?;
			return Ok(true);
		}

		Ok(false)
	}

	async fn incr(&self, key: &str, by: i64, ttl: Option<Duration>) -> ClResult<i64> {
		let now = now_millis();
		let expires_at = ttl.map(|ttl| now + ttl.as_millis() as i64);
		// an expired row not yet swept is treated as absent: the counter
		// restarts and takes the fresh TTL
		let res = sqlx::query(
			"INSERT INTO kv_cache (key, value, expires_at) VALUES (?1, CAST(?2 AS TEXT), ?3)
			ON CONFLICT(key) DO UPDATE SET
				value = CASE WHEN expires_at IS NOT NULL AND expires_at <= ?4
					THEN CAST(?2 AS TEXT)
					ELSE CAST(CAST(value AS INTEGER) + ?2 AS TEXT) END,
				expires_at = CASE WHEN expires_at IS NOT NULL AND expires_at <= ?4
					THEN ?3 ELSE expires_at END
			RETURNING CAST(value AS INTEGER) AS value",
		)
		.bind(key)
		.bind(by)
		.bind(expires_at)
		.bind(now)
		.fetch_one(&self.db)
		.await;

		map_res(res, |row| row.try_get("value"))
	}

	async fn zadd(&self, key: &str, member: &str, score: i64) -> ClResult<()> {
		self.purge_zset_if_expired(key, now_millis()).await?;
		sqlx::query("INSERT OR REPLACE INTO zset_cache (key, member, score) VALUES (?1, ?2, ?3)")
			.bind(key)
			.bind(member)
			.bind(score)
			.execute(&self.db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		Ok(())
	}

	async fn zrem(&self, key: &str, member: &str) -> ClResult<bool> {
		let res = sqlx::query("DELETE FROM zset_cache WHERE key = ?1 AND member = ?2")
			.bind(key)
			.bind(member)
			.execute(&self.db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		Ok(res.rows_affected() > 0)
	}

	async fn zcard(&self, key: &str) -> ClResult<u64> {
		self.purge_zset_if_expired(key, now_millis()).await?;
		let res = sqlx::query("SELECT COUNT(*) AS cnt FROM zset_cache WHERE key = ?1")
			.bind(key)
			.fetch_one(&self.db)
			.await;

		map_res(res, |row| row.try_get::<i64, _>("cnt").map(|n| n as u64))
	}

	async fn zcount(&self, key: &str, min: i64, max: i64) -> ClResult<u64> {
		self.purge_zset_if_expired(key, now_millis()).await?;
		let res = sqlx::query(
			"SELECT COUNT(*) AS cnt FROM zset_cache WHERE key = ?1 AND score >= ?2 AND score <= ?3",
		)
		.bind(key)
		.bind(min)
		.bind(max)
		.fetch_one(&self.db)
		.await;

		map_res(res, |row| row.try_get::<i64, _>("cnt").map(|n| n as u64))
	}

	async fn zrange(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<ScoredMember>> {
		self.purge_zset_if_expired(key, now_millis()).await?;
		let limit = if stop < 0 { -1 } else { stop - start + 1 };
		let rows = sqlx::query(
			"SELECT member, score FROM zset_cache WHERE key = ?1
			ORDER BY score, member LIMIT ?2 OFFSET ?3",
		)
		.bind(key)
		.bind(limit)
		.bind(start.max(0))
		.fetch_all(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		collect_res(rows.iter().map(|row| {
			Ok(ScoredMember {
				member: row.try_get::<String, _>("member")?.into_boxed_str(),
				score: row.try_get("score")?,
			})
		}))
	}

	async fn zpop_min(&self, key: &str) -> ClResult<Option<ScoredMember>> {
		self.purge_zset_if_expired(key, now_millis()).await?;
		let row = sqlx::query(
			"DELETE FROM zset_cache WHERE rowid =
				(SELECT rowid FROM zset_cache WHERE key = ?1 ORDER BY score, member LIMIT 1)
			RETURNING member, score",
		)
		.bind(key)
		.fetch_optional(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		match row {
			Some(row) => Ok(Some(ScoredMember {
				member: row
					.try_get::<String, _>("member")
					.or(Err(Error::DbError))?
					.into_boxed_str(),
				score: row.try_get("score").or(Err(Error::DbError))?,
			})),
			None => Ok(None),
		}
	}

	async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> ClResult<u64> {
		let res = sqlx::query(
			"DELETE FROM zset_cache WHERE key = ?1 AND score >= ?2 AND score <= ?3",
		)
		.bind(key)
		.bind(min)
		.bind(max)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		Ok(res.rows_affected())
	}

	async fn window_add_and_count(
		&self,
		key: &str,
		member: &str,
		now: i64,
		window: Duration,
	) -> ClResult<u64> {
		let cutoff = now - window.as_millis() as i64;
		let expires_at = now + window.as_millis() as i64 + WINDOW_TTL_SLACK_MS;

		let mut tx = self.db.begin().await.inspect_err(inspect).or(Err(Error::DbError))?;

		sqlx::query("DELETE FROM zset_cache WHERE key = ?1 AND score <= ?2")
			.bind(key)
			.bind(cutoff)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		sqlx::query("INSERT OR REPLACE INTO zset_cache (key, member, score) VALUES (?1, ?2, ?3)")
			.bind(key)
			.bind(member)
			.bind(now)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		sqlx::query("INSERT OR REPLACE INTO zset_meta (key, expires_at) VALUES (?1, ?2)")
			.bind(key)
			.bind(expires_at)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		let row = sqlx::query("SELECT COUNT(*) AS cnt FROM zset_cache WHERE key = ?1")
			.bind(key)
			.fetch_one(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		let count: i64 = row.try_get("cnt").or(Err(Error::DbError))?;

		tx.commit().await.inspect_err(inspect).or(Err(Error::DbError))?;
		Ok(count as u64)
	}

	async fn list_push_back(&self, key: &str, value: &str) -> ClResult<u64> {
		let mut tx = self.db.begin().await.inspect_err(inspect).or(Err(Error::DbError))?;

		sqlx::query("INSERT INTO list_cache (key, value) VALUES (?1, ?2)")
			.bind(key)
			.bind(value)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		let row = sqlx::query("SELECT COUNT(*) AS cnt FROM list_cache WHERE key = ?1")
			.bind(key)
			.fetch_one(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		let len: i64 = row.try_get("cnt").or(Err(Error::DbError))?;

		tx.commit().await.inspect_err(inspect).or(Err(Error::DbError))?;
		Ok(len as u64)
	}

	async fn list_range(&self, key: &str, start: i64, stop: i64) -> ClResult<Vec<Box<str>>> {
		let limit = if stop < 0 { -1 } else { stop - start + 1 };
		let rows = sqlx::query(
			"SELECT value FROM list_cache WHERE key = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
		)
		.bind(key)
		.bind(limit)
		.bind(start.max(0))
		.fetch_all(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		collect_res(
			rows.iter()
				.map(|row| Ok(row.try_get::<String, _>("value")?.into_boxed_str())),
		)
	}

	async fn list_trim_front(&self, key: &str, count: u64) -> ClResult<()> {
		sqlx::query(
			"DELETE FROM list_cache WHERE id IN
			(SELECT id FROM list_cache WHERE key = ?1 ORDER BY id LIMIT ?2)",
		)
		.bind(key)
		.bind(count as i64)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		Ok(())
	}

	async fn list_len(&self, key: &str) -> ClResult<u64> {
		let res = sqlx::query("SELECT COUNT(*) AS cnt FROM list_cache WHERE key = ?1")
			.bind(key)
			.fetch_one(&self.db)
			.await;

		map_res(res, |row| row.try_get::<i64, _>("cnt").map(|n| n as u64))
	}

	async fn ping(&self) -> ClResult<()> {
		sqlx::query("SELECT 1")
			.execute(&self.db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		Ok(())
	}
}

// vim: ts=4
