//! Database schema initialization
//!
//! Creates the durable tables plus the cache-tier tables used by
//! `StoreBackedCache` when it serves as the failover target.

use sqlx::SqlitePool;

/// Initialize the database schema with all required tables and indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Accounts
	//**********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS users (
		user_id integer NOT NULL,
		phone text,
		is_active boolean DEFAULT 1,
		org_id integer,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(user_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS organizations (
		org_id integer NOT NULL,
		name text NOT NULL,
		is_active boolean DEFAULT 1,
		expires_at datetime,
		PRIMARY KEY(org_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// IP whitelist
	//**************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS whitelist_entries (
		entry_id integer PRIMARY KEY AUTOINCREMENT,
		org_id integer NOT NULL,
		spec text NOT NULL,			-- exact IP, CIDR block, or 'start-end' range
		is_active boolean DEFAULT 1,
		created_at datetime DEFAULT (unixepoch())
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_whitelist_org ON whitelist_entries(org_id)")
		.execute(&mut *tx)
		.await?;

	// Usage accounting
	//******************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS usage_events (
		event_id text NOT NULL,			-- client generated UUID, dedupe key
		user_id integer NOT NULL,
		org_id integer,
		kind text NOT NULL,
		tokens_in integer DEFAULT 0,
		tokens_out integer DEFAULT 0,
		model text,
		at datetime,
		PRIMARY KEY(event_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_events_user ON usage_events(user_id, at)")
		.execute(&mut *tx)
		.await?;

	// Cache tier
	//************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS kv_cache (
		key text NOT NULL,
		value text NOT NULL,
		expires_at integer,			-- unix millis, NULL = no expiry
		PRIMARY KEY(key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS zset_cache (
		key text NOT NULL,
		member text NOT NULL,
		score integer NOT NULL,
		PRIMARY KEY(key, member)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_zset_cache_score ON zset_cache(key, score)")
		.execute(&mut *tx)
		.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS zset_meta (
		key text NOT NULL,
		expires_at integer,
		PRIMARY KEY(key)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS list_cache (
		id integer PRIMARY KEY AUTOINCREMENT,
		key text NOT NULL,
		value text NOT NULL
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_list_cache_key ON list_cache(key, id)")
		.execute(&mut *tx)
		.await?;

	tx.commit().await?;

	Ok(())
}

// vim: ts=4
