//! SQLite-backed durable store adapter.
//!
//! `StoreSqlite` implements the durable side of the layer: account lookup,
//! the IP whitelist source, and idempotent usage-event appends. The same
//! database also hosts the tables behind [`StoreBackedCache`], the durable
//! cache tier used when the primary cache is down.

mod cache;
mod schema;
mod utils;

pub use cache::StoreBackedCache;

use async_trait::async_trait;
use sqlx::{
	sqlite::{self, SqlitePool},
	Row,
};
use std::path::Path;

use crate::utils::{collect_res, inspect, map_res};
use drawbridge::{
	prelude::*,
	store_adapter::{Organization, StoreAdapter, UsageEvent, User, WhitelistEntry},
};

#[derive(Debug)]
pub struct StoreSqlite {
	db: SqlitePool,
}

impl StoreSqlite {
	pub async fn new(path: impl AsRef<Path>) -> ClResult<Self> {
		let opts = sqlite::SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

		schema::init_db(&db).await.inspect_err(inspect).or(Err(Error::DbError))?;

		Ok(Self { db })
	}

	/// The durable cache tier sharing this adapter's database.
	pub fn cache(&self) -> StoreBackedCache {
		StoreBackedCache::new(self.db.clone())
	}

	pub async fn create_user(&self, user: &User) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO users (user_id, phone, is_active, org_id, created_at)
			VALUES (?1, ?2, ?3, ?4, ?5)",
		)
		.bind(user.user_id.0)
		.bind(user.phone.as_deref())
		.bind(user.is_active)
		.bind(user.org_id.map(|o| o.0))
		.bind(user.created_at.0)
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		Ok(())
	}

	pub async fn create_organization(&self, org: &Organization) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO organizations (org_id, name, is_active, expires_at)
			VALUES (?1, ?2, ?3, ?4)",
		)
		.bind(org.org_id.0)
		.bind(org.name.as_ref())
		.bind(org.is_active)
		.bind(org.expires_at.map(|t| t.0))
		.execute(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;
		Ok(())
	}

	pub async fn add_whitelist_entry(&self, org_id: OrgId, spec: &str) -> ClResult<u32> {
		let res = sqlx::query(
			"INSERT INTO whitelist_entries (org_id, spec) VALUES (?1, ?2) RETURNING entry_id",
		)
		.bind(org_id.0)
		.bind(spec)
		.fetch_one(&self.db)
		.await;

		map_res(res, |row| row.try_get::<u32, _>("entry_id"))
	}

	pub async fn set_whitelist_entry_active(&self, entry_id: u32, active: bool) -> ClResult<()> {
		sqlx::query("UPDATE whitelist_entries SET is_active = ?2 WHERE entry_id = ?1")
			.bind(entry_id)
			.bind(active)
			.execute(&self.db)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;
		Ok(())
	}

	/// Total number of stored usage events, for diagnostics and tests.
	pub async fn count_usage_events(&self) -> ClResult<u64> {
		let res = sqlx::query("SELECT COUNT(*) AS cnt FROM usage_events")
			.fetch_one(&self.db)
			.await;

		map_res(res, |row| row.try_get::<i64, _>("cnt").map(|n| n as u64))
	}

	/// Sum of in/out tokens recorded for a user.
	pub async fn usage_totals(&self, user_id: UserId) -> ClResult<(i64, i64)> {
		let res = sqlx::query(
			"SELECT COALESCE(SUM(tokens_in), 0) AS t_in, COALESCE(SUM(tokens_out), 0) AS t_out
			FROM usage_events WHERE user_id = ?1",
		)
		.bind(user_id.0)
		.fetch_one(&self.db)
		.await;

		map_res(res, |row| {
			Ok((row.try_get::<i64, _>("t_in")?, row.try_get::<i64, _>("t_out")?))
		})
	}

	/// Sum of in/out tokens recorded for an organization.
	pub async fn org_usage_totals(&self, org_id: OrgId) -> ClResult<(i64, i64)> {
		let res = sqlx::query(
			"SELECT COALESCE(SUM(tokens_in), 0) AS t_in, COALESCE(SUM(tokens_out), 0) AS t_out
			FROM usage_events WHERE org_id = ?1",
		)
		.bind(org_id.0)
		.fetch_one(&self.db)
		.await;

		map_res(res, |row| {
			Ok((row.try_get::<i64, _>("t_in")?, row.try_get::<i64, _>("t_out")?))
		})
	}
}

#[async_trait]
impl StoreAdapter for StoreSqlite {
	async fn read_user(&self, user_id: UserId) -> ClResult<User> {
		let res = sqlx::query(
			"SELECT user_id, phone, is_active, org_id, created_at FROM users WHERE user_id = ?1",
		)
		.bind(user_id.0)
		.fetch_one(&self.db)
		.await;

		map_res(res, |row| {
			Ok(User {
				user_id: UserId(row.try_get("user_id")?),
				phone: row.try_get::<Option<String>, _>("phone")?.map(String::into_boxed_str),
				is_active: row.try_get("is_active")?,
				org_id: row.try_get::<Option<u32>, _>("org_id")?.map(OrgId),
				created_at: Timestamp(row.try_get("created_at")?),
			})
		})
	}

	async fn read_organization(&self, org_id: OrgId) -> ClResult<Organization> {
		let res = sqlx::query(
			"SELECT org_id, name, is_active, expires_at FROM organizations WHERE org_id = ?1",
		)
		.bind(org_id.0)
		.fetch_one(&self.db)
		.await;

		map_res(res, |row| {
			Ok(Organization {
				org_id: OrgId(row.try_get("org_id")?),
				name: row.try_get::<String, _>("name")?.into_boxed_str(),
				is_active: row.try_get("is_active")?,
				expires_at: row.try_get::<Option<i64>, _>("expires_at")?.map(Timestamp),
			})
		})
	}

	async fn list_whitelist_entries(&self) -> ClResult<Vec<WhitelistEntry>> {
		let rows = sqlx::query(
			"SELECT w.entry_id, w.org_id, o.name, w.spec
			FROM whitelist_entries w
			JOIN organizations o ON o.org_id = w.org_id
			WHERE w.is_active AND o.is_active
				AND (o.expires_at IS NULL OR o.expires_at > ?1)
			ORDER BY w.entry_id",
		)
		.bind(now().0)
		.fetch_all(&self.db)
		.await
		.inspect_err(inspect)
		.or(Err(Error::DbError))?;

		collect_res(rows.iter().map(|row| {
			Ok(WhitelistEntry {
				entry_id: row.try_get("entry_id")?,
				org_id: OrgId(row.try_get("org_id")?),
				org_name: row.try_get::<String, _>("name")?.into_boxed_str(),
				spec: row.try_get::<String, _>("spec")?.into_boxed_str(),
			})
		}))
	}

	async fn append_usage_events(&self, events: &[UsageEvent]) -> ClResult<u32> {
		let mut tx = self.db.begin().await.inspect_err(inspect).or(Err(Error::DbError))?;

		let mut inserted = 0;
		for event in events {
			let res = sqlx::query(
				"INSERT OR IGNORE INTO usage_events
				(event_id, user_id, org_id, kind, tokens_in, tokens_out, model, at)
				VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
			)
			.bind(event.event_id.as_ref())
			.bind(event.user_id.0)
			.bind(event.org_id.map(|o| o.0))
			.bind(event.kind.as_ref())
			.bind(event.tokens_in)
			.bind(event.tokens_out)
			.bind(event.model.as_deref())
			.bind(event.at.0)
			.execute(&mut *tx)
			.await
			.inspect_err(inspect)
			.or(Err(Error::DbError))?;

			inserted += res.rows_affected() as u32;
		}

		tx.commit().await.inspect_err(inspect).or(Err(Error::DbError))?;
		Ok(inserted)
	}
}

// vim: ts=4
