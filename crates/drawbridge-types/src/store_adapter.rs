//! Adapter trait for the durable store backing the cache layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::prelude::*;

/// A user account, as far as this layer needs to know it.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
	#[serde(rename = "userId")]
	pub user_id: UserId,
	pub phone: Option<Box<str>>,
	#[serde(rename = "isActive")]
	pub is_active: bool,
	#[serde(rename = "orgId")]
	pub org_id: Option<OrgId>,
	#[serde(rename = "createdAt")]
	pub created_at: Timestamp,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Organization {
	#[serde(rename = "orgId")]
	pub org_id: OrgId,
	pub name: Box<str>,
	#[serde(rename = "isActive")]
	pub is_active: bool,
	#[serde(rename = "expiresAt")]
	pub expires_at: Option<Timestamp>,
}

/// One row of the IP whitelist. `spec` is the raw address specification:
/// an exact address (`10.0.0.1`), a CIDR block (`10.0.0.0/24`) or an
/// inclusive range (`10.0.0.10-10.0.0.20`).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WhitelistEntry {
	#[serde(rename = "entryId")]
	pub entry_id: u32,
	#[serde(rename = "orgId")]
	pub org_id: OrgId,
	#[serde(rename = "orgName")]
	pub org_name: Box<str>,
	pub spec: Box<str>,
}

/// A usage accounting event. `event_id` is globally unique so a durable
/// append can be replayed without double counting.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UsageEvent {
	#[serde(rename = "eventId")]
	pub event_id: Box<str>,
	#[serde(rename = "userId")]
	pub user_id: UserId,
	#[serde(rename = "orgId")]
	pub org_id: Option<OrgId>,
	pub kind: Box<str>,
	#[serde(rename = "tokensIn")]
	pub tokens_in: i64,
	#[serde(rename = "tokensOut")]
	pub tokens_out: i64,
	pub model: Option<Box<str>>,
	pub at: Timestamp,
}

#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	async fn read_user(&self, user_id: UserId) -> ClResult<User>;

	async fn read_organization(&self, org_id: OrgId) -> ClResult<Organization>;

	/// Whitelist entries that are active and belong to an active, unexpired
	/// organization. Malformed `spec` strings are returned as stored; the
	/// cache layer decides what to skip.
	async fn list_whitelist_entries(&self) -> ClResult<Vec<WhitelistEntry>>;

	/// Append usage events, ignoring events whose `event_id` was already
	/// stored. Returns how many rows were actually inserted.
	async fn append_usage_events(&self, events: &[UsageEvent]) -> ClResult<u32>;
}

// vim: ts=4
