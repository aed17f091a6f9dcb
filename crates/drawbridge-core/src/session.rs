//! Session and refresh-token management.
//!
//! Raw tokens never reach the cache; every key and index uses the SHA-256
//! hash. Per-user state is spread over a few keys:
//!
//! - `session:user:{u}`: score-ordered set of session token hashes, score
//!   is the creation time (oldest first).
//! - `session:meta:{u}:{hash}`: session metadata JSON, TTL = session TTL.
//! - `session:device:{u}:{device}`: device fingerprint index, pointing at
//!   the one session allowed per (user, device).
//! - `session:revoked:{u}:{hash}`: revocation notice a kicked-out client
//!   can fetch to learn why.
//! - `refresh:token:{u}:{hash}` and `refresh:user:{u}`: refresh-token
//!   records and the per-user index.
//!
//! Multi-step writes run under an in-process per-user lock, so concurrent
//! logins of the same user cannot interleave their read-check-write
//! cycles. Different users never contend.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::device::DeviceFingerprint;
use crate::prelude::*;
use drawbridge_types::cache_adapter::CacheAdapter;
use drawbridge_types::utils::{cache_key, hash_token, random_id};

const USER_AGENT_MAX: usize = 200;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionInfo {
	#[serde(rename = "createdAt")]
	pub created_at: Timestamp,
	#[serde(rename = "lastSeenAt")]
	pub last_seen_at: Timestamp,
	pub ip: Box<str>,
	#[serde(rename = "deviceHash")]
	pub device_hash: Box<str>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
	/// Replaced by a newer login from the same device.
	NewDeviceLogin,
	/// Evicted because the concurrent-session cap was reached.
	CapEvicted,
	Logout,
	Admin,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RevocationNotice {
	pub reason: RevocationReason,
	pub at: Timestamp,
	#[serde(rename = "byIp")]
	pub by_ip: Option<Box<str>>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RefreshInfo {
	#[serde(rename = "deviceHash")]
	pub device_hash: Box<str>,
	#[serde(rename = "createdAt")]
	pub created_at: Timestamp,
	pub ip: Box<str>,
	#[serde(rename = "userAgent")]
	pub user_agent: Option<Box<str>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RefreshCheck {
	Valid,
	NotFound,
	DeviceMismatch,
}

#[derive(Debug)]
pub struct SessionManager {
	cache: Arc<dyn CacheAdapter>,
	config: SessionConfig,
	locks: Mutex<HashMap<u32, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
	pub fn new(cache: Arc<dyn CacheAdapter>, config: SessionConfig) -> Self {
		Self { cache, config, locks: Mutex::new(HashMap::new()) }
	}

	fn user_lock(&self, user: UserId) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.locks.lock();
		if locks.len() > 1024 {
			locks.retain(|_, lock| Arc::strong_count(lock) > 1);
		}
		locks.entry(user.0).or_default().clone()
	}

	fn set_key(user: UserId) -> String {
		cache_key("session", "user", &user.to_string())
	}

	fn meta_key(user: UserId, token_hash: &str) -> String {
		format!("session:meta:{}:{}", user, token_hash)
	}

	fn device_key(user: UserId, device_hash: &str) -> String {
		format!("session:device:{}:{}", user, device_hash)
	}

	fn revoked_key(user: UserId, token_hash: &str) -> String {
		format!("session:revoked:{}:{}", user, token_hash)
	}

	fn refresh_key(user: UserId, token_hash: &str) -> String {
		format!("refresh:token:{}:{}", user, token_hash)
	}

	fn refresh_index_key(user: UserId) -> String {
		cache_key("refresh", "user", &user.to_string())
	}

	// Sessions
	//**********

	/// Register a new session. A previous session from the same device is
	/// replaced; above the concurrent cap the oldest session is evicted.
	/// Both get a revocation notice that names the reason.
	pub async fn store_session(
		&self,
		user: UserId,
		token: &str,
		device_hash: &str,
		ip: &str,
	) -> ClResult<()> {
		let token_hash = hash_token(token);
		let lock = self.user_lock(user);
		let _guard = lock.lock().await;

		let ttl = self.config.session_ttl();
		let created_at = now();

		// one session per (user, device)
		let device_key = Self::device_key(user, device_hash);
		if let Some(old_hash) = self.cache.get(&device_key).await? {
			if old_hash != token_hash {
				self.revoke_session_locked(
					user,
					&old_hash,
					RevocationReason::NewDeviceLogin,
					Some(ip),
				)
				.await?;
			}
		}

		let set_key = Self::set_key(user);
		self.cache.zadd(&set_key, &token_hash, created_at.0).await?;

		let info = SessionInfo {
			created_at,
			last_seen_at: created_at,
			ip: ip.into(),
			device_hash: device_hash.into(),
		};
		self.cache
			.set(&Self::meta_key(user, &token_hash), &serde_json::to_string(&info)?, Some(ttl))
			.await?;
		self.cache.set(&device_key, &token_hash, Some(ttl)).await?;

		// concurrent-session cap, oldest first; the session just stored is
		// never the victim even when scores tie
		while self.cache.zcard(&set_key).await? > u64::from(self.config.max_concurrent_sessions) {
			let oldest = self.cache.zrange(&set_key, 0, 1).await?;
			let Some(victim) = oldest.iter().find(|m| m.member != token_hash) else {
				break;
			};
			info!("Session cap reached for user {}, evicting oldest session", user);
			self.cache.zrem(&set_key, &victim.member).await?;
			self.revoke_evicted_locked(user, &victim.member, RevocationReason::CapEvicted, Some(ip))
				.await?;
		}

		self.cache.expire(&set_key, ttl).await?;
		Ok(())
	}

	/// Check a session and stamp its activity time, keeping the remaining
	/// TTL untouched. Runs under the user lock so the touch cannot
	/// resurrect a session a concurrent revocation just tore down.
	pub async fn is_session_valid(&self, user: UserId, token: &str) -> ClResult<bool> {
		let token_hash = hash_token(token);
		let lock = self.user_lock(user);
		let _guard = lock.lock().await;

		let key = Self::meta_key(user, &token_hash);
		let Some(json) = self.cache.get(&key).await? else {
			return Ok(false);
		};

		if let Ok(mut info) = serde_json::from_str::<SessionInfo>(&json) {
			info.last_seen_at = now();
			let ttl = match self.cache.ttl_remaining(&key).await {
				Ok(ttl) => ttl,
				// expired between the get and here
				Err(Error::NotFound) => return Ok(false),
				Err(err) => return Err(err),
			};
			self.cache.set(&key, &serde_json::to_string(&info)?, ttl).await?;
		}
		Ok(true)
	}

	/// Stored metadata of a live session, if any.
	pub async fn session_info(&self, user: UserId, token: &str) -> ClResult<Option<SessionInfo>> {
		let token_hash = hash_token(token);
		match self.cache.get(&Self::meta_key(user, &token_hash)).await? {
			Some(json) => Ok(Some(serde_json::from_str(&json)?)),
			None => Ok(None),
		}
	}

	pub async fn delete_session(&self, user: UserId, token: &str, by_ip: Option<&str>) -> ClResult<()> {
		let token_hash = hash_token(token);
		let lock = self.user_lock(user);
		let _guard = lock.lock().await;

		let in_set = self.cache.zrem(&Self::set_key(user), &token_hash).await?;
		// a token that never named a session leaves no notice behind
		if !in_set && !self.cache.exists(&Self::meta_key(user, &token_hash)).await? {
			return Ok(());
		}
		self.revoke_evicted_locked(user, &token_hash, RevocationReason::Logout, by_ip).await
	}

	/// Revocation notice left behind for a kicked-out session, if any.
	pub async fn check_revocation(
		&self,
		user: UserId,
		token: &str,
	) -> ClResult<Option<RevocationNotice>> {
		let token_hash = hash_token(token);
		match self.cache.get(&Self::revoked_key(user, &token_hash)).await? {
			Some(json) => Ok(Some(serde_json::from_str(&json)?)),
			None => Ok(None),
		}
	}

	/// Clear the notice once the client has seen it.
	pub async fn acknowledge_revocation(&self, user: UserId, token: &str) -> ClResult<()> {
		let token_hash = hash_token(token);
		self.cache.delete(&Self::revoked_key(user, &token_hash)).await?;
		Ok(())
	}

	/// Tear down a session still present in the session set.
	async fn revoke_session_locked(
		&self,
		user: UserId,
		token_hash: &str,
		reason: RevocationReason,
		by_ip: Option<&str>,
	) -> ClResult<()> {
		self.cache.zrem(&Self::set_key(user), token_hash).await?;
		self.revoke_evicted_locked(user, token_hash, reason, by_ip).await
	}

	/// Tear down a session already removed from the session set: drop its
	/// metadata and device index and leave the revocation notice.
	async fn revoke_evicted_locked(
		&self,
		user: UserId,
		token_hash: &str,
		reason: RevocationReason,
		by_ip: Option<&str>,
	) -> ClResult<()> {
		if let Some(json) = self.cache.get_del(&Self::meta_key(user, token_hash)).await? {
			if let Ok(info) = serde_json::from_str::<SessionInfo>(&json) {
				// only drop the index if it still points at this session
				self.cache
					.compare_and_delete(&Self::device_key(user, &info.device_hash), token_hash)
					.await?;
			}
		}

		let notice = RevocationNotice { reason, at: now(), by_ip: by_ip.map(Into::into) };
		self.cache
			.set(
				&Self::revoked_key(user, token_hash),
				&serde_json::to_string(&notice)?,
				Some(self.config.session_ttl()),
			)
			.await?;
		Ok(())
	}

	// Refresh tokens
	//****************

	pub async fn store_refresh_token(
		&self,
		user: UserId,
		token: &str,
		device_hash: &str,
		ip: &str,
		user_agent: Option<&str>,
	) -> ClResult<()> {
		let lock = self.user_lock(user);
		let _guard = lock.lock().await;
		self.store_refresh_locked(user, token, device_hash, ip, user_agent).await
	}

	/// Check a refresh token and its device binding. In strict mode a
	/// fingerprint mismatch rejects; otherwise it is logged and tolerated.
	pub async fn validate_refresh_token(
		&self,
		user: UserId,
		token: &str,
		fingerprint: &DeviceFingerprint,
	) -> ClResult<RefreshCheck> {
		let token_hash = hash_token(token);
		let Some(json) = self.cache.get(&Self::refresh_key(user, &token_hash)).await? else {
			return Ok(RefreshCheck::NotFound);
		};
		let info: RefreshInfo = serde_json::from_str(&json)?;

		if info.device_hash == fingerprint.hash {
			return Ok(RefreshCheck::Valid);
		}

		if self.config.strict_device_check {
			warn!("Refresh token device mismatch for user {}, rejecting", user);
			Ok(RefreshCheck::DeviceMismatch)
		} else {
			warn!(
				"Refresh token device mismatch for user {} (absent headers: {:?}), tolerated",
				user, fingerprint.absent
			);
			Ok(RefreshCheck::Valid)
		}
	}

	/// Rotate a refresh token: revoke the old one and issue a fresh token
	/// bound to the same device, in one locked step, so a replayed old
	/// token cannot survive a completed rotation.
	pub async fn rotate_refresh_token(
		&self,
		user: UserId,
		old_token: &str,
		fingerprint: &DeviceFingerprint,
		ip: &str,
		user_agent: Option<&str>,
	) -> ClResult<String> {
		let lock = self.user_lock(user);
		let _guard = lock.lock().await;

		let old_hash = hash_token(old_token);
		let Some(json) = self.cache.get(&Self::refresh_key(user, &old_hash)).await? else {
			return Err(Error::NotFound);
		};
		let info: RefreshInfo = serde_json::from_str(&json)?;
		if info.device_hash != fingerprint.hash {
			if self.config.strict_device_check {
				warn!("Refresh rotation device mismatch for user {}, rejecting", user);
				return Err(Error::DeviceMismatch);
			}
			warn!(
				"Refresh rotation device mismatch for user {} (absent headers: {:?}), tolerated",
				user, fingerprint.absent
			);
		}

		self.revoke_refresh_locked(user, &old_hash).await?;
		let new_token = random_id()?;
		self.store_refresh_locked(user, &new_token, &info.device_hash, ip, user_agent).await?;
		Ok(new_token)
	}

	pub async fn revoke_refresh_token(&self, user: UserId, token: &str) -> ClResult<bool> {
		let lock = self.user_lock(user);
		let _guard = lock.lock().await;
		self.revoke_refresh_locked(user, &hash_token(token)).await
	}

	/// Revoke every refresh token of a user, returning how many.
	pub async fn revoke_all_refresh_tokens(&self, user: UserId) -> ClResult<u32> {
		let lock = self.user_lock(user);
		let _guard = lock.lock().await;

		let index_key = Self::refresh_index_key(user);
		let members = self.cache.zrange(&index_key, 0, -1).await?;
		let mut revoked = 0;
		for item in &members {
			if self.cache.delete(&Self::refresh_key(user, &item.member)).await? {
				revoked += 1;
			}
		}
		self.cache.delete(&index_key).await?;

		info!("Revoked {} refresh tokens for user {}", revoked, user);
		Ok(revoked)
	}

	async fn store_refresh_locked(
		&self,
		user: UserId,
		token: &str,
		device_hash: &str,
		ip: &str,
		user_agent: Option<&str>,
	) -> ClResult<()> {
		let token_hash = hash_token(token);
		let ttl = self.config.refresh_ttl();
		let created_at = now();

		let user_agent = user_agent.map(|ua| {
			let end = ua.char_indices().map(|(i, _)| i).nth(USER_AGENT_MAX).unwrap_or(ua.len());
			Box::from(&ua[..end])
		});
		let info = RefreshInfo { device_hash: device_hash.into(), created_at, ip: ip.into(), user_agent };

		self.cache
			.set(&Self::refresh_key(user, &token_hash), &serde_json::to_string(&info)?, Some(ttl))
			.await?;

		let index_key = Self::refresh_index_key(user);
		self.cache.zadd(&index_key, &token_hash, created_at.0).await?;
		self.cache.expire(&index_key, ttl).await?;
		Ok(())
	}

	async fn revoke_refresh_locked(&self, user: UserId, token_hash: &str) -> ClResult<bool> {
		self.cache.zrem(&Self::refresh_index_key(user), token_hash).await?;
		self.cache.delete(&Self::refresh_key(user, token_hash)).await
	}
}


// vim: ts=4
