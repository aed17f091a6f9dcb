//! Read-through IP whitelist.
//!
//! Whitelist entries are loaded from the durable store, parsed into an
//! immutable lookup index and swapped in atomically, so checks never see a
//! half-built index. Until the first successful load every check denies:
//! an unreachable store must not open the door.
//!
//! A lookup tries exact addresses first, then CIDR blocks, then inclusive
//! ranges, and returns the granting organization.

use ipnet::IpNet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::WhitelistConfig;
use crate::prelude::*;
use drawbridge_types::store_adapter::{StoreAdapter, WhitelistEntry};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrgGrant {
	pub org_id: OrgId,
	pub org_name: Box<str>,
}

#[derive(Debug, Default)]
struct WhitelistIndex {
	exact: HashMap<IpAddr, OrgGrant>,
	cidrs: Vec<(IpNet, OrgGrant)>,
	ranges: Vec<(IpAddr, IpAddr, OrgGrant)>,
}

impl WhitelistIndex {
	fn from_entries(entries: &[WhitelistEntry]) -> Self {
		let mut index = WhitelistIndex::default();

		for entry in entries {
			let grant = OrgGrant { org_id: entry.org_id, org_name: entry.org_name.clone() };
			let spec = entry.spec.trim();

			if spec.contains('/') {
				match spec.parse::<IpNet>() {
					Ok(net) => index.cidrs.push((net, grant)),
					Err(err) => {
						warn!("Skipping whitelist entry {} ({:?}): {}", entry.entry_id, spec, err);
					}
				}
			} else if let Some((start, end)) = spec.split_once('-') {
				match (start.trim().parse::<IpAddr>(), end.trim().parse::<IpAddr>()) {
					(Ok(start), Ok(end))
						if start.is_ipv4() == end.is_ipv4() && range_le(start, end) =>
					{
						index.ranges.push((start, end, grant));
					}
					_ => {
						warn!("Skipping whitelist entry {} ({:?}): bad range", entry.entry_id, spec);
					}
				}
			} else {
				match spec.parse::<IpAddr>() {
					Ok(addr) => {
						index.exact.insert(addr, grant);
					}
					Err(err) => {
						warn!("Skipping whitelist entry {} ({:?}): {}", entry.entry_id, spec, err);
					}
				}
			}
		}

		index
	}

	fn len(&self) -> usize {
		self.exact.len() + self.cidrs.len() + self.ranges.len()
	}

	fn check(&self, addr: IpAddr) -> Option<&OrgGrant> {
		if let Some(grant) = self.exact.get(&addr) {
			return Some(grant);
		}
		if let Some((_, grant)) = self.cidrs.iter().find(|(net, _)| net.contains(&addr)) {
			return Some(grant);
		}
		self.ranges
			.iter()
			.find(|(start, end, _)| range_le(*start, addr) && range_le(addr, *end))
			.map(|(_, _, grant)| grant)
	}
}

fn range_le(a: IpAddr, b: IpAddr) -> bool {
	match (a, b) {
		(IpAddr::V4(a), IpAddr::V4(b)) => u32::from(a) <= u32::from(b),
		(IpAddr::V6(a), IpAddr::V6(b)) => u128::from(a) <= u128::from(b),
		_ => false,
	}
}

#[derive(Debug)]
pub struct WhitelistCache {
	store: Arc<dyn StoreAdapter>,
	index: RwLock<Option<Arc<WhitelistIndex>>>,
	config: WhitelistConfig,
}

impl WhitelistCache {
	pub fn new(store: Arc<dyn StoreAdapter>, config: WhitelistConfig) -> Self {
		Self { store, index: RwLock::new(None), config }
	}

	/// Blocking initial load at startup. Checks deny until this (or a later
	/// refresh) succeeds once.
	pub async fn initialize(&self) -> ClResult<()> {
		self.refresh().await
	}

	/// Build a fresh index from the store and swap it in. On failure the
	/// previous index (if any) stays in place.
	pub async fn refresh(&self) -> ClResult<()> {
		let entries = self.store.list_whitelist_entries().await?;
		let index = Arc::new(WhitelistIndex::from_entries(&entries));
		info!("Whitelist refreshed: {} entries, {} usable", entries.len(), index.len());
		*self.index.write() = Some(index);
		Ok(())
	}

	/// Force the next checks onto fresh data, after an admin edit.
	pub async fn invalidate(&self) -> ClResult<()> {
		self.refresh().await
	}

	/// Look up an address. `None` both for unlisted addresses and while no
	/// index has been loaded yet.
	pub fn check(&self, addr: IpAddr) -> Option<OrgGrant> {
		let guard = self.index.read();
		guard.as_ref().and_then(|index| index.check(addr).cloned())
	}

	pub fn is_loaded(&self) -> bool {
		self.index.read().is_some()
	}

	/// Periodic refresh task. A failed refresh keeps serving the old index.
	pub fn spawn_refresh_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let whitelist = Arc::clone(self);
		let interval = self.config.refresh_interval();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				if let Err(err) = whitelist.refresh().await {
					warn!("Whitelist refresh failed, keeping previous index: {}", err);
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;

	#[derive(Debug, Default)]
	struct FixtureStore {
		entries: Mutex<Vec<WhitelistEntry>>,
		fail: std::sync::atomic::AtomicBool,
	}

	impl FixtureStore {
		fn set(&self, entries: Vec<WhitelistEntry>) {
			*self.entries.lock() = entries;
		}
	}

	#[async_trait::async_trait]
	impl StoreAdapter for FixtureStore {
		async fn read_user(
			&self,
			_user_id: UserId,
		) -> ClResult<drawbridge_types::store_adapter::User> {
			Err(Error::NotFound)
		}

		async fn read_organization(
			&self,
			_org_id: OrgId,
		) -> ClResult<drawbridge_types::store_adapter::Organization> {
			Err(Error::NotFound)
		}

		async fn list_whitelist_entries(&self) -> ClResult<Vec<WhitelistEntry>> {
			if self.fail.load(std::sync::atomic::Ordering::Relaxed) {
				return Err(Error::DbError);
			}
			Ok(self.entries.lock().clone())
		}

		async fn append_usage_events(
			&self,
			_events: &[drawbridge_types::store_adapter::UsageEvent],
		) -> ClResult<u32> {
			Ok(0)
		}
	}

	fn entry(id: u32, org: u32, spec: &str) -> WhitelistEntry {
		WhitelistEntry {
			entry_id: id,
			org_id: OrgId(org),
			org_name: format!("org-{}", org).into(),
			spec: spec.into(),
		}
	}

	fn addr(s: &str) -> IpAddr {
		s.parse().unwrap()
	}

	#[tokio::test]
	async fn test_denies_until_loaded() {
		let store = Arc::new(FixtureStore::default());
		store.set(vec![entry(1, 1, "1.2.3.4")]);
		let whitelist = WhitelistCache::new(store, WhitelistConfig::default());

		assert!(!whitelist.is_loaded());
		assert!(whitelist.check(addr("1.2.3.4")).is_none());

		whitelist.initialize().await.unwrap();
		assert!(whitelist.is_loaded());
		assert!(whitelist.check(addr("1.2.3.4")).is_some());
	}

	#[tokio::test]
	async fn test_exact_cidr_and_range_specs() {
		let store = Arc::new(FixtureStore::default());
		store.set(vec![
			entry(1, 1, "192.0.2.7"),
			entry(2, 2, "10.0.0.0/24"),
			entry(3, 3, "172.16.0.10-172.16.0.20"),
		]);
		let whitelist = WhitelistCache::new(store, WhitelistConfig::default());
		whitelist.refresh().await.unwrap();

		assert_eq!(whitelist.check(addr("192.0.2.7")).unwrap().org_id, OrgId(1));
		assert!(whitelist.check(addr("192.0.2.8")).is_none());

		assert_eq!(whitelist.check(addr("10.0.0.77")).unwrap().org_id, OrgId(2));
		assert!(whitelist.check(addr("10.0.1.5")).is_none());

		assert_eq!(whitelist.check(addr("172.16.0.10")).unwrap().org_id, OrgId(3));
		assert_eq!(whitelist.check(addr("172.16.0.20")).unwrap().org_id, OrgId(3));
		assert!(whitelist.check(addr("172.16.0.21")).is_none());
	}

	#[tokio::test]
	async fn test_malformed_specs_are_skipped() {
		let store = Arc::new(FixtureStore::default());
		store.set(vec![
			entry(1, 1, "not-an-ip"),
			entry(2, 1, "10.0.0.20-10.0.0.10"),
			entry(3, 1, "10.0.0.0/999"),
			entry(4, 2, "192.0.2.1"),
		]);
		let whitelist = WhitelistCache::new(store, WhitelistConfig::default());
		whitelist.refresh().await.unwrap();

		assert!(whitelist.check(addr("192.0.2.1")).is_some());
		assert!(whitelist.check(addr("10.0.0.15")).is_none());
	}

	#[tokio::test]
	async fn test_invalidate_picks_up_changes() {
		let store = Arc::new(FixtureStore::default());
		store.set(vec![entry(1, 1, "1.2.3.4")]);
		let whitelist = WhitelistCache::new(store.clone(), WhitelistConfig::default());
		whitelist.refresh().await.unwrap();
		assert!(whitelist.check(addr("1.2.3.4")).is_some());

		store.set(vec![entry(2, 2, "5.6.7.8")]);
		whitelist.invalidate().await.unwrap();

		assert!(whitelist.check(addr("1.2.3.4")).is_none());
		assert!(whitelist.check(addr("5.6.7.8")).is_some());
	}

	#[tokio::test]
	async fn test_failed_refresh_keeps_old_index() {
		let store = Arc::new(FixtureStore::default());
		store.set(vec![entry(1, 1, "1.2.3.4")]);
		let whitelist = WhitelistCache::new(store.clone(), WhitelistConfig::default());
		whitelist.refresh().await.unwrap();

		store.fail.store(true, std::sync::atomic::Ordering::Relaxed);
		assert!(whitelist.refresh().await.is_err());
		assert!(whitelist.check(addr("1.2.3.4")).is_some());
	}

	#[tokio::test]
	async fn test_empty_whitelist_still_loads() {
		let store = Arc::new(FixtureStore::default());
		let whitelist = WhitelistCache::new(store, WhitelistConfig::default());
		whitelist.refresh().await.unwrap();

		assert!(whitelist.is_loaded());
		assert!(whitelist.check(addr("1.2.3.4")).is_none());
	}

	#[tokio::test]
	async fn test_ipv6_cidr() {
		let store = Arc::new(FixtureStore::default());
		store.set(vec![entry(1, 1, "2001:db8::/32")]);
		let whitelist = WhitelistCache::new(store, WhitelistConfig::default());
		whitelist.refresh().await.unwrap();

		assert!(whitelist.check(addr("2001:db8::1")).is_some());
		assert!(whitelist.check(addr("2001:db9::1")).is_none());
	}
}

// vim: ts=4
