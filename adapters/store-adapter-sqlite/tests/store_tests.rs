use tempfile::TempDir;

use drawbridge::prelude::*;
use drawbridge::store_adapter::{Organization, StoreAdapter, UsageEvent, User};
use drawbridge_store_adapter_sqlite::StoreSqlite;

async fn setup() -> (TempDir, StoreSqlite) {
	let dir = TempDir::new().unwrap();
	let store = StoreSqlite::new(dir.path().join("store.db")).await.unwrap();
	(dir, store)
}

fn usage_event(id: &str, user: u32, org: Option<u32>, tokens_in: i64, tokens_out: i64) -> UsageEvent {
	UsageEvent {
		event_id: id.into(),
		user_id: UserId(user),
		org_id: org.map(OrgId),
		kind: "chat".into(),
		tokens_in,
		tokens_out,
		model: Some("small".into()),
		at: now(),
	}
}

#[tokio::test]
async fn test_user_roundtrip() {
	let (_dir, store) = setup().await;

	let user = User {
		user_id: UserId(42),
		phone: Some("+36701234567".into()),
		is_active: true,
		org_id: Some(OrgId(7)),
		created_at: now(),
	};
	store.create_user(&user).await.unwrap();

	let read = store.read_user(UserId(42)).await.unwrap();
	assert_eq!(read.phone.as_deref(), Some("+36701234567"));
	assert_eq!(read.org_id, Some(OrgId(7)));
	assert!(read.is_active);

	assert!(matches!(store.read_user(UserId(99)).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_organization_roundtrip() {
	let (_dir, store) = setup().await;

	let org = Organization {
		org_id: OrgId(1),
		name: "Acme".into(),
		is_active: true,
		expires_at: None,
	};
	store.create_organization(&org).await.unwrap();

	let read = store.read_organization(OrgId(1)).await.unwrap();
	assert_eq!(read.name.as_ref(), "Acme");
	assert!(read.expires_at.is_none());
}

#[tokio::test]
async fn test_whitelist_listing_filters() {
	let (_dir, store) = setup().await;

	store
		.create_organization(&Organization {
			org_id: OrgId(1),
			name: "Active".into(),
			is_active: true,
			expires_at: None,
		})
		.await
		.unwrap();
	store
		.create_organization(&Organization {
			org_id: OrgId(2),
			name: "Disabled".into(),
			is_active: false,
			expires_at: None,
		})
		.await
		.unwrap();
	store
		.create_organization(&Organization {
			org_id: OrgId(3),
			name: "Expired".into(),
			is_active: true,
			expires_at: Some(Timestamp(now().0 - 3600)),
		})
		.await
		.unwrap();

	let kept = store.add_whitelist_entry(OrgId(1), "10.0.0.0/24").await.unwrap();
	let disabled_entry = store.add_whitelist_entry(OrgId(1), "192.0.2.1").await.unwrap();
	store.add_whitelist_entry(OrgId(2), "10.1.0.0/24").await.unwrap();
	store.add_whitelist_entry(OrgId(3), "10.2.0.0/24").await.unwrap();
	store.set_whitelist_entry_active(disabled_entry, false).await.unwrap();

	let entries = store.list_whitelist_entries().await.unwrap();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].entry_id, kept);
	assert_eq!(entries[0].org_name.as_ref(), "Active");
	assert_eq!(entries[0].spec.as_ref(), "10.0.0.0/24");
}

#[tokio::test]
async fn test_usage_append_is_idempotent() {
	let (_dir, store) = setup().await;

	let batch1: Vec<UsageEvent> =
		(0..100).map(|i| usage_event(&format!("e{}", i), 1, Some(7), 10, 20)).collect();
	let batch2: Vec<UsageEvent> =
		(100..250).map(|i| usage_event(&format!("e{}", i), 1, Some(7), 10, 20)).collect();

	assert_eq!(store.append_usage_events(&batch1).await.unwrap(), 100);
	assert_eq!(store.append_usage_events(&batch2).await.unwrap(), 150);

	// replay of an already delivered batch, as after a crash between the
	// store write and the buffer trim
	assert_eq!(store.append_usage_events(&batch1).await.unwrap(), 0);
	assert_eq!(store.count_usage_events().await.unwrap(), 250);

	let (t_in, t_out) = store.usage_totals(UserId(1)).await.unwrap();
	assert_eq!(t_in, 2_500);
	assert_eq!(t_out, 5_000);
}

#[tokio::test]
async fn test_usage_totals_per_organization() {
	let (_dir, store) = setup().await;

	let events = vec![
		usage_event("a1", 1, Some(7), 100, 200),
		usage_event("a2", 2, Some(7), 50, 60),
		usage_event("b1", 3, Some(8), 10, 10),
		usage_event("c1", 4, None, 999, 999),
	];
	assert_eq!(store.append_usage_events(&events).await.unwrap(), 4);

	assert_eq!(store.org_usage_totals(OrgId(7)).await.unwrap(), (150, 260));
	assert_eq!(store.org_usage_totals(OrgId(8)).await.unwrap(), (10, 10));
	// events with no organization count toward no org
	assert_eq!(store.org_usage_totals(OrgId(9)).await.unwrap(), (0, 0));
}

#[tokio::test]
async fn test_partially_replayed_batch_inserts_only_new() {
	let (_dir, store) = setup().await;

	let batch: Vec<UsageEvent> =
		(0..10).map(|i| usage_event(&format!("e{}", i), 2, None, 1, 1)).collect();
	assert_eq!(store.append_usage_events(&batch[..6]).await.unwrap(), 6);
	assert_eq!(store.append_usage_events(&batch).await.unwrap(), 4);
	assert_eq!(store.count_usage_events().await.unwrap(), 10);
}

// vim: ts=4
