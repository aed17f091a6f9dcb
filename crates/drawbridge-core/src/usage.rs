//! Write-behind buffering of usage events.
//!
//! Events are appended to a cache-backed list and flushed to the durable
//! store in batches. Delivery is at-least-once: a batch is only trimmed
//! from the buffer after the store accepted it, so a crash between write
//! and trim replays the batch. The store deduplicates on the event id,
//! which is assigned here before the event is buffered.
//!
//! When the cache is unreachable the event is written to the store
//! directly instead of being dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::UsageConfig;
use crate::prelude::*;
use drawbridge_types::cache_adapter::CacheAdapter;
use drawbridge_types::store_adapter::{StoreAdapter, UsageEvent};

const BUFFER_KEY: &str = "usage:buffer:events";

#[derive(Debug)]
pub struct UsageBuffer {
	cache: Arc<dyn CacheAdapter>,
	store: Arc<dyn StoreAdapter>,
	config: UsageConfig,
	fallback_writes: AtomicU64,
}

impl UsageBuffer {
	pub fn new(
		cache: Arc<dyn CacheAdapter>,
		store: Arc<dyn StoreAdapter>,
		config: UsageConfig,
	) -> Self {
		Self { cache, store, config, fallback_writes: AtomicU64::new(0) }
	}

	/// Buffer one event. An empty event id is replaced with a fresh UUID so
	/// replayed flushes stay deduplicable.
	pub async fn record(&self, mut event: UsageEvent) -> ClResult<()> {
		if event.event_id.is_empty() {
			event.event_id = uuid::Uuid::new_v4().to_string().into();
		}

		let json = serde_json::to_string(&event)?;
		match self.cache.list_push_back(BUFFER_KEY, &json).await {
			Ok(len) => {
				if len > self.config.max_buffered {
					warn!("Usage buffer holds {} events, flushing is falling behind", len);
				}
				Ok(())
			}
			Err(err) => {
				// cache is down, keep the event anyway
				warn!("Usage buffer unavailable ({}), writing event to store directly", err);
				self.fallback_writes.fetch_add(1, Ordering::Relaxed);
				self.store.append_usage_events(&[event]).await?;
				Ok(())
			}
		}
	}

	/// Flush one batch from the front of the buffer. Returns the number of
	/// events handed to the store, 0 when the buffer is empty.
	pub async fn flush_batch(&self) -> ClResult<u32> {
		let batch_size = i64::from(self.config.flush_batch_size);
		let raw = self.cache.list_range(BUFFER_KEY, 0, batch_size - 1).await?;
		if raw.is_empty() {
			return Ok(0);
		}

		let mut events = Vec::with_capacity(raw.len());
		for json in &raw {
			match serde_json::from_str::<UsageEvent>(json) {
				Ok(event) => events.push(event),
				// malformed entries are dropped with the batch trim below
				Err(err) => warn!("Skipping malformed usage event in buffer: {}", err),
			}
		}

		if !events.is_empty() {
			// on error the batch stays buffered and is retried next flush
			self.store.append_usage_events(&events).await?;
		}
		self.cache.list_trim_front(BUFFER_KEY, raw.len() as u64).await?;

		debug!("Flushed {} usage events", events.len());
		Ok(events.len() as u32)
	}

	/// Drain the whole buffer, batch by batch.
	pub async fn flush_all(&self) -> ClResult<u32> {
		let mut total = 0;
		loop {
			let flushed = self.flush_batch().await?;
			if flushed == 0 && self.buffered_len().await? == 0 {
				break;
			}
			total += flushed;
		}
		Ok(total)
	}

	pub async fn buffered_len(&self) -> ClResult<u64> {
		self.cache.list_len(BUFFER_KEY).await
	}

	/// Events written straight to the store because the cache was down.
	pub fn fallback_writes(&self) -> u64 {
		self.fallback_writes.load(Ordering::Relaxed)
	}

	/// Periodic flush task. Errors are logged and retried on the next tick.
	pub fn spawn_flush_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let buffer = Arc::clone(self);
		let interval = self.config.flush_interval();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				if let Err(err) = buffer.flush_all().await {
					warn!("Usage flush failed, will retry: {}", err);
				}
			}
		})
	}
}


// vim: ts=4
