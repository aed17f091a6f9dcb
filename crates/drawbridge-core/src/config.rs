//! Configuration for the security cache layer.
//!
//! All durations are configured in seconds or milliseconds and exposed as
//! `Duration` through accessor methods. Every struct deserializes with
//! `#[serde(default)]` so a partial config file works.

use ipnet::IpNet;
use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FailoverConfig {
	/// Hard deadline for a single cache operation, in milliseconds.
	pub op_timeout_ms: u64,
	/// Minimum time between liveness probes of a downed primary.
	pub probe_interval_ms: u64,
}

impl Default for FailoverConfig {
	fn default() -> Self {
		Self { op_timeout_ms: 2_000, probe_interval_ms: 5_000 }
	}
}

impl FailoverConfig {
	pub fn op_timeout(&self) -> Duration {
		Duration::from_millis(self.op_timeout_ms)
	}

	pub fn probe_interval(&self) -> Duration {
		Duration::from_millis(self.probe_interval_ms)
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeConfig {
	pub code_ttl_secs: u64,
	pub max_attempts: u32,
	pub resend_cooldown_secs: u64,
}

impl Default for CodeConfig {
	fn default() -> Self {
		Self { code_ttl_secs: 300, max_attempts: 5, resend_cooldown_secs: 60 }
	}
}

impl CodeConfig {
	pub fn code_ttl(&self) -> Duration {
		Duration::from_secs(self.code_ttl_secs)
	}

	pub fn resend_cooldown(&self) -> Duration {
		Duration::from_secs(self.resend_cooldown_secs)
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
	pub session_ttl_secs: u64,
	pub refresh_ttl_secs: u64,
	pub max_concurrent_sessions: u32,
	/// When true, a refresh token presented from a device with a different
	/// fingerprint is rejected. When false, the mismatch is logged and the
	/// token accepted.
	pub strict_device_check: bool,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			session_ttl_secs: 86_400,
			refresh_ttl_secs: 30 * 86_400,
			max_concurrent_sessions: 5,
			strict_device_check: false,
		}
	}
}

impl SessionConfig {
	pub fn session_ttl(&self) -> Duration {
		Duration::from_secs(self.session_ttl_secs)
	}

	pub fn refresh_ttl(&self) -> Duration {
		Duration::from_secs(self.refresh_ttl_secs)
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsageConfig {
	pub flush_interval_secs: u64,
	pub flush_batch_size: u32,
	/// Buffer length above which record() starts warning.
	pub max_buffered: u64,
}

impl Default for UsageConfig {
	fn default() -> Self {
		Self { flush_interval_secs: 300, flush_batch_size: 100, max_buffered: 10_000 }
	}
}

impl UsageConfig {
	pub fn flush_interval(&self) -> Duration {
		Duration::from_secs(self.flush_interval_secs)
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WhitelistConfig {
	pub refresh_interval_secs: u64,
}

impl Default for WhitelistConfig {
	fn default() -> Self {
		Self { refresh_interval_secs: 300 }
	}
}

impl WhitelistConfig {
	pub fn refresh_interval(&self) -> Duration {
		Duration::from_secs(self.refresh_interval_secs)
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DrawbridgeConfig {
	pub failover: FailoverConfig,
	pub codes: CodeConfig,
	pub sessions: SessionConfig,
	pub usage: UsageConfig,
	pub whitelist: WhitelistConfig,
	/// Ordered header subset hashed into the device fingerprint.
	pub device_headers: Vec<Box<str>>,
	/// Peers allowed to set X-Forwarded-For / X-Real-IP.
	pub trusted_proxies: Vec<IpNet>,
}

impl Default for DrawbridgeConfig {
	fn default() -> Self {
		Self {
			failover: FailoverConfig::default(),
			codes: CodeConfig::default(),
			sessions: SessionConfig::default(),
			usage: UsageConfig::default(),
			whitelist: WhitelistConfig::default(),
			device_headers: crate::device::DEFAULT_DEVICE_HEADERS
				.iter()
				.map(|h| Box::from(*h))
				.collect(),
			trusted_proxies: Vec::new(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_partial_config_deserializes_with_defaults() {
		let config: DrawbridgeConfig = serde_json::from_str(
			r#"{ "sessions": { "maxConcurrentSessions": 2 }, "trustedProxies": ["10.0.0.0/8"] }"#,
		)
		.unwrap();
		assert_eq!(config.sessions.max_concurrent_sessions, 2);
		assert_eq!(config.sessions.session_ttl_secs, 86_400);
		assert_eq!(config.codes.max_attempts, 5);
		assert_eq!(config.trusted_proxies.len(), 1);
	}
}

// vim: ts=4
