//! Core security cache layer.
//!
//! This crate contains the feature components built on top of the cache and
//! store adapter traits: one-time verification codes, sliding-window rate
//! limits, session and refresh-token management, buffered usage accounting,
//! and the IP whitelist. Components talk to a single cache handle; the
//! failover decorator decides which tier actually serves a call.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod code_store;
pub mod config;
pub mod device;
pub mod extract;
pub mod failover;
pub mod prelude;
pub mod rate_limit;
pub mod session;
pub mod usage;
pub mod whitelist;

pub use code_store::{CodePurpose, CodeVerification, OneTimeCodeStore};
pub use config::DrawbridgeConfig;
pub use failover::FailoverCache;
pub use rate_limit::{FailMode, RateLimitRule, SlidingWindowLimiter};
pub use session::{RefreshCheck, RevocationReason, SessionInfo, SessionManager};
pub use usage::UsageBuffer;
pub use whitelist::{OrgGrant, WhitelistCache};

// vim: ts=4
