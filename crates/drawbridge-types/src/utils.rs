//! Utility functions

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::prelude::*;
use rand::RngExt;

pub const ID_LENGTH: usize = 24;
pub const SAFE: [char; 62] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
	'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
	'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
	'V', 'W', 'X', 'Y', 'Z',
];

pub fn random_id() -> ClResult<String> {
	let mut rng = rand::rng();
	let mut result = String::with_capacity(ID_LENGTH);

	for _ in 0..ID_LENGTH {
		result.push(SAFE[rng.random_range(0..SAFE.len())]);
	}
	Ok(result)
}

/// SHA-256 of a token, hex encoded. Raw session and refresh tokens are
/// never stored; only their hashes appear in keys and indexes.
pub fn hash_token(token: &str) -> Box<str> {
	let digest = Sha256::digest(token.as_bytes());
	let mut out = String::with_capacity(64);
	for byte in digest {
		let _ = write!(out, "{:02x}", byte);
	}
	out.into_boxed_str()
}

/// Build a cache key following the `{domain}:{scope}:{identifier}` naming
/// convention used across the layer.
pub fn cache_key(domain: &str, scope: &str, identifier: &str) -> String {
	format!("{}:{}:{}", domain, scope, identifier)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_random_id_length_and_charset() {
		let id = random_id().unwrap();
		assert_eq!(id.len(), ID_LENGTH);
		assert!(id.chars().all(|c| SAFE.contains(&c)));
	}

	#[test]
	fn test_hash_token_is_stable_hex() {
		let a = hash_token("secret-token");
		let b = hash_token("secret-token");
		assert_eq!(a, b);
		assert_eq!(a.len(), 64);
		assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(hash_token("other-token"), a);
	}

	#[test]
	fn test_cache_key_format() {
		assert_eq!(cache_key("session", "user", "42"), "session:user:42");
	}
}

// vim: ts=4
