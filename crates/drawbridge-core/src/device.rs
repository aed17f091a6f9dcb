//! Device fingerprinting.
//!
//! Refresh tokens are bound to a SHA-256 fingerprint of a fixed, ordered
//! header subset. Absent headers hash as empty strings but are tracked
//! separately, so a mismatch log can tell "client sent no headers" apart
//! from "different device".

use axum::http::HeaderMap;

use drawbridge_types::utils::hash_token;

pub const DEFAULT_DEVICE_HEADERS: [&str; 3] = ["user-agent", "accept-language", "accept-encoding"];

#[derive(Clone, Debug)]
pub struct DeviceFingerprint {
	pub hash: Box<str>,
	/// Names of the configured headers the client did not send.
	pub absent: Box<[Box<str>]>,
}

impl DeviceFingerprint {
	pub fn all_headers_absent(&self, configured: usize) -> bool {
		self.absent.len() == configured
	}
}

/// Compute the fingerprint over `names` in order. The header order is part
/// of the hash, so the configured list must stay stable across versions.
pub fn device_fingerprint(headers: &HeaderMap, names: &[Box<str>]) -> DeviceFingerprint {
	let mut material = String::new();
	let mut absent = Vec::new();

	for name in names {
		let value = headers.get(name.as_ref()).and_then(|v| v.to_str().ok()).unwrap_or("");
		if value.is_empty() {
			absent.push(name.clone());
		}
		material.push_str(name);
		material.push(':');
		material.push_str(value);
		material.push('\n');
	}

	DeviceFingerprint { hash: hash_token(&material), absent: absent.into_boxed_slice() }
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;

	fn names() -> Vec<Box<str>> {
		DEFAULT_DEVICE_HEADERS.iter().map(|h| Box::from(*h)).collect()
	}

	#[test]
	fn test_same_headers_same_hash() {
		let mut headers = HeaderMap::new();
		headers.insert("user-agent", HeaderValue::from_static("TestBrowser/1.0"));
		headers.insert("accept-language", HeaderValue::from_static("en-US"));

		let a = device_fingerprint(&headers, &names());
		let b = device_fingerprint(&headers, &names());
		assert_eq!(a.hash, b.hash);
		assert_eq!(a.absent.len(), 1);
		assert_eq!(a.absent[0].as_ref(), "accept-encoding");
	}

	#[test]
	fn test_different_agent_different_hash() {
		let mut a = HeaderMap::new();
		a.insert("user-agent", HeaderValue::from_static("TestBrowser/1.0"));
		let mut b = HeaderMap::new();
		b.insert("user-agent", HeaderValue::from_static("OtherBrowser/2.0"));

		assert_ne!(device_fingerprint(&a, &names()).hash, device_fingerprint(&b, &names()).hash);
	}

	#[test]
	fn test_empty_headers_tracked_as_absent() {
		let headers = HeaderMap::new();
		let fp = device_fingerprint(&headers, &names());
		assert!(fp.all_headers_absent(names().len()));
	}
}

// vim: ts=4
