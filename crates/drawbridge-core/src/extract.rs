//! Client IP extraction.
//!
//! Forwarding headers are only honored when the TCP peer is one of the
//! configured trusted proxies; anything else keeps the peer address, so a
//! direct client cannot spoof its way past IP-keyed rate limits or the
//! whitelist.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;

/// Resolve the client address from the peer and the forwarding headers.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[IpNet]) -> IpAddr {
	if !trusted_proxies.iter().any(|net| net.contains(&peer)) {
		return peer;
	}

	if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
		// First entry is the originating client
		if let Some(first) = xff.split(',').next() {
			if let Ok(ip) = first.trim().parse() {
				return ip;
			}
		}
	}

	if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
		if let Ok(ip) = xri.trim().parse() {
			return ip;
		}
	}

	peer
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::HeaderValue;
	use std::net::Ipv4Addr;

	fn proxies() -> Vec<IpNet> {
		vec!["10.0.0.0/8".parse().unwrap()]
	}

	#[test]
	fn test_untrusted_peer_headers_ignored() {
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
		let peer = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

		assert_eq!(client_ip(&headers, peer, &proxies()), peer);
	}

	#[test]
	fn test_trusted_proxy_forwarded_for() {
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 10.0.0.2"));
		let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

		assert_eq!(client_ip(&headers, peer, &proxies()), "1.2.3.4".parse::<IpAddr>().unwrap());
	}

	#[test]
	fn test_trusted_proxy_real_ip_fallback() {
		let mut headers = HeaderMap::new();
		headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
		let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

		assert_eq!(client_ip(&headers, peer, &proxies()), "1.2.3.4".parse::<IpAddr>().unwrap());
	}

	#[test]
	fn test_malformed_header_keeps_peer() {
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
		let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

		assert_eq!(client_ip(&headers, peer, &proxies()), peer);
	}
}

// vim: ts=4
