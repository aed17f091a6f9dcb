//! One-time verification codes (captcha and SMS).
//!
//! Codes live in the cache tier under `code:{purpose}:{id}` with an
//! attempts counter and a resend-cooldown marker next to them. Consuming a
//! code is a compare-and-delete, so two concurrent verifications of the
//! same code have exactly one winner. Captcha codes are uppercased at store
//! time and compared case-insensitively; SMS codes are compared exactly.

use rand::RngExt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CodeConfig;
use crate::prelude::*;
use drawbridge_types::cache_adapter::{CacheAdapter, CasOutcome};
use drawbridge_types::utils::cache_key;

/// Captcha alphabet, with the easily confused 0/O and 1/I left out.
const CAPTCHA_CHARS: [char; 32] = [
	'2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'L',
	'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodePurpose {
	Captcha,
	SmsRegister,
	SmsLogin,
	SmsReset,
}

impl CodePurpose {
	fn scope(self) -> &'static str {
		match self {
			CodePurpose::Captcha => "captcha",
			CodePurpose::SmsRegister => "sms_register",
			CodePurpose::SmsLogin => "sms_login",
			CodePurpose::SmsReset => "sms_reset",
		}
	}

	fn case_insensitive(self) -> bool {
		matches!(self, CodePurpose::Captcha)
	}

	fn normalize(self, code: &str) -> String {
		if self.case_insensitive() {
			code.to_uppercase()
		} else {
			code.to_string()
		}
	}

	/// Generate a random code: digits for SMS purposes, characters from the
	/// captcha alphabet otherwise.
	pub fn generate_code(self, len: usize) -> String {
		let mut rng = rand::rng();
		let mut code = String::with_capacity(len);
		for _ in 0..len {
			if self.case_insensitive() {
				code.push(CAPTCHA_CHARS[rng.random_range(0..CAPTCHA_CHARS.len())]);
			} else {
				code.push(char::from(b'0' + rng.random_range(0..10u8)));
			}
		}
		code
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodeVerification {
	Valid,
	/// No code stored for this identifier (never sent, expired, or already
	/// consumed).
	NotFound,
	Incorrect {
		remaining_attempts: u32,
	},
	/// The attempt limit was reached; the code has been destroyed.
	TooManyAttempts,
}

#[derive(Debug)]
pub struct OneTimeCodeStore {
	cache: Arc<dyn CacheAdapter>,
	config: CodeConfig,
}

impl OneTimeCodeStore {
	pub fn new(cache: Arc<dyn CacheAdapter>, config: CodeConfig) -> Self {
		Self { cache, config }
	}

	fn code_key(purpose: CodePurpose, id: &str) -> String {
		cache_key("code", purpose.scope(), id)
	}

	fn attempts_key(purpose: CodePurpose, id: &str) -> String {
		format!("{}:attempts", Self::code_key(purpose, id))
	}

	fn cooldown_key(purpose: CodePurpose, id: &str) -> String {
		format!("{}:cooldown", Self::code_key(purpose, id))
	}

	/// Store a fresh code, replacing any previous one and resetting its
	/// attempts counter. Also starts the resend cooldown; enforcing it is
	/// the send path's job via [`Self::resend_cooldown_remaining`].
	pub async fn store_code(&self, purpose: CodePurpose, id: &str, code: &str) -> ClResult<()> {
		let normalized = purpose.normalize(code);
		self.cache
			.set(&Self::code_key(purpose, id), &normalized, Some(self.config.code_ttl()))
			.await?;
		self.cache.delete(&Self::attempts_key(purpose, id)).await?;
		self.cache
			.set(&Self::cooldown_key(purpose, id), "1", Some(self.config.resend_cooldown()))
			.await?;

		debug!("Stored {} code for {}", purpose.scope(), id);
		Ok(())
	}

	/// Verify a candidate and consume the code on success. Exactly one of
	/// any number of concurrent callers presenting the correct code gets
	/// `Valid`; the rest see `NotFound`.
	pub async fn verify_and_consume(
		&self,
		purpose: CodePurpose,
		id: &str,
		candidate: &str,
	) -> ClResult<CodeVerification> {
		let key = Self::code_key(purpose, id);
		let Some(stored) = self.cache.get(&key).await? else {
			return Ok(CodeVerification::NotFound);
		};

		if purpose.normalize(candidate) == stored.as_ref() {
			match self.cache.compare_and_delete(&key, &stored).await? {
				CasOutcome::Deleted => {
					self.cache.delete(&Self::attempts_key(purpose, id)).await?;
					self.cache.delete(&Self::cooldown_key(purpose, id)).await?;
					Ok(CodeVerification::Valid)
				}
				// Someone else consumed or replaced the code between our
				// read and the delete.
				CasOutcome::Mismatch | CasOutcome::Missing => Ok(CodeVerification::NotFound),
			}
		} else {
			self.register_failure(purpose, id).await
		}
	}

	/// Non-consuming check. Failed attempts still count toward the limit.
	pub async fn verify(
		&self,
		purpose: CodePurpose,
		id: &str,
		candidate: &str,
	) -> ClResult<CodeVerification> {
		let Some(stored) = self.cache.get(&Self::code_key(purpose, id)).await? else {
			return Ok(CodeVerification::NotFound);
		};

		if purpose.normalize(candidate) == stored.as_ref() {
			Ok(CodeVerification::Valid)
		} else {
			self.register_failure(purpose, id).await
		}
	}

	/// Remove a code and its counters, the explicit delete step after a
	/// non-consuming [`Self::verify`] flow completes.
	pub async fn delete_code(&self, purpose: CodePurpose, id: &str) -> ClResult<()> {
		self.cache.delete(&Self::code_key(purpose, id)).await?;
		self.cache.delete(&Self::attempts_key(purpose, id)).await?;
		self.cache.delete(&Self::cooldown_key(purpose, id)).await?;
		Ok(())
	}

	/// Time left before a new code may be sent to this identifier.
	pub async fn resend_cooldown_remaining(
		&self,
		purpose: CodePurpose,
		id: &str,
	) -> ClResult<Option<Duration>> {
		match self.cache.ttl_remaining(&Self::cooldown_key(purpose, id)).await {
			Ok(remaining) => Ok(remaining),
			Err(Error::NotFound) => Ok(None),
			Err(err) => Err(err),
		}
	}

	async fn register_failure(
		&self,
		purpose: CodePurpose,
		id: &str,
	) -> ClResult<CodeVerification> {
		let attempts = self
			.cache
			.incr(&Self::attempts_key(purpose, id), 1, Some(self.config.code_ttl()))
			.await? as u32;

		if attempts >= self.config.max_attempts {
			self.cache.delete(&Self::code_key(purpose, id)).await?;
			self.cache.delete(&Self::attempts_key(purpose, id)).await?;
			warn!("{} code for {} destroyed after {} failed attempts", purpose.scope(), id, attempts);
			Ok(CodeVerification::TooManyAttempts)
		} else {
			Ok(CodeVerification::Incorrect {
				remaining_attempts: self.config.max_attempts - attempts,
			})
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use drawbridge_cache_adapter_memory::MemoryCache;

	fn store(max_attempts: u32) -> OneTimeCodeStore {
		let config = CodeConfig { max_attempts, ..CodeConfig::default() };
		OneTimeCodeStore::new(Arc::new(MemoryCache::new()), config)
	}

	#[tokio::test]
	async fn test_captcha_is_case_insensitive() {
		let codes = store(5);
		codes.store_code(CodePurpose::Captcha, "c1", "aB3d").await.unwrap();

		let res = codes.verify_and_consume(CodePurpose::Captcha, "c1", "Ab3D").await.unwrap();
		assert_eq!(res, CodeVerification::Valid);
	}

	#[tokio::test]
	async fn test_sms_code_is_case_sensitive_and_exact() {
		let codes = store(5);
		codes.store_code(CodePurpose::SmsLogin, "+3670111", "X9k2").await.unwrap();

		let res = codes.verify_and_consume(CodePurpose::SmsLogin, "+3670111", "x9K2").await.unwrap();
		assert_eq!(res, CodeVerification::Incorrect { remaining_attempts: 4 });

		let res = codes.verify_and_consume(CodePurpose::SmsLogin, "+3670111", "X9k2").await.unwrap();
		assert_eq!(res, CodeVerification::Valid);
	}

	#[tokio::test]
	async fn test_code_consumed_exactly_once() {
		let codes = store(5);
		codes.store_code(CodePurpose::SmsLogin, "+3670222", "1234").await.unwrap();

		assert_eq!(
			codes.verify_and_consume(CodePurpose::SmsLogin, "+3670222", "1234").await.unwrap(),
			CodeVerification::Valid
		);
		assert_eq!(
			codes.verify_and_consume(CodePurpose::SmsLogin, "+3670222", "1234").await.unwrap(),
			CodeVerification::NotFound
		);
	}

	#[tokio::test]
	async fn test_concurrent_consume_has_one_winner() {
		let codes = Arc::new(store(5));
		codes.store_code(CodePurpose::Captcha, "race", "ZZZZ").await.unwrap();

		let mut set = tokio::task::JoinSet::new();
		for _ in 0..12 {
			let codes = Arc::clone(&codes);
			set.spawn(async move {
				codes.verify_and_consume(CodePurpose::Captcha, "race", "zzzz").await.unwrap()
			});
		}

		let mut winners = 0;
		while let Some(res) = set.join_next().await {
			if res.unwrap() == CodeVerification::Valid {
				winners += 1;
			}
		}
		assert_eq!(winners, 1);
	}

	#[tokio::test]
	async fn test_attempt_limit_destroys_code() {
		let codes = store(3);
		codes.store_code(CodePurpose::SmsReset, "p", "7777").await.unwrap();

		assert_eq!(
			codes.verify_and_consume(CodePurpose::SmsReset, "p", "0000").await.unwrap(),
			CodeVerification::Incorrect { remaining_attempts: 2 }
		);
		assert_eq!(
			codes.verify_and_consume(CodePurpose::SmsReset, "p", "0001").await.unwrap(),
			CodeVerification::Incorrect { remaining_attempts: 1 }
		);
		assert_eq!(
			codes.verify_and_consume(CodePurpose::SmsReset, "p", "0002").await.unwrap(),
			CodeVerification::TooManyAttempts
		);
		// even the correct code is gone now
		assert_eq!(
			codes.verify_and_consume(CodePurpose::SmsReset, "p", "7777").await.unwrap(),
			CodeVerification::NotFound
		);
	}

	#[tokio::test]
	async fn test_resend_cooldown() {
		let codes = store(5);

		assert!(codes
			.resend_cooldown_remaining(CodePurpose::SmsRegister, "+3670333")
			.await
			.unwrap()
			.is_none());

		codes.store_code(CodePurpose::SmsRegister, "+3670333", "1111").await.unwrap();
		let remaining = codes
			.resend_cooldown_remaining(CodePurpose::SmsRegister, "+3670333")
			.await
			.unwrap();
		assert!(remaining.is_some());

		// a replacement code resets attempts and takes over
		codes.store_code(CodePurpose::SmsRegister, "+3670333", "2222").await.unwrap();
		assert_eq!(
			codes.verify_and_consume(CodePurpose::SmsRegister, "+3670333", "2222").await.unwrap(),
			CodeVerification::Valid
		);
	}

	#[tokio::test]
	async fn test_generated_codes_roundtrip() {
		let sms = CodePurpose::SmsLogin.generate_code(4);
		assert_eq!(sms.len(), 4);
		assert!(sms.chars().all(|c| c.is_ascii_digit()));

		let captcha = CodePurpose::Captcha.generate_code(6);
		assert_eq!(captcha.len(), 6);
		assert!(captcha.chars().all(|c| CAPTCHA_CHARS.contains(&c)));

		let codes = store(5);
		codes.store_code(CodePurpose::Captcha, "gen", &captcha).await.unwrap();
		assert_eq!(
			codes.verify_and_consume(CodePurpose::Captcha, "gen", &captcha).await.unwrap(),
			CodeVerification::Valid
		);
	}

	#[tokio::test]
	async fn test_verify_does_not_consume() {
		let codes = store(5);
		codes.store_code(CodePurpose::Captcha, "keep", "AAAA").await.unwrap();

		assert_eq!(
			codes.verify(CodePurpose::Captcha, "keep", "AAAA").await.unwrap(),
			CodeVerification::Valid
		);
		assert_eq!(
			codes.verify_and_consume(CodePurpose::Captcha, "keep", "AAAA").await.unwrap(),
			CodeVerification::Valid
		);
	}

	#[tokio::test]
	async fn test_delete_code_after_verify() {
		let codes = store(5);
		codes.store_code(CodePurpose::Captcha, "once", "BBBB").await.unwrap();

		assert_eq!(
			codes.verify(CodePurpose::Captcha, "once", "BBBB").await.unwrap(),
			CodeVerification::Valid
		);
		codes.delete_code(CodePurpose::Captcha, "once").await.unwrap();

		assert_eq!(
			codes.verify_and_consume(CodePurpose::Captcha, "once", "BBBB").await.unwrap(),
			CodeVerification::NotFound
		);
		// the cooldown marker is gone with the code
		assert!(codes
			.resend_cooldown_remaining(CodePurpose::Captcha, "once")
			.await
			.unwrap()
			.is_none());
	}
}

// vim: ts=4
