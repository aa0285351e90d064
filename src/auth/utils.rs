//! Random secret generation and hashing.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

/// 32 random bytes, URL-safe base64 without padding.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Six digit numeric code in `100000..=999999`.
pub(crate) fn generate_otp() -> String {
    OsRng.gen_range(100_000u32..=999_999).to_string()
}

/// Digest stored in place of a raw secret.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(crate) fn is_otp_shape(value: &str) -> bool {
    value.len() == 6 && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_token_decodes_to_32_bytes() {
        let decoded_len = generate_token()
            .ok()
            .and_then(|token| Base64UrlUnpadded::decode_vec(&token).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generate_otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert!(is_otp_shape(&otp), "bad otp {otp}");
            assert_ne!(otp.as_bytes()[0], b'0');
        }
    }

    #[test]
    fn hash_token_stable() {
        assert_eq!(hash_token("token"), hash_token("token"));
        assert_ne!(hash_token("token"), hash_token("other"));
        assert_eq!(hash_token("token").len(), 32);
    }

    #[test]
    fn otp_shape_rejects_links() {
        assert!(is_otp_shape("123456"));
        assert!(!is_otp_shape("12345"));
        assert!(!is_otp_shape("12345a"));
        assert!(!is_otp_shape("aGVsbG8td29ybGQtdG9rZW4tdmFsdWU"));
    }
}
