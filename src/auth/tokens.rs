use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

pub const ACTIVATION_TTL: Duration = Duration::hours(12);
pub const RESET_TTL: Duration = Duration::minutes(10);

/// A single-use secret. Only `hashed` is stored; `plain` goes into the mailed URL.
#[derive(Debug, Clone)]
pub struct OneTimeToken {
    pub plain: String,
    pub hashed: String,
    pub expires_at: OffsetDateTime,
}

impl OneTimeToken {
    pub fn generate(ttl: Duration) -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let plain = hex::encode(bytes);
        Self {
            hashed: hash_token(&plain),
            plain,
            expires_at: OffsetDateTime::now_utc() + ttl,
        }
    }
}

pub fn hash_token(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_only_the_digest() {
        let t = OneTimeToken::generate(RESET_TTL);
        assert_eq!(t.plain.len(), 64);
        assert_ne!(t.plain, t.hashed);
        assert_eq!(hash_token(&t.plain), t.hashed);
        assert!(t.expires_at > OffsetDateTime::now_utc());
    }

    #[test]
    fn tokens_are_random() {
        assert_ne!(
            OneTimeToken::generate(ACTIVATION_TTL).plain,
            OneTimeToken::generate(ACTIVATION_TTL).plain
        );
    }
}
