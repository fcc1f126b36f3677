use std::sync::LazyLock;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::CONFIG, player::PlayerUsername};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

static KEYS: LazyLock<Keys> = LazyLock::new(|| {
    let secret = read_or_generate_secret();
    Keys::new(&secret)
});

fn read_or_generate_secret() -> Vec<u8> {
    if let Ok(secret) = std::env::var("LADDER_JWT_SECRET") {
        secret.as_bytes().to_vec()
    } else {
        log::warn!("LADDER_JWT_SECRET not set, generating a random signing key");
        Uuid::new_v4().as_bytes().to_vec()
    }
}

pub fn generate_access_token(username: &PlayerUsername) -> String {
    let ttl = chrono::Duration::milliseconds(CONFIG.access_token_ttl_ms);
    let claims = Claims {
        sub: username.clone(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &KEYS.encoding).unwrap()
}

pub fn validate_access_token(token: &str) -> Option<PlayerUsername> {
    decode::<Claims>(token, &KEYS.decoding, &Validation::default())
        .ok()
        .map(|data| data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let token = generate_access_token(&"Falcon".to_string());
        assert_eq!(validate_access_token(&token), Some("Falcon".to_string()));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert_eq!(validate_access_token("not-a-token"), None);
    }
}
