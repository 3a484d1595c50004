//! Inbound JWT authentication
//!
//! Stage instances authenticate with EdDSA bearer tokens: the issuer must
//! equal the `X-Chorus-Instance-Id` header, the audience must equal this
//! bridge's instance id, expiry is enforced, and the `jti` claim is checked
//! against the JTI cache (insert-or-reject) to stop token replay.

use std::sync::Arc;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::warn;

use chorus_bridge_crypto::verifying_key_from_hex;
use chorus_bridge_db::BridgeStore;
use chorus_bridge_types::{BridgeConfig, BridgeError, BridgeResult};

#[derive(Debug, Deserialize)]
struct InboundClaims {
    exp: i64,
    jti: Option<String>,
}

/// Validates inbound bearer tokens issued by Stage instances
pub struct JwtAuthenticator {
    enabled: bool,
    decoding_key: Option<DecodingKey>,
    bridge_instance_id: String,
    store: Arc<dyn BridgeStore>,
}

impl JwtAuthenticator {
    pub fn new(config: &BridgeConfig, store: Arc<dyn BridgeStore>) -> BridgeResult<Self> {
        let decoding_key = match &config.jwt_public_key {
            Some(hex_key) => {
                let key = verifying_key_from_hex(hex_key, "jwt_public_key")
                    .map_err(|e| BridgeError::Config(format!("invalid jwt_public_key: {e}")))?;
                Some(DecodingKey::from_ed_der(&key.to_bytes()))
            }
            None => None,
        };
        if config.jwt_enforcement_enabled && decoding_key.is_none() {
            return Err(BridgeError::Config(
                "jwt_public_key required when jwt_enforcement_enabled".to_string(),
            ));
        }
        Ok(Self {
            enabled: config.jwt_enforcement_enabled,
            decoding_key,
            bridge_instance_id: config.instance_id.clone(),
            store,
        })
    }

    /// Enforce bearer-token auth for a request from `stage_instance`
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        stage_instance: &str,
    ) -> Result<(), BridgeError> {
        if !self.enabled {
            return Ok(());
        }

        let authorization = headers
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                BridgeError::Unauthorized("missing or invalid Authorization header".to_string())
            })?;
        let token = authorization.strip_prefix("Bearer ").ok_or_else(|| {
            BridgeError::Unauthorized("missing or invalid Authorization header".to_string())
        })?;

        let Some(key) = &self.decoding_key else {
            return Err(BridgeError::Config(
                "JWT public key not configured on the bridge".to_string(),
            ));
        };

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[&self.bridge_instance_id]);
        validation.set_issuer(&[stage_instance]);
        validation.validate_exp = true;

        let data = decode::<InboundClaims>(token, key, &validation).map_err(|error| {
            warn!(stage_instance, %error, "JWT validation failed");
            BridgeError::Unauthorized(format!("invalid JWT token: {error}"))
        })?;

        let jti = data
            .claims
            .jti
            .ok_or_else(|| BridgeError::Unauthorized("invalid JWT token: missing jti".to_string()))?;
        let fresh = self
            .store
            .remember_jti(&jti, stage_instance, data.claims.exp)
            .await
            .map_err(|e| BridgeError::Store(e.to_string()))?;
        if !fresh {
            warn!(stage_instance, jti, "JWT replay detected");
            return Err(BridgeError::Unauthorized(
                "invalid JWT token: jti replay detected".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_bridge_db::MemoryStore;
    use ed25519_dalek::pkcs8::EncodePrivateKey;
    use ed25519_dalek::SigningKey;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use rand::rngs::OsRng;
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        iss: String,
        aud: String,
        iat: i64,
        exp: i64,
        jti: String,
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    struct AuthFixture {
        authenticator: JwtAuthenticator,
        encoding_key: EncodingKey,
    }

    fn fixture() -> AuthFixture {
        let signing_key = SigningKey::generate(&mut OsRng);
        let config = BridgeConfig {
            instance_id: "bridge-test".to_string(),
            jwt_enforcement_enabled: true,
            jwt_public_key: Some(hex::encode(signing_key.verifying_key().to_bytes())),
            ..Default::default()
        };
        let store: Arc<dyn BridgeStore> = Arc::new(MemoryStore::new());
        let authenticator = JwtAuthenticator::new(&config, store).unwrap();
        let document = signing_key.to_pkcs8_der().unwrap();
        AuthFixture {
            authenticator,
            encoding_key: EncodingKey::from_ed_der(document.as_bytes()),
        }
    }

    fn token(fixture: &AuthFixture, iss: &str, aud: &str, jti: &str) -> String {
        let claims = TestClaims {
            iss: iss.to_string(),
            aud: aud.to_string(),
            iat: now(),
            exp: now() + 300,
            jti: jti.to_string(),
        };
        encode(
            &Header::new(Algorithm::EdDSA),
            &claims,
            &fixture.encoding_key,
        )
        .unwrap()
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_valid_token_is_accepted() {
        let f = fixture();
        let token = token(&f, "stage-a", "bridge-test", "jti-1");
        assert!(f
            .authenticator
            .authenticate(&bearer_headers(&token), "stage-a")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_jti_replay_is_rejected() {
        let f = fixture();
        let token = token(&f, "stage-a", "bridge-test", "jti-1");
        let headers = bearer_headers(&token);
        f.authenticator
            .authenticate(&headers, "stage-a")
            .await
            .unwrap();
        assert!(matches!(
            f.authenticator.authenticate(&headers, "stage-a").await,
            Err(BridgeError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_issuer_must_match_instance_header() {
        let f = fixture();
        let token = token(&f, "stage-b", "bridge-test", "jti-2");
        assert!(matches!(
            f.authenticator
                .authenticate(&bearer_headers(&token), "stage-a")
                .await,
            Err(BridgeError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_audience_is_rejected() {
        let f = fixture();
        let token = token(&f, "stage-a", "some-other-bridge", "jti-3");
        assert!(matches!(
            f.authenticator
                .authenticate(&bearer_headers(&token), "stage-a")
                .await,
            Err(BridgeError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_header_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.authenticator.authenticate(&HeaderMap::new(), "stage-a").await,
            Err(BridgeError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_enforcement_passes_everything() {
        let store: Arc<dyn BridgeStore> = Arc::new(MemoryStore::new());
        let authenticator =
            JwtAuthenticator::new(&BridgeConfig::default(), store).unwrap();
        assert!(authenticator
            .authenticate(&HeaderMap::new(), "stage-a")
            .await
            .is_ok());
    }
}
