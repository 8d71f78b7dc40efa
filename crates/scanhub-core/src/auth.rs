use crate::error::{CoordinatorError, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Actor identity derived from a verified bearer token's `sub` claim (spec §6,
/// "Authentication").
pub type Actor = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    iss: String,
    #[allow(dead_code)]
    aud: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Verifies a bearer token against the configured identity provider and returns the
/// actor identity (the `sub` claim).
///
/// spec §1 scopes IdP integration out as an external boundary; this trait is the seam
/// — the production implementation validates signature/issuer/audience, while tests
/// inject a fixed-secret fake rather than standing up a live IdP.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, bearer_token: &str) -> Result<Actor>;
}

/// HS256 verifier used in tests and local/dev deployments. A production deployment in
/// front of a real IdP (e.g. one issuing RS256 tokens over JWKS) would supply a
/// different `TokenVerifier` impl; the HTTP layer only depends on the trait.
pub struct Hs256TokenVerifier {
    issuer: String,
    audience: String,
    decoding_key: DecodingKey,
}

impl Hs256TokenVerifier {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }
}

impl TokenVerifier for Hs256TokenVerifier {
    fn verify(&self, bearer_token: &str) -> Result<Actor> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_audience(std::slice::from_ref(&self.audience));

        let data = decode::<Claims>(bearer_token, &self.decoding_key, &validation)
            .map_err(|err| CoordinatorError::Other(anyhow::anyhow!(err).context("verify bearer token")))?;

        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(iss: &str, aud: &str, sub: &str, secret: &[u8]) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            iss: iss.to_string(),
            aud: aud.to_string(),
            exp: (chrono::Utc::now().timestamp() + 300) as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn verifies_and_extracts_sub() {
        let verifier = Hs256TokenVerifier::new("scanhub", "scanhub-api", b"secret");
        let t = token("scanhub", "scanhub-api", "worker-1", b"secret");
        assert_eq!(verifier.verify(&t).unwrap(), "worker-1");
    }

    #[test]
    fn rejects_wrong_audience() {
        let verifier = Hs256TokenVerifier::new("scanhub", "scanhub-api", b"secret");
        let t = token("scanhub", "someone-else", "worker-1", b"secret");
        assert!(verifier.verify(&t).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let verifier = Hs256TokenVerifier::new("scanhub", "scanhub-api", b"secret");
        let t = token("scanhub", "scanhub-api", "worker-1", b"other-secret");
        assert!(verifier.verify(&t).is_err());
    }
}
