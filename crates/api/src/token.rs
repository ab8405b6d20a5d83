//! HS256 token verification adapter.
//!
//! Token issuance is an external collaborator; this adapter only decodes and
//! signature-checks the credential, then applies the deterministic claims
//! validation from `commons-authz`.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use commons_authz::{AuthClaims, TokenValidationError, TokenVerifier, validate_claims};

pub struct Hs256TokenVerifier {
    decoding: DecodingKey,
}

impl Hs256TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl TokenVerifier for Hs256TokenVerifier {
    fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AuthClaims, TokenValidationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // The time window is validated below against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims = Default::default();

        let data = jsonwebtoken::decode::<AuthClaims>(token, &self.decoding, &validation)
            .map_err(|_| TokenValidationError::Malformed)?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use commons_core::{OrganizationId, UserId};
    use jsonwebtoken::{EncodingKey, Header};

    fn mint(secret: &str, claims: &AuthClaims) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("failed to encode jwt")
    }

    fn claims(now: DateTime<Utc>) -> AuthClaims {
        AuthClaims {
            sub: UserId::new(),
            is_administrator: false,
            organizations: vec![OrganizationId::new()],
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn verifies_a_minted_token() {
        let now = Utc::now();
        let claims = claims(now);
        let verifier = Hs256TokenVerifier::new("test-secret");
        let verified = verifier.verify(&mint("test-secret", &claims), now).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn rejects_a_wrong_signature() {
        let now = Utc::now();
        let verifier = Hs256TokenVerifier::new("test-secret");
        let err = verifier
            .verify(&mint("other-secret", &claims(now)), now)
            .unwrap_err();
        assert_eq!(err, TokenValidationError::Malformed);
    }

    #[test]
    fn rejects_an_expired_token() {
        let now = Utc::now();
        let verifier = Hs256TokenVerifier::new("test-secret");
        let token = mint("test-secret", &claims(now - Duration::hours(1)));
        let err = verifier.verify(&token, now).unwrap_err();
        assert_eq!(err, TokenValidationError::Expired);
    }

    #[test]
    fn rejects_garbage() {
        let verifier = Hs256TokenVerifier::new("test-secret");
        let err = verifier.verify("not-a-token", Utc::now()).unwrap_err();
        assert_eq!(err, TokenValidationError::Malformed);
    }
}
