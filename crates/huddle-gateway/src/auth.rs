use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use huddle_types::api::Claims;

/// WebSocket close code sent when the credential is missing or invalid.
pub const AUTH_FAILED_CLOSE_CODE: u16 = 4001;
pub const AUTH_FAILED_REASON: &str = "Authentication failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("invalid credential: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Turns a bearer credential into a user identity. Token issuance lives
/// elsewhere; this side only checks.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verification with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        Ok(Identity {
            user_id: data.claims.sub,
            username: data.claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{EncodingKey, Header, encode};

    use super::*;

    fn token(secret: &str, user: Uuid, exp_offset: i64) -> String {
        let claims = Claims {
            sub: user,
            username: "ada".into(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let user = Uuid::new_v4();
        let identity = JwtVerifier::new("s3cret")
            .verify(&token("s3cret", user, 3600))
            .unwrap();
        assert_eq!(identity.user_id, user);
        assert_eq!(identity.username, "ada");
    }

    #[test]
    fn rejects_bad_tokens() {
        let verifier = JwtVerifier::new("s3cret");
        let user = Uuid::new_v4();

        assert!(matches!(verifier.verify(""), Err(AuthError::Missing)));
        assert!(matches!(verifier.verify("garbage"), Err(AuthError::Invalid(_))));
        assert!(matches!(
            verifier.verify(&token("other", user, 3600)),
            Err(AuthError::Invalid(_))
        ));
        assert!(matches!(
            verifier.verify(&token("s3cret", user, -3600)),
            Err(AuthError::Invalid(_))
        ));
    }
}
