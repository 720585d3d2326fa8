use crate::{
    model::{Id, user::UserMarker},
    util::PositiveDuration,
};
use argon2::{
    Argon2,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter},
    num::ParseIntError,
};
use thiserror::Error;
use time::OffsetDateTime;

pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_SALT_LEN: usize = 16;
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token could not be processed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Token subject is not a user id: {0}")]
    InvalidSubject(ParseIntError),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies bearer tokens with a shared secret.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: PositiveDuration,
}

impl TokenKeys {
    #[must_use]
    pub fn new(secret: &[u8], lifetime: PositiveDuration) -> Self {
        // Expired means expired, no grace period.
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            lifetime,
        }
    }

    #[must_use]
    pub fn lifetime(&self) -> PositiveDuration {
        self.lifetime
    }

    pub fn issue(&self, user_id: Id<UserMarker>) -> Result<String, TokenError> {
        self.issue_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn issue_at(
        &self,
        user_id: Id<UserMarker>,
        issued_at: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + self.lifetime.get()).unix_timestamp(),
        };

        let token = jsonwebtoken::encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Checks signature and expiry and returns the user the token was issued to.
    pub fn verify(&self, token: &str) -> Result<Id<UserMarker>, TokenError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)?;

        data.claims
            .sub
            .parse()
            .map_err(TokenError::InvalidSubject)
    }
}

impl Debug for TokenKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenKeys")
            .field("secret", &"[redacted]")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Password must be at least {PASSWORD_MIN_LEN} characters long, got {0}")]
pub struct WeakPasswordError(usize);

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Result<Self, WeakPasswordError> {
        let len = password.chars().count();
        if len >= PASSWORD_MIN_LEN {
            Ok(Self(password))
        } else {
            Err(WeakPasswordError(len))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Debug for Password {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Password").field(&"[redacted]").finish()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing password failed: {0}")]
pub struct PasswordHashError(password_hash::Error);

/// An argon2 hash in PHC string format.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    pub fn hash(password: &Password) -> Result<Self, PasswordHashError> {
        let salt_bytes: [u8; PASSWORD_SALT_LEN] = rand::random();
        let salt = SaltString::encode_b64(&salt_bytes).map_err(PasswordHashError)?;

        let hash = Argon2::default()
            .hash_password(password.get().as_bytes(), &salt)
            .map_err(PasswordHashError)?;

        Ok(Self(hash.to_string()))
    }

    /// Wraps a digest read back from storage without re-checking its format.
    #[must_use]
    pub fn from_stored(digest: String) -> Self {
        Self(digest)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn verify(&self, password: &str) -> Result<bool, PasswordHashError> {
        let parsed = PasswordHash::new(&self.0).map_err(PasswordHashError)?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(PasswordHashError(err)),
        }
    }
}

impl Debug for PasswordDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasswordDigest").field(&"[redacted]").finish()
    }
}
