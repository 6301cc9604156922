use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const READ_SCOPE: &str = "meteringpoints.read";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("insufficient scope: {0}")]
    MissingScope(String),
    #[error("token has no subject")]
    MissingSubject,
}

/// Decoded bearer token claims. Timestamps are seconds since the epoch.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InternalToken {
    #[serde(rename = "iat")]
    pub issued: i64,
    #[serde(rename = "exp")]
    pub expires: i64,
    #[serde(default)]
    pub actor: String,
    #[serde(rename = "sub", default)]
    pub subject: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

impl InternalToken {
    pub fn issue(
        actor: impl Into<String>,
        subject: impl Into<String>,
        scope: &[&str],
        ttl_seconds: i64,
    ) -> Self {
        let issued = now_seconds();
        Self {
            issued,
            expires: issued + ttl_seconds,
            actor: actor.into(),
            subject: subject.into(),
            scope: scope.iter().map(|value| value.to_string()).collect(),
        }
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        self.issued <= now && now < self.expires
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|granted| granted == scope)
    }
}

pub fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

pub trait TokenCodec: Send + Sync {
    fn encode(&self, token: &InternalToken) -> Result<String, AccessError>;
    fn decode(&self, raw: &str) -> Result<InternalToken, AccessError>;
}

/// HS256 codec keyed by a shared secret.
pub struct JwtTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtTokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn shared(secret: &[u8]) -> Arc<Self> {
        Arc::new(Self::new(secret))
    }
}

impl TokenCodec for JwtTokenCodec {
    fn encode(&self, token: &InternalToken) -> Result<String, AccessError> {
        encode(&Header::new(Algorithm::HS256), token, &self.encoding)
            .map_err(|err| AccessError::InvalidToken(err.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<InternalToken, AccessError> {
        let data = decode::<InternalToken>(raw, &self.decoding, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AccessError::Expired,
                _ => AccessError::InvalidToken(err.to_string()),
            }
        })?;
        let token = data.claims;
        let now = now_seconds();
        if now >= token.expires {
            return Err(AccessError::Expired);
        }
        if !token.is_valid_at(now) {
            return Err(AccessError::InvalidToken("token issued in the future".to_string()));
        }
        Ok(token)
    }
}

/// Accepts both `Bearer: <token>` and `Bearer <token>`.
pub fn extract_bearer_token(authorization: &str) -> Option<&str> {
    let value = authorization.trim();
    let token = value
        .strip_prefix("Bearer:")
        .or_else(|| value.strip_prefix("Bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Decides whether a caller may reach the Query Engine and under which
/// subject its rows are scoped.
#[derive(Clone)]
pub struct AccessGate {
    codec: Arc<dyn TokenCodec>,
}

impl AccessGate {
    pub fn new(codec: Arc<dyn TokenCodec>) -> Self {
        Self { codec }
    }

    pub fn authenticate(&self, authorization: Option<&str>) -> Result<InternalToken, AccessError> {
        let raw = authorization
            .and_then(extract_bearer_token)
            .ok_or(AccessError::MissingToken)?;
        self.codec.decode(raw)
    }

    pub fn has_scope(&self, token: &InternalToken, scope: &str) -> bool {
        token.has_scope(scope)
    }

    pub fn require_scope(
        &self,
        authorization: Option<&str>,
        scope: &str,
    ) -> Result<InternalToken, AccessError> {
        let token = self.authenticate(authorization)?;
        if !self.has_scope(&token, scope) {
            return Err(AccessError::MissingScope(scope.to_string()));
        }
        Ok(token)
    }

    pub fn subject<'a>(&self, token: &'a InternalToken) -> Result<&'a str, AccessError> {
        if token.subject.trim().is_empty() {
            return Err(AccessError::MissingSubject);
        }
        Ok(&token.subject)
    }
}
