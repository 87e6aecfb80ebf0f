use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub uid: String,
    pub email: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Authentication token required")]
    MissingToken,
    #[error("Authentication failed")]
    InvalidToken,
    #[error("identity service unavailable: {0}")]
    Unavailable(String),
}

/// Verifies bearer credentials presented at connect time.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

#[derive(Debug, Clone, Deserialize)]
struct TokenEntry {
    uid: String,
    #[serde(default)]
    email: Option<String>,
}

/// Static token table, `{"<token>": {"uid": "...", "email": "..."}}`.
#[derive(Debug, Clone, Default)]
pub struct TokenTableVerifier {
    tokens: HashMap<String, VerifiedIdentity>,
}

impl TokenTableVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, uid: &str, email: Option<&str>) -> Self {
        self.tokens.insert(
            token.to_string(),
            VerifiedIdentity {
                uid: uid.to_string(),
                email: email.map(str::to_string),
            },
        );
        self
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, TokenEntry> = serde_json::from_str(raw)?;
        let tokens = entries
            .into_iter()
            .filter(|(token, entry)| !token.trim().is_empty() && !entry.uid.trim().is_empty())
            .map(|(token, entry)| {
                (
                    token,
                    VerifiedIdentity {
                        uid: entry.uid,
                        email: entry.email,
                    },
                )
            })
            .collect();
        Ok(Self { tokens })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|err| IdentityError::Unavailable(err.to_string()))?;
        Self::from_json(&raw).map_err(|err| IdentityError::Unavailable(err.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for TokenTableVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::MissingToken);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(IdentityError::InvalidToken)
    }
}
