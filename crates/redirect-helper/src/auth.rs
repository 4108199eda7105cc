//! Shared-secret authorization for the three token classes.
//!
//! A token is accepted only when the stored secret is non-empty and the
//! presented value matches it exactly. An empty stored secret disables the
//! capability until one is set.

use std::fmt;
use std::str::FromStr;

use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::store::Settings;

/// The three independent capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Listing and removal.
    Admin,
    /// Creating and updating path entries.
    Redirect,
    /// Creating and updating domain entries.
    Domain,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Admin => "admin",
            TokenKind::Redirect => "redirect",
            TokenKind::Domain => "domain",
        }
    }

    pub fn select<'a>(&self, settings: &'a Settings) -> &'a str {
        match self {
            TokenKind::Admin => &settings.admin_token,
            TokenKind::Redirect => &settings.redirect_token,
            TokenKind::Domain => &settings.domain_token,
        }
    }

    pub fn select_mut<'a>(&self, settings: &'a mut Settings) -> &'a mut String {
        match self {
            TokenKind::Admin => &mut settings.admin_token,
            TokenKind::Redirect => &mut settings.redirect_token,
            TokenKind::Domain => &mut settings.domain_token,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(TokenKind::Admin),
            "redirect" => Ok(TokenKind::Redirect),
            "domain" => Ok(TokenKind::Domain),
            other => Err(format!(
                "unknown token kind '{other}', expected admin, redirect or domain"
            )),
        }
    }
}

/// Why a presented token was refused. Callers only ever see "unauthorized";
/// the distinction is for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("{0} token not configured")]
    NotConfigured(TokenKind),

    #[error("invalid {0} token")]
    Invalid(TokenKind),
}

/// True iff `stored` is non-empty and equal to `presented`.
pub fn validate(presented: &str, stored: &str) -> bool {
    !stored.is_empty() && bool::from(presented.as_bytes().ct_eq(stored.as_bytes()))
}

/// [`validate`] with a reason attached, checked against the current settings.
pub fn authorize(kind: TokenKind, presented: &str, settings: &Settings) -> Result<(), AuthError> {
    let stored = kind.select(settings);
    if stored.is_empty() {
        return Err(AuthError::NotConfigured(kind));
    }
    if !validate(presented, stored) {
        return Err(AuthError::Invalid(kind));
    }
    Ok(())
}

/// New random token: 32 lowercase hex characters (a v4 UUID, 122 random bits).
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Shorten a secret for log output: first 8 characters then an ellipsis.
pub fn mask(token: &str) -> String {
    if token.is_empty() {
        return String::new();
    }
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}...")
}
