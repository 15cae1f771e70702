//! Cache key construction and pattern scoping.

use std::fmt::{self, Display};
use std::sync::Arc;
use tessera_core::{EntityId, TesseraError, TesseraResult};

/// Well-known scopes shared by every service mirroring the same entities.
pub mod scopes {
    /// User profile entries.
    pub const USER: &str = "user";
    /// User validation/eligibility entries.
    pub const VALIDATION: &str = "validation";
    /// Short-lived confirmation tokens.
    pub const TOKEN: &str = "token";
}

const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', ']', '\\'];

/// A namespaced cache key, `{prefix}:{scope}:{identifier}`.
///
/// Only [`KeyCodec`] creates keys, so every key in the process carries a
/// validated prefix, scope and identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds keys and patterns under a single service prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: Arc<str>,
}

impl KeyCodec {
    /// Creates a codec for `prefix`.
    ///
    /// The prefix must be non-empty and free of `:` and glob characters;
    /// otherwise a scoped pattern could match keys of another prefix.
    pub fn new(prefix: impl Into<String>) -> TesseraResult<Self> {
        let prefix = prefix.into();
        if prefix.trim().is_empty() {
            return Err(TesseraError::invalid_key("key prefix cannot be empty"));
        }
        if prefix.contains(':') || prefix.contains(GLOB_METACHARACTERS) {
            return Err(TesseraError::invalid_key(format!(
                "key prefix '{}' must not contain ':' or glob characters",
                prefix
            )));
        }
        Ok(Self {
            prefix: prefix.into(),
        })
    }

    /// Returns the configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Builds `{prefix}:{scope}:{identifier}`.
    pub fn key(&self, scope: &str, identifier: impl Display) -> TesseraResult<CacheKey> {
        validate_scope(scope)?;
        let identifier = identifier.to_string();
        if identifier.trim().is_empty() {
            return Err(TesseraError::invalid_key(format!(
                "identifier for scope '{}' cannot be empty",
                scope
            )));
        }
        Ok(CacheKey(format!("{}:{}:{}", self.prefix, scope, identifier)))
    }

    /// Key of an entity in a scope. Entity ids are never empty, so only the
    /// scope can be rejected.
    pub fn entity(&self, scope: &str, id: EntityId) -> TesseraResult<CacheKey> {
        self.key(scope, id)
    }

    /// Key of a user profile entry.
    #[must_use]
    pub fn user(&self, id: EntityId) -> CacheKey {
        CacheKey(format!("{}:{}:{}", self.prefix, scopes::USER, id))
    }

    /// Key of a user validation entry.
    #[must_use]
    pub fn validation(&self, id: EntityId) -> CacheKey {
        CacheKey(format!("{}:{}:{}", self.prefix, scopes::VALIDATION, id))
    }

    /// Scopes a glob pattern under the prefix: `user:*` becomes `{prefix}:user:*`.
    pub fn scoped_pattern(&self, pattern: &str) -> TesseraResult<String> {
        if pattern.trim().is_empty() {
            return Err(TesseraError::invalid_key("pattern cannot be empty"));
        }
        Ok(format!("{}:{}", self.prefix, pattern))
    }

    /// Returns true if `key` lives under this codec's prefix.
    #[must_use]
    pub fn owns(&self, key: &str) -> bool {
        key.strip_prefix(&*self.prefix)
            .is_some_and(|rest| rest.starts_with(':'))
    }
}

fn validate_scope(scope: &str) -> TesseraResult<()> {
    if scope.trim().is_empty() {
        return Err(TesseraError::invalid_key("scope cannot be empty"));
    }
    if scope.contains(GLOB_METACHARACTERS) {
        return Err(TesseraError::invalid_key(format!(
            "scope '{}' must not contain glob characters",
            scope
        )));
    }
    Ok(())
}

/// Matches `text` against a glob supporting `*` (any run) and `?` (one char).
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_text = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_text = t;
            p += 1;
        } else if let Some(star_pos) = star {
            p = star_pos + 1;
            star_text += 1;
            t = star_text;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
