use std::fmt;

use thiserror::Error;

/// Number of random bytes behind a generated code; hex encoding doubles it.
pub const GENERATED_CODE_BYTES: usize = 4;

pub const MAX_SHORT_CODE_LEN: usize = 32;

/// Paths served by the router itself, which a short code would shadow.
const RESERVED_CODES: &[&str] = &["shorten", "url", "cleanup", "errorPage"];

/// The token a visitor puts after the host to reach an original URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must not be empty")]
    Empty,
    #[error("short code is {len} characters long; the maximum is {MAX_SHORT_CODE_LEN}")]
    TooLong { len: usize },
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
    #[error("short code {0} is reserved")]
    Reserved(String),
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] when `code` is empty, too long, contains anything
    /// but ASCII alphanumerics, `-` and `_`, or collides with a route name.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        if code.is_empty() {
            return Err(ShortCodeValidationError::Empty);
        }

        let len = code.chars().count();
        if len > MAX_SHORT_CODE_LEN {
            return Err(ShortCodeValidationError::TooLong { len });
        }

        let invalid_chars: String = code
            .chars()
            .filter(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        if RESERVED_CODES.contains(&code.as_str()) {
            return Err(ShortCodeValidationError::Reserved(code));
        }

        Ok(Self(code))
    }

    /// Wraps a code read back from the store, where it was validated on write.
    pub(crate) const fn from_stored(code: String) -> Self {
        Self(code)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of candidate short codes. Candidates are not unique on their own;
/// the caller checks them against the store.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

pub struct RandomHexCodes;

impl CodeGenerator for RandomHexCodes {
    fn generate(&self) -> ShortCode {
        let bytes: [u8; GENERATED_CODE_BYTES] = rand::random();
        ShortCode(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
    }
}
