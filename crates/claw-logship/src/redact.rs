//! Masking of secret values in log lines.
//!
//! Every occurrence of a configured secret is replaced with a fixed mask
//! ([`DEFAULT_MASK`]) whatever the secret's length, so masked output does not
//! reveal how long a secret was. Matching is exact and case-sensitive, scans
//! left to right and never overlaps; where secrets overlap, the longest one
//! starting at a position wins.
//!
//! A secret that occurs inside the mask itself (e.g. `*`) is rejected, since
//! masking could never remove it.

use std::borrow::Cow;
use std::io;

use regex::Regex;

use crate::error::{Result, ShipError};
use crate::framer::LineSink;

/// Token that replaces each secret occurrence.
pub const DEFAULT_MASK: &str = "********";

/// Replaces secret substrings in lines.
#[derive(Debug, Clone)]
pub struct Redactor {
    pattern: Option<Regex>,
    mask: String,
    secrets: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::disabled()
    }
}

impl Redactor {
    /// Creates a redactor for the given secrets.
    ///
    /// Empty strings are ignored; an empty list yields a pass-through redactor.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a secret occurs inside the mask, or if
    /// the secrets cannot be compiled into a matcher (for example, the
    /// combined pattern is too large).
    pub fn new<I, S>(secrets: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();

        if secrets.is_empty() {
            return Ok(Self::disabled());
        }
        check_mask(DEFAULT_MASK, &secrets)?;

        let alternation = secrets
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&alternation)
            .map_err(|e| ShipError::config(format!("cannot compile secret matcher: {e}")))?;

        Ok(Self {
            pattern: Some(pattern),
            mask: DEFAULT_MASK.to_string(),
            secrets,
        })
    }

    /// Creates a redactor that masks nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            pattern: None,
            mask: DEFAULT_MASK.to_string(),
            secrets: Vec::new(),
        }
    }

    /// Uses a custom mask token.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a configured secret occurs inside
    /// `mask`.
    pub fn with_mask(mut self, mask: impl Into<String>) -> Result<Self> {
        let mask = mask.into();
        check_mask(&mask, &self.secrets)?;
        self.mask = mask;
        Ok(self)
    }

    /// Returns the number of distinct non-empty secrets.
    #[must_use]
    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    /// Returns true if at least one secret is configured.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.pattern.is_some()
    }

    /// Masks every secret in `line`. Lines without secrets are borrowed unchanged.
    #[must_use]
    pub fn redact<'a>(&self, line: &'a str) -> Cow<'a, str> {
        match &self.pattern {
            Some(pattern) => pattern.replace_all(line, regex::NoExpand(&self.mask)),
            None => Cow::Borrowed(line),
        }
    }
}

fn check_mask(mask: &str, secrets: &[String]) -> Result<()> {
    match secrets.iter().position(|secret| mask.contains(secret.as_str())) {
        Some(index) => Err(ShipError::config(format!(
            "secret #{} occurs inside the mask and could not be hidden",
            index + 1
        ))),
        None => Ok(()),
    }
}

/// A [`LineSink`] that masks secrets before forwarding lines.
#[derive(Debug)]
pub struct RedactingSink<S> {
    redactor: Redactor,
    inner: S,
}

impl<S: LineSink> RedactingSink<S> {
    /// Wraps `inner`.
    pub const fn new(redactor: Redactor, inner: S) -> Self {
        Self { redactor, inner }
    }

    /// Returns the wrapped sink.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the wrapped sink mutably.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Unwraps the sink.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: LineSink> LineSink for RedactingSink<S> {
    fn accept_line(&mut self, line: &str) -> io::Result<()> {
        let masked = self.redactor.redact(line);
        self.inner.accept_line(&masked)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
