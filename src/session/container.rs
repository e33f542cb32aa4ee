//! Session Container
//!
//! Caches the latest session token per collection and partition key range.
//! Tokens arriving on responses are merged into the cached value, so a
//! later read in the same session can demand at least what earlier writes
//! produced.
//!
//! Compound form for one collection: `{rangeId}:{token}[,{rangeId}:{token}]*`

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::errors::{SessionResult, SessionTokenError};
use super::token::SessionToken;
use crate::observability::{log_event_with_fields, Event};

const RANGE_SEPARATOR: char = ':';
const COMPOUND_SEPARATOR: char = ',';

/// Per-collection, per-range session token cache.
#[derive(Debug, Default)]
pub struct SessionContainer {
    tokens: RwLock<HashMap<String, BTreeMap<String, SessionToken>>>,
}

impl SessionContainer {
    /// Create an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token for a partition key range.
    pub fn resolve(&self, collection: &str, range_id: &str) -> Option<SessionToken> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        tokens
            .get(collection)
            .and_then(|ranges| ranges.get(range_id))
            .cloned()
    }

    /// Merge `token` into the cached value and return the result.
    ///
    /// A region-set conflict leaves the cached value untouched.
    pub fn apply(
        &self,
        collection: &str,
        range_id: &str,
        token: &SessionToken,
    ) -> SessionResult<SessionToken> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let ranges = tokens.entry(collection.to_string()).or_default();

        let merged = match ranges.get(range_id) {
            Some(existing) => existing.merge(token).map_err(|e| {
                log_event_with_fields(
                    Event::SessionTokenConflict,
                    &[
                        ("collection", collection),
                        ("range", range_id),
                        ("error", e.to_string().as_str()),
                    ],
                );
                e
            })?,
            None => token.clone(),
        };

        ranges.insert(range_id.to_string(), merged.clone());
        Ok(merged)
    }

    /// Merge every entry of a compound token string.
    pub fn apply_compound(&self, collection: &str, compound: &str) -> SessionResult<()> {
        for (range_id, token) in parse_compound(compound)? {
            self.apply(collection, &range_id, &token)?;
        }
        Ok(())
    }

    /// Render the collection's tokens in compound form, ranges ascending.
    pub fn compound_token(&self, collection: &str) -> Option<String> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        let ranges = tokens.get(collection)?;
        if ranges.is_empty() {
            return None;
        }
        let parts: Vec<String> = ranges
            .iter()
            .map(|(range, token)| format!("{}{}{}", range, RANGE_SEPARATOR, token))
            .collect();
        Some(parts.join(&COMPOUND_SEPARATOR.to_string()))
    }

    /// Forget a collection, e.g. after it was recreated.
    pub fn clear(&self, collection: &str) {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        tokens.remove(collection);
    }
}

/// Parse `{rangeId}:{token}` pairs separated by commas.
pub fn parse_compound(compound: &str) -> SessionResult<Vec<(String, SessionToken)>> {
    compound
        .split(COMPOUND_SEPARATOR)
        .map(|entry| {
            let (range, token) = entry.split_once(RANGE_SEPARATOR).ok_or_else(|| {
                SessionTokenError::malformed(entry, "missing partition key range id")
            })?;
            if range.is_empty() {
                return Err(SessionTokenError::malformed(entry, "empty partition key range id"));
            }
            Ok((range.to_string(), SessionToken::parse(token)?))
        })
        .collect()
}
