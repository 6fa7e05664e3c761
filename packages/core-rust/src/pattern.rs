//! Path filters for middlewares.
//!
//! A [`PathPattern`] matches request paths the way a mount path does: the
//! pattern's segments must match a *prefix* of the path's segments, so
//! `/api` matches `/api` and `/api/users` but not `/apis`. Segments may be
//! literals (ASCII case-insensitive), `:name` parameters, or a trailing `*`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A parsed path filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<PatternSegment>,
}

/// Errors raised while parsing a path pattern.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("path pattern must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("path pattern has an unnamed parameter: {0}")]
    UnnamedParam(String),
    #[error("wildcard must be the last segment: {0}")]
    WildcardNotLast(String),
}

impl PathPattern {
    /// Parses a pattern such as `/api/:version/*`.
    ///
    /// # Errors
    ///
    /// Returns an error for patterns without a leading slash, `:` without a
    /// name, or a `*` that is not the final segment.
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        if !source.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(source.to_owned()));
        }

        let raw: Vec<&str> = split_segments(source).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            let parsed = if *segment == "*" {
                if i + 1 != raw.len() {
                    return Err(PatternError::WildcardNotLast(source.to_owned()));
                }
                PatternSegment::Wildcard
            } else if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::UnnamedParam(source.to_owned()));
                }
                PatternSegment::Param(name.to_owned())
            } else {
                PatternSegment::Literal((*segment).to_owned())
            };
            segments.push(parsed);
        }

        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Matches `path` and returns the captured `:name` parameters.
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        let mut parts = split_segments(path);

        for segment in &self.segments {
            match segment {
                PatternSegment::Wildcard => return Some(params),
                PatternSegment::Literal(literal) => {
                    if !parts.next()?.eq_ignore_ascii_case(literal) {
                        return None;
                    }
                }
                PatternSegment::Param(name) => {
                    params.insert(name.clone(), parts.next()?.to_owned());
                }
            }
        }
        Some(params)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for PathPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for PathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::parse(&source).map_err(serde::de::Error::custom)
    }
}
