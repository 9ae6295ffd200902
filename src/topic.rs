//! Hierarchical topic filters for broker subscriptions.
//!
//! Topics are `/`-delimited strings (`domus/devices/tv/uuid:123/power/set`).
//! A subscription pattern is compiled into a [`TopicFilter`] whose segments
//! are compared level by level against a concrete topic:
//!
//! - a literal segment matches its topic level exactly (case-sensitive)
//! - `+` matches exactly one non-empty topic level
//! - `#` is only valid as the final segment and matches zero or more
//!   trailing levels
//!
//! This is deliberately a structural comparison and not a glob match: glob
//! wildcards are not level-bounded, so `+` and `#` become indistinguishable
//! under them.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while compiling a subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("Pattern is empty")]
    Empty,

    #[error("Pattern contains an empty segment at level {0}")]
    EmptySegment(usize),

    #[error("Multi-level wildcard is only valid as the final segment (found at level {0})")]
    MultiLevelNotLast(usize),

    #[error("Wildcard must occupy its whole segment: '{0}'")]
    PartialWildcard(String),
}

/// One level of a compiled subscription pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches one topic level exactly
    Literal(String),

    /// `+` - matches exactly one non-empty topic level
    SingleLevel,

    /// `#` - matches the remaining topic levels, including none
    MultiLevel,
}

/// A compiled subscription pattern
///
/// Compiled once at plugin registration time; matching afterwards is
/// allocation-free on the pattern side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicFilter {
    /// Compiles a raw pattern string into a filter
    ///
    /// Rejects empty patterns, empty segments, a multi-level wildcard in a
    /// non-final position, and wildcards glued to literal characters
    /// (`tv+`, `power#`).
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let parts: Vec<&str> = pattern.split('/').collect();
        let last = parts.len() - 1;

        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let segment = match *part {
                "" => return Err(PatternError::EmptySegment(index)),
                "+" => Segment::SingleLevel,
                "#" if index == last => Segment::MultiLevel,
                "#" => return Err(PatternError::MultiLevelNotLast(index)),
                literal => {
                    if literal.contains('+') || literal.contains('#') {
                        return Err(PatternError::PartialWildcard(literal.to_string()));
                    }
                    Segment::Literal(literal.to_string())
                }
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Segment-wise comparison of this filter against a concrete topic
    pub fn matches(&self, topic: &str) -> bool {
        let levels: Vec<&str> = topic.split('/').collect();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                // Always the final segment; swallows the rest of the topic,
                // including an empty rest.
                Segment::MultiLevel => return true,
                Segment::SingleLevel => match levels.get(index) {
                    Some(level) if !level.is_empty() => {}
                    _ => return false,
                },
                Segment::Literal(value) => {
                    if levels.get(index).copied() != Some(value.as_str()) {
                        return false;
                    }
                }
            }
        }

        // Without a trailing multi-level wildcard the level counts must agree.
        levels.len() == self.segments.len()
    }

    /// The raw pattern string, as handed to the broker on SUBSCRIBE
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl FromStr for TopicFilter {
    type Err = PatternError;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        Self::parse(pattern)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
