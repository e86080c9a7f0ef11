//! Cache keys and invalidation patterns
//!
//! Keys have the textual form `namespace:campaign:discriminator`, with `*`
//! standing for an absent segment. Only the namespace is lower-cased; campaign
//! ids and row ids are kept as given, with `%`, `:` and `*` percent-escaped so
//! a segment can never be mistaken for a separator or a wildcard:
//!
//! | Read | Key |
//! |---|---|
//! | NPCs of campaign C1 | `npcs:c1:*` |
//! | NPC `n7` | `npcs:*:n7` |
//! | Interactions of NPC `n7` | `npc_interactions:c1:n7` |
//! | All entities of C1 | `all_entities:c1:*` |
//! | NPC `a:b` | `npcs:*:a%3Ab` |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// Placeholder for an absent key segment
pub const ANY_SEGMENT: &str = "*";

/// Namespace of the aggregate entity read
pub const ALL_ENTITIES: &str = "all_entities";

/// A normalized cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '*' => escaped.push_str("%2A"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn namespace_segment(namespace: &str) -> String {
    segment(Some(&namespace.trim().to_lowercase()))
}

/// Blank values are absent; anything else is kept verbatim
fn segment(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => escape(v),
        _ => ANY_SEGMENT.to_string(),
    }
}

impl CacheKey {
    /// Build a key from its three segments
    pub fn new(namespace: &str, campaign: Option<&str>, discriminator: Option<&str>) -> Self {
        Self(format!(
            "{}:{}:{}",
            namespace_segment(namespace),
            segment(campaign),
            segment(discriminator)
        ))
    }

    /// Key for a resource list, optionally scoped to a campaign
    pub fn list(resource: Resource, campaign: Option<&str>) -> Self {
        Self::new(resource.table(), campaign, None)
    }

    /// Key for a single row looked up by id
    pub fn item(resource: Resource, id: &str) -> Self {
        Self::new(resource.table(), None, Some(id))
    }

    /// Key for the aggregate entity read of a campaign
    pub fn all_entities(campaign: &str) -> Self {
        Self::new(ALL_ENTITIES, Some(campaign), None)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment (resource table or aggregate name)
    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Campaign segment as it appears in the key (escaped), if present
    pub fn campaign(&self) -> Option<&str> {
        self.0
            .split(':')
            .nth(1)
            .filter(|segment| *segment != ANY_SEGMENT)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects cache entries to drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationPattern {
    /// A single key
    Exact(CacheKey),
    /// Every key starting with the prefix
    Prefix(String),
    /// Everything
    All,
}

impl InvalidationPattern {
    /// Check whether a key is covered by the pattern
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            InvalidationPattern::Exact(exact) => exact == key,
            InvalidationPattern::Prefix(prefix) => key.as_str().starts_with(prefix.as_str()),
            InvalidationPattern::All => true,
        }
    }

    /// Patterns covering everything a write to `resource` may have made stale
    ///
    /// With a campaign: that campaign's entries, campaign-agnostic entries of
    /// the resource (item reads, cross-campaign lists) and the campaign's
    /// `all_entities` aggregate. Without one: every entry of the resource and
    /// every aggregate.
    pub fn for_write(resource: Resource, campaign: Option<&str>) -> Vec<InvalidationPattern> {
        let table = resource.table();
        match campaign.map(|c| segment(Some(c))) {
            Some(campaign) if campaign != ANY_SEGMENT => vec![
                InvalidationPattern::Prefix(format!("{table}:{campaign}:")),
                InvalidationPattern::Prefix(format!("{table}:{ANY_SEGMENT}:")),
                InvalidationPattern::Prefix(format!("{ALL_ENTITIES}:{campaign}:")),
            ],
            _ => vec![
                InvalidationPattern::Prefix(format!("{table}:")),
                InvalidationPattern::Prefix(format!("{ALL_ENTITIES}:")),
            ],
        }
    }
}

impl From<&str> for InvalidationPattern {
    /// Parse a textual pattern; a trailing `*` makes it a prefix pattern
    ///
    /// The text is in key form: the namespace is case-insensitive, the other
    /// segments are matched as written.
    fn from(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern == ANY_SEGMENT {
            return InvalidationPattern::All;
        }
        let pattern = match pattern.split_once(':') {
            Some((namespace, rest)) => format!("{}:{rest}", namespace.to_lowercase()),
            None => pattern.to_lowercase(),
        };
        match pattern.strip_suffix(ANY_SEGMENT) {
            Some(prefix) => InvalidationPattern::Prefix(prefix.to_string()),
            None => InvalidationPattern::Exact(CacheKey(pattern)),
        }
    }
}

impl From<CacheKey> for InvalidationPattern {
    fn from(key: CacheKey) -> Self {
        InvalidationPattern::Exact(key)
    }
}
