use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of entity categories a policy can select.
///
/// Device, network and location identifiers all roll up into `Metadata`;
/// the originating subrule is kept in [`Span::source`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Email,
    Phone,
    PostalCode,
    PersonName,
    Address,
    Organization,
    GovernmentId,
    Financial,
    Credentials,
    Health,
    Metadata,
}

impl EntityType {
    pub const ALL: [EntityType; 11] = [
        EntityType::Email,
        EntityType::Phone,
        EntityType::PostalCode,
        EntityType::PersonName,
        EntityType::Address,
        EntityType::Organization,
        EntityType::GovernmentId,
        EntityType::Financial,
        EntityType::Credentials,
        EntityType::Health,
        EntityType::Metadata,
    ];

    /// The wire tag used in policies and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Email => "email",
            EntityType::Phone => "phone",
            EntityType::PostalCode => "postal_code",
            EntityType::PersonName => "person_name",
            EntityType::Address => "address",
            EntityType::Organization => "organization",
            EntityType::GovernmentId => "government_id",
            EntityType::Financial => "financial",
            EntityType::Credentials => "credentials",
            EntityType::Health => "health",
            EntityType::Metadata => "metadata",
        }
    }

    /// Parse a wire tag; unknown tags yield `None` so lenient policy
    /// normalization can drop them silently.
    pub fn from_tag(tag: &str) -> Option<EntityType> {
        EntityType::ALL.into_iter().find(|t| t.as_str() == tag)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous, typed region of the input.
///
/// Offsets are byte positions into the scanned text, half-open
/// (`start < end`), both within bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub score: f64,
    pub source: String,
}

impl Span {
    pub fn new(
        entity_type: EntityType,
        start: usize,
        end: usize,
        text: impl Into<String>,
        score: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            start,
            end,
            text: text.into(),
            score,
            source: source.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Two spans overlap when they share at least one byte.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}
