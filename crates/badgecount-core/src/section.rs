//! The closed notification section vocabulary.
//!
//! Notifications are grouped into two real sections, alerts and messages,
//! plus a derived "all" pseudo-section. The "all" bucket is never counted
//! independently: it is always the re-capped sum of the counted sections
//! and the max of their timestamps.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A notification section.
///
/// The set is fixed. Code that needs "every section that is actually
/// counted" should iterate [`Section::COUNTED`] rather than matching on
/// all variants, so the derived `All` bucket can never be double-counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Alert,
    Message,
    /// Union of the counted sections. Always derived, never stored.
    All,
}

impl Section {
    /// The sections that are counted directly from the event store.
    pub const COUNTED: [Self; 2] = [Self::Alert, Self::Message];

    /// Stable wire/cache-key name for this section.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Message => "message",
            Self::All => "all",
        }
    }

    /// Parse a stable section name back to a `Section`.
    #[must_use]
    pub fn from_str_opt(name: &str) -> Option<Self> {
        match name {
            "alert" => Some(Self::Alert),
            "message" => Some(Self::Message),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
