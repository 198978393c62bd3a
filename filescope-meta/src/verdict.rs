//! Tri-state well-formedness verdict.

use std::borrow::Cow;
use std::fmt;

use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Outcome of a conformance check.
///
/// `Unknown` means validation was intentionally skipped. It must never be
/// conflated with `False`, which means the check ran and failed or could not
/// run although it was required to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WellFormed {
    True,
    False,
    #[default]
    Unknown,
}

impl WellFormed {
    /// Reduce many verdicts into one.
    ///
    /// Any `False` dominates. Otherwise a single `True` makes the result
    /// `True`. Only an all-`Unknown` (or empty) input stays `Unknown`.
    /// The result does not depend on input order.
    #[must_use]
    pub fn reduce<I>(verdicts: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        verdicts.into_iter().fold(Self::Unknown, Self::and)
    }

    /// Pairwise step of [`WellFormed::reduce`].
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::Unknown, Self::Unknown) => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub fn is_false(self) -> bool {
        self == Self::False
    }
}

impl From<bool> for WellFormed {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl From<Option<bool>> for WellFormed {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Unknown, Self::from)
    }
}

impl fmt::Display for WellFormed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl Serialize for WellFormed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WellFormed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<bool>::deserialize(deserializer).map(Self::from)
    }
}

impl JsonSchema for WellFormed {
    fn schema_name() -> Cow<'static, str> {
        "WellFormed".into()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <Option<bool>>::json_schema(generator)
    }
}
