//! Capability matrix and checker selection.
//!
//! The registry is built once from the static table in
//! [`crate::checkers::registrations`] and is read-only afterwards. Selection
//! never fails: when nothing matches, the [`ScraperNotFound`] sentinel is
//! returned instead of an empty set.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::checker::{Checker, Query};
use crate::checkers::dummy::ScraperNotFound;
use crate::checkers::static_regex;
use crate::config::ToolConfig;

/// Ordering hints. Lower runs earlier.
pub mod priority {
    /// Conformance validators.
    pub const VALIDATOR: u8 = 10;
    /// Structure checkers that validate and extract metadata.
    pub const STRUCTURE: u8 = 20;
    /// Pure metadata extractors.
    pub const METADATA: u8 = 30;
    /// Cross-cutting signature checks.
    pub const SIGNATURE: u8 = 40;
}

/// A version grammar, compiled on first use and kept for the process.
///
/// Declared as a `static` next to the rows that use it:
///
/// ```
/// use filescope::registry::VersionPattern;
///
/// static PDFA_LEVEL: VersionPattern = VersionPattern::new(r"^A-[123][abu]$");
/// assert!(PDFA_LEVEL.is_match("A-2b"));
/// ```
pub struct VersionPattern {
    source: &'static str,
    compiled: OnceLock<Regex>,
}

impl VersionPattern {
    #[must_use]
    pub const fn new(source: &'static str) -> Self {
        Self {
            source,
            compiled: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.source
    }

    /// The compiled expression.
    ///
    /// # Panics
    ///
    /// Panics if the source is not a valid regex.
    #[must_use]
    pub fn regex(&self) -> &Regex {
        self.compiled.get_or_init(|| static_regex(self.source))
    }

    #[must_use]
    pub fn is_match(&self, version: &str) -> bool {
        self.regex().is_match(version)
    }
}

impl fmt::Debug for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VersionPattern").field(&self.source).finish()
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source)
    }
}

impl PartialEq for VersionPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for VersionPattern {}

/// Accepted versions of a capability row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMatch {
    /// Any version, including none.
    Any,
    /// Exact membership. An unknown version still matches.
    Listed(&'static [&'static str]),
    /// Anchored regular expression over version tags such as `A-2b`.
    /// An unknown version never matches.
    Pattern(&'static VersionPattern),
}

impl VersionMatch {
    #[must_use]
    pub fn matches(&self, version: Option<&str>) -> bool {
        match (self, version) {
            (Self::Any, _) | (Self::Listed(_), None) => true,
            (Self::Listed(versions), Some(v)) => versions.contains(&v),
            (Self::Pattern(_), None) => false,
            (Self::Pattern(pattern), Some(v)) => pattern.is_match(v),
        }
    }
}

/// Whether a row applies when well-formedness checking is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// The checker only validates; drop it when validation is off.
    Required,
    /// The checker also extracts metadata; keep it either way.
    Optional,
}

/// One row of the capability matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityEntry {
    pub mimetype: &'static str,
    pub versions: VersionMatch,
    pub validation: ValidationMode,
    /// Parameter that must be present for the row to apply.
    pub required_param: Option<&'static str>,
    pub priority: u8,
}

impl CapabilityEntry {
    #[must_use]
    pub const fn new(mimetype: &'static str) -> Self {
        Self {
            mimetype,
            versions: VersionMatch::Any,
            validation: ValidationMode::Optional,
            required_param: None,
            priority: priority::METADATA,
        }
    }

    #[must_use]
    pub const fn versions(mut self, versions: &'static [&'static str]) -> Self {
        self.versions = VersionMatch::Listed(versions);
        self
    }

    #[must_use]
    pub const fn pattern(mut self, pattern: &'static VersionPattern) -> Self {
        self.versions = VersionMatch::Pattern(pattern);
        self
    }

    #[must_use]
    pub const fn validation_only(mut self) -> Self {
        self.validation = ValidationMode::Required;
        self
    }

    #[must_use]
    pub const fn requires(mut self, param: &'static str) -> Self {
        self.required_param = Some(param);
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this row accepts the query.
    #[must_use]
    pub fn accepts(&self, query: &Query<'_>) -> bool {
        self.mimetype == query.mimetype
            && self.versions.matches(query.version)
            && (self.validation == ValidationMode::Optional || query.check_wellformed)
            && self
                .required_param
                .is_none_or(|param| query.params.contains_key(param))
    }
}

/// How a registration takes part in selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Selected through its own capability rows.
    Specialized,
    /// Appended to any non-empty specialized selection it supports.
    CrossCutting { priority: u8 },
}

/// One row of the static registration table.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub factory: fn(&ToolConfig) -> Box<dyn Checker>,
    pub scope: Scope,
}

impl Registration {
    #[must_use]
    pub const fn specialized(factory: fn(&ToolConfig) -> Box<dyn Checker>) -> Self {
        Self {
            factory,
            scope: Scope::Specialized,
        }
    }

    #[must_use]
    pub const fn cross_cutting(
        factory: fn(&ToolConfig) -> Box<dyn Checker>,
        priority: u8,
    ) -> Self {
        Self {
            factory,
            scope: Scope::CrossCutting { priority },
        }
    }
}

struct Registered {
    checker: Box<dyn Checker>,
    scope: Scope,
}

/// Checkers chosen for one query, in execution order.
pub struct Selection<'r> {
    pub checkers: Vec<&'r dyn Checker>,
    /// `true` when only the [`ScraperNotFound`] sentinel was selected.
    pub not_recognized: bool,
}

impl Selection<'_> {
    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.checkers.iter().map(|c| c.id()).collect()
    }
}

/// The capability matrix, instantiated.
pub struct Registry {
    entries: Vec<Registered>,
    not_found: ScraperNotFound,
}

impl Registry {
    /// Build the registry from the shipped registration table.
    #[must_use]
    pub fn new(config: &ToolConfig) -> Self {
        Self::from_registrations(&crate::checkers::registrations(), config)
    }

    #[must_use]
    pub fn from_registrations(registrations: &[Registration], config: &ToolConfig) -> Self {
        let entries = registrations
            .iter()
            .map(|registration| Registered {
                checker: (registration.factory)(config),
                scope: registration.scope,
            })
            .collect();
        Self {
            entries,
            not_found: ScraperNotFound,
        }
    }

    /// Select the ordered checker set for `query`.
    #[must_use]
    pub fn select(&self, query: &Query<'_>) -> Selection<'_> {
        let mut chosen: Vec<(u8, usize, &dyn Checker)> = Vec::new();

        for (position, entry) in self.entries.iter().enumerate() {
            if entry.scope != Scope::Specialized || !entry.checker.is_supported(query) {
                continue;
            }
            let rank = entry
                .checker
                .capabilities()
                .iter()
                .filter(|row| row.accepts(query))
                .map(|row| row.priority)
                .min()
                .unwrap_or(priority::METADATA);
            chosen.push((rank, position, entry.checker.as_ref()));
        }

        if chosen.is_empty() {
            tracing::debug!(mimetype = query.mimetype, "no checker supports mimetype");
            return Selection {
                checkers: vec![&self.not_found as &dyn Checker],
                not_recognized: true,
            };
        }

        for (position, entry) in self.entries.iter().enumerate() {
            if let Scope::CrossCutting { priority } = entry.scope
                && entry.checker.is_supported(query)
            {
                chosen.push((priority, position, entry.checker.as_ref()));
            }
        }

        chosen.sort_by_key(|(rank, position, _)| (*rank, *position));
        Selection {
            checkers: chosen.into_iter().map(|(_, _, checker)| checker).collect(),
            not_recognized: false,
        }
    }

    /// All registered checkers in declaration order.
    pub fn checkers(&self) -> impl Iterator<Item = &dyn Checker> {
        self.entries.iter().map(|entry| entry.checker.as_ref())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&dyn Checker> {
        self.checkers().find(|checker| checker.id() == id)
    }

    /// Every mimetype with at least one specialized capability row, sorted.
    #[must_use]
    pub fn mimetypes(&self) -> Vec<&'static str> {
        let mut mimetypes: Vec<&'static str> = self
            .checkers()
            .flat_map(|checker| checker.capabilities().iter().map(|row| row.mimetype))
            .collect();
        mimetypes.sort_unstable();
        mimetypes.dedup();
        mimetypes
    }
}
