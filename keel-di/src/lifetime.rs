//! Service lifetimes.

use std::fmt;

/// How long a resolved instance lives and who shares it.
///
/// - `Singleton`: one instance per root provider, shared by every scope created from it.
/// - `Scoped`: one instance per scope.
/// - `Transient`: a new instance for every resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lifetime {
    /// One instance per root provider.
    Singleton,
    /// One instance per scope.
    Scoped,
    /// A new instance on every resolution.
    Transient,
}

impl Lifetime {
    /// Get lifetime from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "singleton" => Some(Lifetime::Singleton),
            "scoped" => Some(Lifetime::Scoped),
            "transient" => Some(Lifetime::Transient),
            _ => None,
        }
    }

    /// Get lifetime name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::Singleton => "singleton",
            Lifetime::Scoped => "scoped",
            Lifetime::Transient => "transient",
        }
    }

    /// Whether an instance with this lifetime may hold on to one with `dependency`'s
    /// lifetime without capturing it past its scope.
    pub fn can_depend_on(&self, dependency: Lifetime) -> bool {
        !matches!((self, dependency), (Lifetime::Singleton, Lifetime::Scoped))
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
