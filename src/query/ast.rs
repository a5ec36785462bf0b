//! C8 AST: the tree the parser builds and the matcher evaluates.
//!
//! Boolean structure (`And`/`Or`/`Not`) and the per-sub-expression
//! modifiers (`case:`/`nocase:`, `path:`/`nopath:`, `regex:`/`noregex:`)
//! are ordinary tree nodes rather than flags threaded imperatively,
//! which is the natural idiomatic-Rust shape for "sets X on
//! sub-expression" (spec §4.9) — the C original mutates a flags bitmask
//! while walking postfix; here the override is just another node the
//! evaluator folds into the `Flags` it passes down.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKindFilter {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Range,
}

/// A half-open numeric range: matches `lo <= value < hi` when `hi` is
/// `Some`, or `lo <= value` when `hi` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericAtom {
    pub lo: i64,
    pub hi: Option<i64>,
}

impl NumericAtom {
    pub fn matches(&self, value: i64) -> bool {
        value >= self.lo && self.hi.map_or(true, |hi| value < hi)
    }

    pub fn at_least(lo: i64) -> Self {
        NumericAtom { lo, hi: None }
    }

    pub fn below(hi: i64) -> Self {
        NumericAtom { lo: i64::MIN, hi: Some(hi) }
    }

    pub fn half_open(lo: i64, hi: i64) -> Self {
        NumericAtom { lo, hi: Some(hi) }
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    MatchCase(bool, Box<Node>),
    SearchInPath(bool, Box<Node>),
    Regex(bool, Box<Node>),
    KindFilter(EntryKindFilter, Box<Node>),
    Exact(bool, Box<Node>),
    /// A bare or quoted word: substring match against name (or path, per
    /// the effective search-in-path flag).
    Substring { needle: String },
    Size(NumericAtom),
    Ext(Vec<String>),
    DateModified(NumericAtom),
    /// Always-true placeholder a malformed atom downgrades to (§7
    /// `QueryParse`): the query still runs, diagnostics are reported
    /// out of band via [`crate::error::QueryDiagnostic`].
    MatchEverything,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_atom_half_open_excludes_upper_bound() {
        let atom = NumericAtom::half_open(1000, 2000);
        assert!(atom.matches(1000));
        assert!(atom.matches(1999));
        assert!(!atom.matches(2000));
    }

    #[test]
    fn numeric_atom_at_least_has_no_upper_bound() {
        let atom = NumericAtom::at_least(5_000_000_000);
        assert!(!atom.matches(4_999_999_999));
        assert!(atom.matches(5_000_000_000));
        assert!(atom.matches(i64::MAX));
    }
}
