//! C8/C9: query lexer, parser, AST, and matcher (spec §4.9, §4.10, §6.2).

pub mod ast;
pub mod lexer;
pub mod matcher;
pub mod numeric;
pub mod parser;

pub use ast::{Cmp, EntryKindFilter, Node, NumericAtom};
pub use matcher::{highlight_ranges, CompiledNode, Matcher};
pub use parser::{parse, ParseResult};

use crate::entry::{EntryArena, EntryRef};
use crate::error::{QueryDiagnostic, Result};

/// Global defaults a view applies before any per-atom `case:`/`path:`/
/// `regex:` override (spec §4.9's "global 'search in path' flag",
/// generalized to the sibling case/regex toggles since the matcher
/// treats all three the same way).
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchFlags {
    pub match_case: bool,
    pub search_in_path: bool,
    pub regex: bool,
}

/// A fully parsed and compiled query: ready to evaluate against entries,
/// plus whatever diagnostics the parse or compile step collected for
/// malformed atoms (spec §7 `QueryParse`).
pub struct Query {
    pub text: String,
    pub matcher: Matcher,
    pub diagnostics: Vec<QueryDiagnostic>,
}

impl Query {
    pub fn parse(text: &str, defaults: SearchFlags) -> Result<Query> {
        let parsed = parser::parse(text)?;
        let (matcher, compile_diags) = Matcher::compile_with_defaults(&parsed.root, defaults);
        let mut diagnostics = parsed.diagnostics;
        diagnostics.extend(compile_diags);
        Ok(Query {
            text: text.to_string(),
            matcher,
            diagnostics,
        })
    }

    /// True for the empty query / bare `MatchEverything` root (spec
    /// §4.11: "if the query has no atoms ... return references to the
    /// current sorted arrays ... no scan").
    pub fn is_empty(&self) -> bool {
        matches!(self.matcher.root, CompiledNode::MatchEverything)
    }

    pub fn matches(&self, arena: &EntryArena, entry: EntryRef) -> bool {
        self.matcher.evaluate(arena, entry)
    }
}
