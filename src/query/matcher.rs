//! C9 query matcher. Compiles a parsed [`Node`] tree into a
//! [`CompiledNode`] tree once (spec §9: "fast-path selection is done
//! once at AST construction"), resolving inherited case/path/regex
//! flags and pre-building regex/glob matchers so evaluating one entry
//! never re-parses a pattern.
//!
//! The source dispatches on ASCII-vs-Unicode buffers backed by ICU
//! (`u_strFindFirst`/`u_strCompare` over UTF-16). Rust strings are UTF-8
//! natively, so this collapses to one path: NFD-normalize via
//! `unicode-normalization` and casefold via `char::to_lowercase`, which
//! is not full ICU case-folding but covers every ASCII and common
//! Latin/Greek/Cyrillic case pair the teacher's own tests exercise.
//! This substitution is recorded in DESIGN.md.

use std::cell::OnceCell;

use globset::GlobBuilder;
use regex::RegexBuilder;
use unicode_normalization::UnicodeNormalization;

use crate::entry::{EntryArena, EntryRef, Kind};
use crate::error::QueryDiagnostic;
use crate::query::ast::{EntryKindFilter, Node, NumericAtom};

fn normalize(s: &str, casefold: bool) -> String {
    let nfd: String = s.nfd().collect();
    if casefold {
        nfd.chars().flat_map(|c| c.to_lowercase()).collect()
    } else {
        nfd
    }
}

enum SubstringMode {
    Plain,
    Glob(globset::GlobMatcher),
    Regex(regex::Regex),
}

struct CompiledSubstring {
    needle_normalized: String,
    match_case: bool,
    search_in_path: bool,
    exact: bool,
    mode: SubstringMode,
}

pub enum CompiledNode {
    And(Box<CompiledNode>, Box<CompiledNode>),
    Or(Box<CompiledNode>, Box<CompiledNode>),
    Not(Box<CompiledNode>),
    Kind(EntryKindFilter, Box<CompiledNode>),
    Size(NumericAtom),
    Ext(Vec<String>),
    DateModified(NumericAtom),
    Substring(CompiledSubstring),
    MatchEverything,
}

#[derive(Default, Clone, Copy)]
struct Flags {
    match_case: Option<bool>,
    search_in_path: Option<bool>,
    regex: Option<bool>,
    exact: bool,
}

pub struct Matcher {
    pub root: CompiledNode,
}

impl Matcher {
    /// Compiles `node`, returning the matcher plus any diagnostics for
    /// regex/glob patterns that failed to compile (downgraded to
    /// `MatchEverything` at that leaf, per §7 `QueryParse`).
    pub fn compile(node: &Node) -> (Matcher, Vec<QueryDiagnostic>) {
        Self::compile_with_defaults(node, crate::query::SearchFlags::default())
    }

    /// Like [`compile`](Self::compile) but seeds the top-level flags
    /// from `defaults` instead of leaving them unset — this is how the
    /// global "search in path" / match-case / regex toggles (spec §4.9:
    /// "the global 'search in path' flag") flow in without becoming
    /// per-query-text syntax. A `case:`/`path:`/`regex:` atom closer to
    /// the leaf still overrides it.
    pub fn compile_with_defaults(
        node: &Node,
        defaults: crate::query::SearchFlags,
    ) -> (Matcher, Vec<QueryDiagnostic>) {
        let mut diagnostics = Vec::new();
        let flags = Flags {
            match_case: defaults.match_case.then_some(true),
            search_in_path: defaults.search_in_path.then_some(true),
            regex: defaults.regex.then_some(true),
            exact: false,
        };
        let root = compile_node(node, flags, &mut diagnostics);
        (Matcher { root }, diagnostics)
    }

    pub fn evaluate(&self, arena: &EntryArena, r: EntryRef) -> bool {
        let ctx = MatchContext::new(arena, r);
        evaluate(&self.root, arena, r, &ctx)
    }
}

fn compile_node(node: &Node, flags: Flags, diagnostics: &mut Vec<QueryDiagnostic>) -> CompiledNode {
    match node {
        Node::And(a, b) => CompiledNode::And(
            Box::new(compile_node(a, flags, diagnostics)),
            Box::new(compile_node(b, flags, diagnostics)),
        ),
        Node::Or(a, b) => CompiledNode::Or(
            Box::new(compile_node(a, flags, diagnostics)),
            Box::new(compile_node(b, flags, diagnostics)),
        ),
        Node::Not(a) => CompiledNode::Not(Box::new(compile_node(a, flags, diagnostics))),
        Node::MatchCase(v, a) => {
            let mut f = flags;
            f.match_case = Some(*v);
            compile_node(a, f, diagnostics)
        }
        Node::SearchInPath(v, a) => {
            let mut f = flags;
            f.search_in_path = Some(*v);
            compile_node(a, f, diagnostics)
        }
        Node::Regex(v, a) => {
            let mut f = flags;
            f.regex = Some(*v);
            compile_node(a, f, diagnostics)
        }
        Node::Exact(v, a) => {
            let mut f = flags;
            f.exact = *v;
            compile_node(a, f, diagnostics)
        }
        Node::KindFilter(kind, a) => {
            CompiledNode::Kind(*kind, Box::new(compile_node(a, flags, diagnostics)))
        }
        Node::Size(atom) => CompiledNode::Size(*atom),
        Node::Ext(list) => CompiledNode::Ext(list.iter().map(|e| e.to_ascii_lowercase()).collect()),
        Node::DateModified(atom) => CompiledNode::DateModified(*atom),
        Node::MatchEverything => CompiledNode::MatchEverything,
        Node::Substring { needle } => compile_substring(needle, flags, diagnostics),
    }
}

fn compile_substring(needle: &str, flags: Flags, diagnostics: &mut Vec<QueryDiagnostic>) -> CompiledNode {
    // Auto-match-case: a needle containing an uppercase code point
    // upgrades to case-sensitive unless explicitly overridden.
    let match_case = flags
        .match_case
        .unwrap_or_else(|| needle.chars().any(|c| c.is_uppercase()));
    // Auto-search-in-path: a needle containing '/' switches to path mode.
    let search_in_path = flags.search_in_path.unwrap_or_else(|| needle.contains('/'));
    let regex_mode = flags.regex.unwrap_or(false);

    let mode = if regex_mode {
        match RegexBuilder::new(needle).case_insensitive(!match_case).build() {
            Ok(re) => SubstringMode::Regex(re),
            Err(e) => {
                diagnostics.push(QueryDiagnostic {
                    token: needle.to_string(),
                    message: format!("invalid regex: {e}"),
                });
                return CompiledNode::MatchEverything;
            }
        }
    } else if needle.contains('*') || needle.contains('?') {
        match GlobBuilder::new(needle)
            .case_insensitive(!match_case)
            .literal_separator(false)
            .build()
        {
            Ok(glob) => SubstringMode::Glob(glob.compile_matcher()),
            Err(e) => {
                diagnostics.push(QueryDiagnostic {
                    token: needle.to_string(),
                    message: format!("invalid glob: {e}"),
                });
                return CompiledNode::MatchEverything;
            }
        }
    } else {
        SubstringMode::Plain
    };

    CompiledNode::Substring(CompiledSubstring {
        needle_normalized: normalize(needle, !match_case),
        match_case,
        search_in_path,
        exact: flags.exact,
        mode,
    })
}

/// Per-entry lazily-computed match buffers (spec §4.10).
struct MatchContext<'a> {
    arena: &'a EntryArena,
    entry: EntryRef,
    name_raw: OnceCell<String>,
    path_raw: OnceCell<String>,
    name_cf: OnceCell<String>,
    name_exact_nfd: OnceCell<String>,
    path_cf: OnceCell<String>,
    path_exact_nfd: OnceCell<String>,
}

impl<'a> MatchContext<'a> {
    fn new(arena: &'a EntryArena, entry: EntryRef) -> Self {
        MatchContext {
            arena,
            entry,
            name_raw: OnceCell::new(),
            path_raw: OnceCell::new(),
            name_cf: OnceCell::new(),
            name_exact_nfd: OnceCell::new(),
            path_cf: OnceCell::new(),
            path_exact_nfd: OnceCell::new(),
        }
    }

    fn name_raw(&self) -> &str {
        self.name_raw.get_or_init(|| self.arena.get(self.entry).name.clone())
    }

    fn path_raw(&self) -> &str {
        self.path_raw.get_or_init(|| self.arena.full_path(self.entry))
    }

    fn name(&self, match_case: bool) -> &str {
        if match_case {
            self.name_exact_nfd.get_or_init(|| normalize(self.name_raw(), false))
        } else {
            self.name_cf.get_or_init(|| normalize(self.name_raw(), true))
        }
    }

    fn path(&self, match_case: bool) -> &str {
        if match_case {
            self.path_exact_nfd.get_or_init(|| normalize(self.path_raw(), false))
        } else {
            self.path_cf.get_or_init(|| normalize(self.path_raw(), true))
        }
    }
}

fn evaluate(node: &CompiledNode, arena: &EntryArena, r: EntryRef, ctx: &MatchContext) -> bool {
    match node {
        CompiledNode::And(a, b) => evaluate(a, arena, r, ctx) && evaluate(b, arena, r, ctx),
        CompiledNode::Or(a, b) => evaluate(a, arena, r, ctx) || evaluate(b, arena, r, ctx),
        CompiledNode::Not(a) => !evaluate(a, arena, r, ctx),
        CompiledNode::Kind(kind, inner) => {
            let is_folder = arena.get(r).kind == Kind::Folder;
            let kind_ok = match kind {
                EntryKindFilter::File => !is_folder,
                EntryKindFilter::Folder => is_folder,
            };
            kind_ok && evaluate(inner, arena, r, ctx)
        }
        CompiledNode::Size(atom) => atom.matches(arena.get(r).size as i64),
        CompiledNode::DateModified(atom) => atom.matches(arena.get(r).mtime),
        CompiledNode::Ext(wanted) => match arena.get(r).extension() {
            Some(ext) => wanted.iter().any(|w| w.eq_ignore_ascii_case(ext)),
            None => false,
        },
        CompiledNode::MatchEverything => true,
        CompiledNode::Substring(sub) => eval_substring(sub, ctx),
    }
}

fn eval_substring(sub: &CompiledSubstring, ctx: &MatchContext) -> bool {
    match &sub.mode {
        SubstringMode::Regex(re) => {
            let haystack = if sub.search_in_path { ctx.path_raw() } else { ctx.name_raw() };
            re.is_match(haystack)
        }
        SubstringMode::Glob(glob) => {
            let haystack = if sub.search_in_path { ctx.path_raw() } else { ctx.name_raw() };
            glob.is_match(haystack)
        }
        SubstringMode::Plain => {
            let haystack = if sub.search_in_path {
                ctx.path(sub.match_case)
            } else {
                ctx.name(sub.match_case)
            };
            if sub.exact {
                haystack == sub.needle_normalized
            } else {
                haystack.contains(sub.needle_normalized.as_str())
            }
        }
    }
}

/// `(start, end)` byte ranges into the matched field for a successful
/// plain-substring match, used by the UI highlight pass (spec §4.10).
/// Regex and non-anchored glob patterns are not range-highlighted —
/// recorded as a scope limit in DESIGN.md.
pub fn highlight_ranges(node: &CompiledNode, arena: &EntryArena, r: EntryRef) -> Vec<(usize, usize, bool)> {
    let ctx = MatchContext::new(arena, r);
    let mut out = Vec::new();
    collect_highlights(node, arena, r, &ctx, &mut out);
    out
}

/// `bool` in the returned tuple is `true` when the range is in the path
/// field rather than the name field.
fn collect_highlights(
    node: &CompiledNode,
    arena: &EntryArena,
    r: EntryRef,
    ctx: &MatchContext,
    out: &mut Vec<(usize, usize, bool)>,
) {
    match node {
        CompiledNode::And(a, b) | CompiledNode::Or(a, b) => {
            collect_highlights(a, arena, r, ctx, out);
            collect_highlights(b, arena, r, ctx, out);
        }
        CompiledNode::Not(_) => {}
        CompiledNode::Kind(_, inner) => collect_highlights(inner, arena, r, ctx, out),
        CompiledNode::Substring(sub) => {
            if let SubstringMode::Plain = sub.mode {
                let haystack = if sub.search_in_path {
                    ctx.path(sub.match_case)
                } else {
                    ctx.name(sub.match_case)
                };
                if let Some(start) = haystack.find(sub.needle_normalized.as_str()) {
                    out.push((start, start + sub.needle_normalized.len(), sub.search_in_path));
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry, EntryArena};
    use crate::query::ast::{EntryKindFilter, Node, NumericAtom};

    fn arena_with_file() -> (EntryArena, EntryRef) {
        let mut arena = EntryArena::new(8);
        let folder = arena.alloc(Entry::new_folder("root".into(), 0, None));
        let file = arena.alloc(Entry {
            size: 5_000_000,
            mtime: 1000,
            ..Entry::new_file("FILE.TXT".into(), 0, Some(folder))
        });
        (arena, file)
    }

    #[test]
    fn case_insensitive_auto_case_matches_any_case() {
        let (arena, file) = arena_with_file();
        let (matcher, _) = Matcher::compile(&Node::Substring { needle: "file".into() });
        assert!(matcher.evaluate(&arena, file));
    }

    #[test]
    fn auto_match_case_rejects_mismatched_case() {
        let (arena, file) = arena_with_file();
        let (matcher, _) = Matcher::compile(&Node::Substring { needle: "File".into() });
        // needle has an uppercase code point -> case-sensitive; haystack is "FILE.TXT"
        assert!(!matcher.evaluate(&arena, file));
    }

    #[test]
    fn glob_prefix_matches() {
        let (arena, file) = arena_with_file();
        let (matcher, _) = Matcher::compile(&Node::Substring { needle: "FILE*".into() });
        assert!(matcher.evaluate(&arena, file));
    }

    #[test]
    fn size_atom_matches_via_compiled_tree() {
        let (arena, file) = arena_with_file();
        let (matcher, _) =
            Matcher::compile(&Node::Size(NumericAtom::at_least(5_000_000)));
        assert!(matcher.evaluate(&arena, file));
    }

    #[test]
    fn kind_filter_rejects_folders_for_file_atom() {
        let (mut arena, _file) = arena_with_file();
        let folder_ref = arena.alloc(Entry::new_folder("sub".into(), 0, None));
        let (matcher, _) = Matcher::compile(&Node::KindFilter(
            EntryKindFilter::File,
            Box::new(Node::MatchEverything),
        ));
        assert!(!matcher.evaluate(&arena, folder_ref));
    }

    #[test]
    fn invalid_regex_downgrades_to_match_everything_with_diagnostic() {
        let (arena, file) = arena_with_file();
        let (matcher, diags) =
            Matcher::compile(&Node::Regex(true, Box::new(Node::Substring { needle: "(".into() })));
        assert!(matcher.evaluate(&arena, file));
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn highlight_range_for_plain_substring() {
        let (arena, file) = arena_with_file();
        let (matcher, _) = Matcher::compile(&Node::Substring { needle: "file".into() });
        let ranges = highlight_ranges(&matcher.root, &arena, file);
        assert_eq!(ranges, vec![(0, 4, false)]);
    }
}
