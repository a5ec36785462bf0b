//! C8 parser. Consumes the lexer's token stream and builds the AST
//! directly via recursive descent with precedence climbing, which gives
//! the same `NOT > AND > OR` precedence and left-associativity as the
//! source's explicit tokenize → shunting-yard → postfix → tree pipeline
//! without needing a separate postfix intermediate form — an accepted
//! idiomatic-Rust simplification (see DESIGN.md).

use chrono::Utc;

use crate::error::QueryDiagnostic;
use crate::query::ast::{EntryKindFilter, Node};
use crate::query::lexer::{self, Token};
use crate::query::numeric::{self, parse_size_word};

pub struct ParseResult {
    pub root: Node,
    pub diagnostics: Vec<QueryDiagnostic>,
}

pub fn parse(input: &str) -> crate::error::Result<ParseResult> {
    let tokens = lexer::lex(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        diagnostics: Vec::new(),
    };
    let root = if parser.tokens.is_empty() {
        Node::MatchEverything
    } else {
        parser.parse_or()
    };
    Ok(ParseResult {
        root,
        diagnostics: parser.diagnostics,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: Vec<QueryDiagnostic>,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn diagnose(&mut self, token: impl Into<String>, message: impl Into<String>) -> Node {
        self.diagnostics.push(QueryDiagnostic {
            token: token.into(),
            message: message.into(),
        });
        Node::MatchEverything
    }

    // or := and {("OR"|"||") and}
    fn parse_or(&mut self) -> Node {
        let mut left = self.parse_and();
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and();
            left = Node::Or(Box::new(left), Box::new(right));
        }
        left
    }

    // and := unary {("AND"|"&&")? unary}, implicit AND when the next
    // token starts an atom with no explicit connector.
    fn parse_and(&mut self) -> Node {
        let mut left = self.parse_unary();
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.advance();
                    let right = self.parse_unary();
                    left = Node::And(Box::new(left), Box::new(right));
                }
                Some(Token::Or) | Some(Token::RParen) | None => break,
                _ => {
                    let right = self.parse_unary();
                    left = Node::And(Box::new(left), Box::new(right));
                }
            }
        }
        left
    }

    // unary := ("NOT"|"!") unary | atom
    fn parse_unary(&mut self) -> Node {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            return Node::Not(Box::new(self.parse_unary()));
        }
        self.parse_atom()
    }

    // atom := "(" expr ")" | field ":" atom | quoted | word
    fn parse_atom(&mut self) -> Node {
        // Unmatched close parens are discarded wherever an atom is
        // expected (spec §4.9).
        while matches!(self.peek(), Some(Token::RParen)) {
            self.advance();
        }
        match self.advance() {
            None => Node::MatchEverything,
            Some(Token::LParen) => {
                let inner = self.parse_or();
                // Unmatched open parens are closed at EOF: consume a
                // matching RParen if present, otherwise just return.
                if matches!(self.peek(), Some(Token::RParen)) {
                    self.advance();
                }
                inner
            }
            Some(Token::Word(w)) => Node::Substring { needle: w },
            Some(Token::Field(name)) => self.parse_field(name),
            Some(other) => {
                let label = format!("{other:?}");
                self.diagnose(label, "unexpected token where an atom was expected")
            }
        }
    }

    fn parse_field(&mut self, name: String) -> Node {
        match name.to_ascii_lowercase().as_str() {
            "case" => Node::MatchCase(true, Box::new(self.parse_atom())),
            "nocase" => Node::MatchCase(false, Box::new(self.parse_atom())),
            "path" => Node::SearchInPath(true, Box::new(self.parse_atom())),
            "nopath" => Node::SearchInPath(false, Box::new(self.parse_atom())),
            "regex" => Node::Regex(true, Box::new(self.parse_atom())),
            "noregex" => Node::Regex(false, Box::new(self.parse_atom())),
            "exact" => Node::Exact(true, Box::new(self.parse_atom())),
            "file" | "files" => Node::KindFilter(EntryKindFilter::File, Box::new(self.parse_atom())),
            "folder" | "folders" => {
                Node::KindFilter(EntryKindFilter::Folder, Box::new(self.parse_atom()))
            }
            "size" => self.parse_size_atom(),
            "ext" => self.parse_ext_atom(),
            "date-modified" => self.parse_date_atom(),
            other => {
                let token = other.to_string();
                // Consume the would-be argument so parsing can resync,
                // then downgrade (spec §7 QueryParse).
                self.parse_atom();
                self.diagnose(token, "unknown field")
            }
        }
    }

    fn take_comparator(&mut self) -> Option<Token> {
        match self.peek() {
            Some(Token::Lt) | Some(Token::Le) | Some(Token::Gt) | Some(Token::Ge) | Some(Token::Eq) => {
                self.advance()
            }
            _ => None,
        }
    }

    fn parse_size_atom(&mut self) -> Node {
        let cmp = self.take_comparator();
        let word = match self.advance() {
            Some(Token::Word(w)) => w,
            other => {
                let label = other.map(|t| format!("{t:?}")).unwrap_or_default();
                return self.diagnose(label, "expected a size value after 'size:'");
            }
        };

        if cmp.is_none() {
            if let Some((lo_word, hi_word)) = word.split_once("..") {
                return match (parse_size_word(lo_word), parse_size_word(hi_word)) {
                    (Ok((lv, lu)), Ok((hv, hu))) => {
                        Node::Size(crate::query::ast::NumericAtom::half_open(lv * lu, hv * hu))
                    }
                    _ => self.diagnose(word.clone(), "malformed size range"),
                };
            }
        }

        match parse_size_word(&word) {
            Ok((value, unit)) => {
                let lo = value * unit;
                let atom = match cmp {
                    None | Some(Token::Eq) => numeric::size_eq_atom(value, unit),
                    Some(Token::Ge) => crate::query::ast::NumericAtom::at_least(lo),
                    Some(Token::Gt) => crate::query::ast::NumericAtom::at_least(lo + 1),
                    Some(Token::Le) => crate::query::ast::NumericAtom::below(lo + 1),
                    Some(Token::Lt) => crate::query::ast::NumericAtom::below(lo),
                    _ => unreachable!("take_comparator only returns comparator tokens"),
                };
                Node::Size(atom)
            }
            Err(message) => self.diagnose(word, message),
        }
    }

    fn parse_ext_atom(&mut self) -> Node {
        match self.advance() {
            Some(Token::Word(w)) => {
                let exts = w.split(';').map(|e| e.trim().to_string()).filter(|e| !e.is_empty()).collect();
                Node::Ext(exts)
            }
            other => {
                let label = other.map(|t| format!("{t:?}")).unwrap_or_default();
                self.diagnose(label, "expected an extension list after 'ext:'")
            }
        }
    }

    fn parse_date_atom(&mut self) -> Node {
        let cmp = self.take_comparator();
        let word = match self.advance() {
            Some(Token::Word(w)) => w,
            other => {
                let label = other.map(|t| format!("{t:?}")).unwrap_or_default();
                return self.diagnose(label, "expected a date value after 'date-modified:'");
            }
        };
        let now = Utc::now();
        match numeric::parse_date_modified(&word, now) {
            Some(atom) => {
                let atom = match cmp {
                    None => atom,
                    Some(Token::Ge) => crate::query::ast::NumericAtom::at_least(atom.lo),
                    Some(Token::Gt) => crate::query::ast::NumericAtom::at_least(atom.hi.unwrap_or(atom.lo)),
                    Some(Token::Le) => crate::query::ast::NumericAtom::below(atom.hi.unwrap_or(atom.lo + 1)),
                    Some(Token::Lt) => crate::query::ast::NumericAtom::below(atom.lo),
                    Some(Token::Eq) => atom,
                    _ => unreachable!(),
                };
                Node::DateModified(atom)
            }
            None => self.diagnose(word, "unrecognized date-modified value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Node;

    #[test]
    fn empty_query_is_match_everything() {
        let result = parse("").unwrap();
        assert!(matches!(result.root, Node::MatchEverything));
    }

    #[test]
    fn implicit_and_between_bare_words() {
        let result = parse("foo bar").unwrap();
        assert!(matches!(result.root, Node::And(_, _)));
    }

    #[test]
    fn precedence_not_over_and_over_or() {
        let result = parse("a OR b AND NOT c").unwrap();
        match result.root {
            Node::Or(left, right) => {
                assert!(matches!(*left, Node::Substring { .. }));
                assert!(matches!(*right, Node::And(_, _)));
            }
            other => panic!("expected Or at top level, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_close_paren_is_discarded() {
        let result = parse("foo)").unwrap();
        assert!(matches!(result.root, Node::Substring { .. }));
    }

    #[test]
    fn unmatched_open_paren_is_closed_at_eof() {
        let result = parse("(foo").unwrap();
        assert!(matches!(result.root, Node::Substring { .. }));
    }

    #[test]
    fn unknown_field_downgrades_with_diagnostic() {
        let result = parse("bogus:foo").unwrap();
        assert!(matches!(result.root, Node::MatchEverything));
        assert_eq!(result.diagnostics.len(), 1);
    }

    #[test]
    fn size_range_without_comparator() {
        let result = parse("size:1kb..2kb").unwrap();
        match result.root {
            Node::Size(atom) => {
                assert_eq!(atom.lo, 1000);
                assert_eq!(atom.hi, Some(2000));
            }
            other => panic!("expected Size atom, got {other:?}"),
        }
    }

    #[test]
    fn size_greater_equal() {
        let result = parse("size:>=5gb").unwrap();
        match result.root {
            Node::Size(atom) => {
                assert_eq!(atom.lo, 5_000_000_000);
                assert!(atom.hi.is_none());
            }
            other => panic!("expected Size atom, got {other:?}"),
        }
    }

    #[test]
    fn ext_field_splits_on_semicolon() {
        let result = parse("ext:jpg;png").unwrap();
        match result.root {
            Node::Ext(exts) => assert_eq!(exts, vec!["jpg".to_string(), "png".to_string()]),
            other => panic!("expected Ext atom, got {other:?}"),
        }
    }

    #[test]
    fn case_field_wraps_substring() {
        let result = parse("case:Foo").unwrap();
        match result.root {
            Node::MatchCase(true, inner) => {
                assert!(matches!(*inner, Node::Substring { .. }));
            }
            other => panic!("expected MatchCase, got {other:?}"),
        }
    }
}
