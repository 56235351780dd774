//! Character stream → typed token stream, with brace-depth tracking.
//!
//! The tokenizer never classifies the contents of a string literal or
//! comment as a keyword, which is what defeats the trivial "hide WHERE
//! inside a comment" bypass: classification happens only on raw word
//! scans, and strings/comments are scanned as opaque spans first.

use std::collections::HashSet;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Keyword,
    Identifier,
    StringLiteral,
    Number,
    Parameter,
    Punctuation,
    Operator,
    Whitespace,
    Comment,
}

/// An immutable token. `brace_depth` is the nesting counter for `{…}`
/// pairs at the moment the token was emitted: `{` is emitted with the
/// depth *after* incrementing, `}` is emitted with the depth *before*
/// decrementing, so both delimiters of a pair carry the same depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CypherToken {
    pub token_type: TokenType,
    pub value: String,
    pub position: usize,
    pub brace_depth: u32,
}

static CYPHER_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "MATCH", "OPTIONAL", "WHERE", "RETURN", "WITH", "UNWIND", "CALL", "YIELD", "UNION", "ALL",
        "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "ORDER", "BY", "SKIP", "LIMIT",
        "ASC", "DESC", "AS", "AND", "OR", "NOT", "IN", "IS", "NULL", "TRUE", "FALSE", "CASE",
        "WHEN", "THEN", "ELSE", "END", "DISTINCT", "EXISTS", "CONTAINS", "STARTS", "ENDS", "LOAD",
        "CSV", "FOREACH", "ON", "DROP", "INDEX", "CONSTRAINT",
    ]
    .into_iter()
    .collect()
});

struct Lexer<'a> {
    chars: Vec<char>,
    src: &'a str,
    idx: usize,
    brace_depth: u32,
    tokens: Vec<CypherToken>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            chars: src.chars().collect(),
            src,
            idx: 0,
            brace_depth: 0,
            tokens: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.chars.len()
    }

    fn char_at(&self, i: usize) -> char {
        self.chars[i]
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    fn peek(&self) -> char {
        if self.idx + 1 < self.len() {
            self.chars[self.idx + 1]
        } else {
            '\0'
        }
    }

    fn emit(&mut self, token_type: TokenType, start: usize, end: usize, depth: u32) {
        self.tokens.push(CypherToken {
            token_type,
            value: self.slice(start, end),
            position: start,
            brace_depth: depth,
        });
    }

    fn try_comment(&mut self) -> bool {
        if self.char_at(self.idx) != '/' || self.idx + 1 >= self.len() {
            return false;
        }
        let depth = self.brace_depth;
        match self.peek() {
            '/' => {
                let start = self.idx;
                self.idx += 2;
                while self.idx < self.len() && self.char_at(self.idx) != '\n' {
                    self.idx += 1;
                }
                self.emit(TokenType::Comment, start, self.idx, depth);
                true
            }
            '*' => {
                let start = self.idx;
                self.idx += 2;
                while self.idx + 1 < self.len()
                    && !(self.char_at(self.idx) == '*' && self.char_at(self.idx + 1) == '/')
                {
                    self.idx += 1;
                }
                self.idx = (self.idx + 2).min(self.len());
                self.emit(TokenType::Comment, start, self.idx, depth);
                true
            }
            _ => false,
        }
    }

    fn try_string_or_backtick(&mut self) -> bool {
        let depth = self.brace_depth;
        let c = self.char_at(self.idx);
        if c == '\'' || c == '"' {
            let start = self.idx;
            let quote = c;
            self.idx += 1;
            while self.idx < self.len() {
                if self.char_at(self.idx) == '\\' && self.idx + 1 < self.len() {
                    self.idx += 2;
                    continue;
                }
                if self.char_at(self.idx) == quote {
                    self.idx += 1;
                    break;
                }
                self.idx += 1;
            }
            self.emit(TokenType::StringLiteral, start, self.idx, depth);
            return true;
        }
        if c == '`' {
            let start = self.idx;
            self.idx += 1;
            while self.idx < self.len() && self.char_at(self.idx) != '`' {
                self.idx += 1;
            }
            if self.idx < self.len() {
                self.idx += 1;
            }
            self.emit(TokenType::Identifier, start, self.idx, depth);
            return true;
        }
        false
    }

    fn try_parameter(&mut self) -> bool {
        if self.char_at(self.idx) != '$' || self.idx + 1 >= self.len() {
            return false;
        }
        let nxt = self.peek();
        if nxt.is_alphabetic() || nxt == '_' {
            let depth = self.brace_depth;
            let start = self.idx;
            self.idx += 1;
            while self.idx < self.len()
                && (self.char_at(self.idx).is_alphanumeric() || self.char_at(self.idx) == '_')
            {
                self.idx += 1;
            }
            self.emit(TokenType::Parameter, start, self.idx, depth);
            return true;
        }
        false
    }

    fn try_brace(&mut self) -> bool {
        let c = self.char_at(self.idx);
        if c == '{' {
            self.brace_depth += 1;
            self.emit(TokenType::Punctuation, self.idx, self.idx + 1, self.brace_depth);
            self.idx += 1;
            return true;
        }
        if c == '}' {
            self.emit(TokenType::Punctuation, self.idx, self.idx + 1, self.brace_depth);
            self.brace_depth = self.brace_depth.saturating_sub(1);
            self.idx += 1;
            return true;
        }
        false
    }

    fn try_simple(&mut self) -> bool {
        let depth = self.brace_depth;
        let c = self.char_at(self.idx);
        if c == ' ' || c == '\t' || c == '\n' || c == '\r' {
            let start = self.idx;
            while self.idx < self.len() && matches!(self.char_at(self.idx), ' ' | '\t' | '\n' | '\r') {
                self.idx += 1;
            }
            self.emit(TokenType::Whitespace, start, self.idx, depth);
            return true;
        }
        if "()[],:;".contains(c) {
            self.emit(TokenType::Punctuation, self.idx, self.idx + 1, depth);
            self.idx += 1;
            return true;
        }
        if c.is_ascii_digit() || (c == '.' && self.peek().is_ascii_digit()) {
            let start = self.idx;
            while self.idx < self.len()
                && (self.char_at(self.idx).is_ascii_digit() || self.char_at(self.idx) == '.')
            {
                self.idx += 1;
            }
            self.emit(TokenType::Number, start, self.idx, depth);
            return true;
        }
        false
    }

    fn try_word_or_operator(&mut self) {
        let depth = self.brace_depth;
        let c = self.char_at(self.idx);
        if c.is_alphabetic() || c == '_' {
            let start = self.idx;
            while self.idx < self.len()
                && (self.char_at(self.idx).is_alphanumeric() || self.char_at(self.idx) == '_')
            {
                self.idx += 1;
            }
            let word = self.slice(start, self.idx);
            let is_property = preceded_by_dot(&self.tokens);
            let upper = word.to_ascii_uppercase();
            if !is_property && CYPHER_KEYWORDS.contains(upper.as_str()) {
                self.tokens.push(CypherToken {
                    token_type: TokenType::Keyword,
                    value: word,
                    position: start,
                    brace_depth: depth,
                });
            } else {
                self.tokens.push(CypherToken {
                    token_type: TokenType::Identifier,
                    value: word,
                    position: start,
                    brace_depth: depth,
                });
            }
            return;
        }
        if "=<>!+-*/%^".contains(c) {
            let start = self.idx;
            self.idx += 1;
            if self.idx < self.len() && "=<>".contains(self.char_at(self.idx)) {
                self.idx += 1;
            }
            self.emit(TokenType::Operator, start, self.idx, depth);
            return;
        }
        if c == '.' {
            self.emit(TokenType::Punctuation, self.idx, self.idx + 1, depth);
            self.idx += 1;
            return;
        }
        self.emit(TokenType::Identifier, self.idx, self.idx + 1, depth);
        self.idx += 1;
    }

    fn run(mut self) -> Vec<CypherToken> {
        let _ = self.src;
        while self.idx < self.len() {
            if self.try_comment() {
                continue;
            }
            if self.try_string_or_backtick() {
                continue;
            }
            if self.try_parameter() {
                continue;
            }
            if self.try_brace() {
                continue;
            }
            if self.try_simple() {
                continue;
            }
            self.try_word_or_operator();
        }
        self.tokens
    }
}

fn preceded_by_dot(tokens: &[CypherToken]) -> bool {
    for prev in tokens.iter().rev() {
        if prev.token_type == TokenType::Whitespace {
            continue;
        }
        return prev.token_type == TokenType::Punctuation && prev.value == ".";
    }
    false
}

pub fn tokenize_cypher(cypher: &str) -> Vec<CypherToken> {
    Lexer::new(cypher).run()
}

pub fn reconstruct_cypher(tokens: &[CypherToken]) -> String {
    tokens.iter().map(|t| t.value.as_str()).collect()
}
