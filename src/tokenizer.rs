//! Lexical analysis: raw source text to a random-access-by-one-lookback
//! stream of classified [`Token`]s.
//!
//! Comments are stripped ahead of classification: `//` truncates a line,
//! `/*`/`/**` opens a discard state that swallows whole lines (including
//! the line that finally closes it with `*/`), mirroring the naive
//! line-oriented comment stripping the source language's tokenizers use.
//! String literals are recognized before comment scanning so a `//` or
//! `/*` inside a quoted string never truncates real source.

use crate::error::{CompileError, Result};
use crate::token::{Token, TokenKind, KEYWORDS, SYMBOLS};

#[derive(Debug)]
pub struct Tokenizer {
    tokens: Vec<Token>,
    pos: usize,
}

impl Tokenizer {
    /// Build a tokenizer over the full contents of one source file.
    pub fn new(source: &str) -> Result<Self> {
        let stripped = strip_comments(source);
        let tokens = lex(&stripped)?;
        Ok(Tokenizer { tokens, pos: 0 })
    }

    pub fn has_more(&self) -> bool {
        self.pos < self.tokens.len()
    }

    /// Advance and return the next token.
    pub fn next(&mut self) -> Option<&Token> {
        if self.pos < self.tokens.len() {
            let tok = &self.tokens[self.pos];
            self.pos += 1;
            Some(tok)
        } else {
            None
        }
    }

    /// Rewind exactly one token (the only lookback the grammar needs).
    pub fn back(&mut self) {
        debug_assert!(self.pos > 0, "back() called with no prior next()");
        if self.pos > 0 {
            self.pos -= 1;
        }
    }

    /// Peek the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }
}

/// Strip `//` and `/* ... */` comments line-by-line, preserving string
/// literal contents from being mistaken for comment markers.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_block = false;

    for line in source.lines() {
        if in_block {
            if find_outside_string(line, "*/").is_some() {
                in_block = false;
            }
            out.push('\n');
            continue;
        }

        if let Some(idx) = find_outside_string(line, "//") {
            out.push_str(&line[..idx]);
            out.push('\n');
            continue;
        }

        if let Some(idx) = find_outside_string(line, "/*") {
            if find_outside_string(&line[idx..], "*/").is_none() {
                in_block = true;
            }
            out.push('\n');
            continue;
        }

        out.push_str(line);
        out.push('\n');
    }

    out
}

/// Index of the first occurrence of `needle` in `line` that is not inside
/// a `"..."` span.
fn find_outside_string(line: &str, needle: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let nlen = needle.len();
    let mut in_str = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            in_str = !in_str;
            i += 1;
            continue;
        }
        if !in_str && i + nlen <= bytes.len() && &bytes[i..i + nlen] == needle.as_bytes() {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Scan comment-stripped source into classified tokens.
fn lex(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut line_no = 1usize;
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => {
                line_no += 1;
            }
            c if c.is_whitespace() => {}
            '"' => {
                let mut text = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    if c == '\n' {
                        return Err(CompileError::Lexical {
                            line: line_no,
                            message: "unterminated string literal".to_string(),
                        });
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(CompileError::Lexical {
                        line: line_no,
                        message: "unterminated string literal".to_string(),
                    });
                }
                tokens.push(Token::new(text, TokenKind::StrConst, line_no));
            }
            c if SYMBOLS.contains(&c) => {
                tokens.push(Token::new(c.to_string(), TokenKind::Symbol, line_no));
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                text.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() {
                        text.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: i64 = text.parse().unwrap_or(0);
                if !(0..=32767).contains(&value) {
                    return Err(CompileError::Lexical {
                        line: line_no,
                        message: format!("integer constant {} out of range [0, 32767]", text),
                    });
                }
                tokens.push(Token::new(text, TokenKind::IntConst, line_no));
            }
            c if is_ident_start(c) => {
                let mut text = String::new();
                text.push(c);
                while let Some(&next) = chars.peek() {
                    if is_ident_char(next) {
                        text.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let kind = if KEYWORDS.contains(&text.as_str()) {
                    TokenKind::Keyword
                } else {
                    TokenKind::Identifier
                };
                tokens.push(Token::new(text, kind, line_no));
            }
            c => {
                return Err(CompileError::Lexical {
                    line: line_no,
                    message: format!("unclassifiable character '{}'", c),
                });
            }
        }
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
