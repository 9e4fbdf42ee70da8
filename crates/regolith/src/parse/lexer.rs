//! The Rego lexer.
//!
//! Produces a flat token stream with byte spans and line numbers. Keywords
//! are not distinguished here: identifiers stay identifiers and the parser
//! decides contextually, matching how the language treats `if`/`in`/
//! `contains`/`every` as imported keywords rather than reserved words.

use std::sync::Arc;

use crate::errors::{ErrorCode, PolicyError};
use crate::location::{Location, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Int,
    Float,
    /// Quoted string; the token text is the raw contents between the
    /// quotes, escapes intact.
    String,
    /// Backtick string; the token text is the literal contents.
    RawString,

    LBrace,
    RBrace,
    LBrack,
    RBrack,
    LParen,
    RParen,
    Comma,
    Colon,
    Semicolon,
    Dot,

    Assign,   // :=
    Unify,    // =
    EqEq,     // ==
    NotEq,    // !=
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: usize,
    pub len: usize,
    pub line: usize,
}

impl Token {
    pub fn location(&self, source: &Arc<Source>) -> Location {
        Location::new(source.clone(), self.pos, self.len)
    }
}

pub struct Lexer {
    source: Arc<Source>,
    bytes: Vec<u8>,
    pos: usize,
    line: usize,
}

impl Lexer {
    pub fn new(source: Arc<Source>) -> Self {
        let bytes = source.text().as_bytes().to_vec();
        Self {
            source,
            bytes,
            pos: 0,
            line: 1,
        }
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    /// Tokenizes the whole source; the final token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, PolicyError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let start = self.pos;
            let line = self.line;
            let Some(&b) = self.bytes.get(self.pos) else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    pos: start,
                    len: 0,
                    line,
                });
                return Ok(tokens);
            };

            let kind = match b {
                b'{' => self.punct(TokenKind::LBrace),
                b'}' => self.punct(TokenKind::RBrace),
                b'[' => self.punct(TokenKind::LBrack),
                b']' => self.punct(TokenKind::RBrack),
                b'(' => self.punct(TokenKind::LParen),
                b')' => self.punct(TokenKind::RParen),
                b',' => self.punct(TokenKind::Comma),
                b';' => self.punct(TokenKind::Semicolon),
                b'.' => self.punct(TokenKind::Dot),
                b'+' => self.punct(TokenKind::Plus),
                b'-' => self.punct(TokenKind::Minus),
                b'*' => self.punct(TokenKind::Star),
                b'/' => self.punct(TokenKind::Slash),
                b'%' => self.punct(TokenKind::Percent),
                b'&' => self.punct(TokenKind::Amp),
                b'|' => self.punct(TokenKind::Pipe),
                b':' => {
                    if self.peek(1) == Some(b'=') {
                        self.pos += 2;
                        TokenKind::Assign
                    } else {
                        self.punct(TokenKind::Colon)
                    }
                }
                b'=' => {
                    if self.peek(1) == Some(b'=') {
                        self.pos += 2;
                        TokenKind::EqEq
                    } else {
                        self.punct(TokenKind::Unify)
                    }
                }
                b'!' => {
                    if self.peek(1) == Some(b'=') {
                        self.pos += 2;
                        TokenKind::NotEq
                    } else {
                        return Err(self.error(start, "unexpected character `!`"));
                    }
                }
                b'<' => {
                    if self.peek(1) == Some(b'=') {
                        self.pos += 2;
                        TokenKind::Lte
                    } else {
                        self.punct(TokenKind::Lt)
                    }
                }
                b'>' => {
                    if self.peek(1) == Some(b'=') {
                        self.pos += 2;
                        TokenKind::Gte
                    } else {
                        self.punct(TokenKind::Gt)
                    }
                }
                b'"' => {
                    let text = self.lex_string(start)?;
                    tokens.push(Token {
                        kind: TokenKind::String,
                        text,
                        pos: start,
                        len: self.pos - start,
                        line,
                    });
                    continue;
                }
                b'`' => {
                    let text = self.lex_raw_string(start)?;
                    tokens.push(Token {
                        kind: TokenKind::RawString,
                        text,
                        pos: start,
                        len: self.pos - start,
                        line,
                    });
                    continue;
                }
                b'0'..=b'9' => {
                    let (kind, text) = self.lex_number();
                    tokens.push(Token {
                        kind,
                        text,
                        pos: start,
                        len: self.pos - start,
                        line,
                    });
                    continue;
                }
                b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                    let text = self.lex_ident();
                    tokens.push(Token {
                        kind: TokenKind::Ident,
                        text,
                        pos: start,
                        len: self.pos - start,
                        line,
                    });
                    continue;
                }
                other => {
                    return Err(self.error(start, format!("unexpected character `{}`", other as char)));
                }
            };

            tokens.push(Token {
                kind,
                text: self.source.text()[start..self.pos].to_owned(),
                pos: start,
                len: self.pos - start,
                line,
            });
        }
    }

    fn punct(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'#' => {
                    while let Some(&b) = self.bytes.get(self.pos) {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_string(&mut self, start: usize) -> Result<String, PolicyError> {
        self.pos += 1; // opening quote
        let content_start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'"' => {
                    let text = self.source.text()[content_start..self.pos].to_owned();
                    self.pos += 1;
                    return Ok(text);
                }
                b'\\' => self.pos += 2,
                b'\n' => return Err(self.error(start, "newline in string literal")),
                _ => self.pos += 1,
            }
        }
        Err(self.error(start, "unterminated string literal"))
    }

    fn lex_raw_string(&mut self, start: usize) -> Result<String, PolicyError> {
        self.pos += 1; // opening backtick
        let content_start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'`' {
                let text = self.source.text()[content_start..self.pos].to_owned();
                self.pos += 1;
                return Ok(text);
            }
            if b == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
        Err(self.error(start, "unterminated raw string literal"))
    }

    fn lex_number(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        let mut kind = TokenKind::Int;
        while matches!(self.bytes.get(self.pos), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.bytes.get(self.pos) == Some(&b'.') && matches!(self.peek(1), Some(b'0'..=b'9')) {
            kind = TokenKind::Float;
            self.pos += 1;
            while matches!(self.bytes.get(self.pos), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.bytes.get(self.pos), Some(b'e' | b'E')) {
            kind = TokenKind::Float;
            self.pos += 1;
            if matches!(self.bytes.get(self.pos), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            while matches!(self.bytes.get(self.pos), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        (kind, self.source.text()[start..self.pos].to_owned())
    }

    fn lex_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(
            self.bytes.get(self.pos),
            Some(b'_' | b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9')
        ) {
            self.pos += 1;
        }
        self.source.text()[start..self.pos].to_owned()
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> PolicyError {
        PolicyError::at(
            ErrorCode::ParseError,
            message,
            &Location::new(self.source.clone(), pos, 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let source = Source::new("test.rego", text);
        Lexer::new(source).tokenize().unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_rule_definition() {
        assert_eq!(
            kinds("x := data.a[1] # comment"),
            vec![
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Ident,
                TokenKind::Dot,
                TokenKind::Ident,
                TokenKind::LBrack,
                TokenKind::Int,
                TokenKind::RBrack,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_operators() {
        assert_eq!(
            kinds("= == := != <= >="),
            vec![
                TokenKind::Unify,
                TokenKind::EqEq,
                TokenKind::Assign,
                TokenKind::NotEq,
                TokenKind::Lte,
                TokenKind::Gte,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_keep_escapes_raw() {
        let source = Source::new("test.rego", r#""a\"b" `raw\n`"#);
        let tokens = Lexer::new(source).tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].text, "a\\\"b");
        assert_eq!(tokens[1].kind, TokenKind::RawString);
        assert_eq!(tokens[1].text, "raw\\n");
    }

    #[test]
    fn rejects_unterminated_string() {
        let source = Source::new("test.rego", "\"oops");
        assert!(Lexer::new(source).tokenize().is_err());
    }

    #[test]
    fn tracks_lines() {
        let source = Source::new("test.rego", "a\nb\n\nc");
        let tokens = Lexer::new(source).tokenize().unwrap();
        let lines: Vec<usize> = tokens.iter().map(|t| t.line).collect();
        assert_eq!(lines, vec![1, 2, 4, 4]);
    }
}
