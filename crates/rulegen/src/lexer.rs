//! Tokenizer for spec files.

use serde::Serialize;

use crate::{
    ast::RcString,
    error::SyntaxError,
    span::{LineCol, Span},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[rustfmt::skip]
pub enum TokenKind {
    Name, Char, String, IntConst, FloatConst, DoubleConst,

    LParen, RParen, LCurly, RCurly, LBracket, RBracket, LAngle, RAngle,
    Eq, Comma, Colon, Semicolon, Dot, DotDotDot, Star, Percent, Plus, Arrow,

    RuleKeyword, StructKeyword, OneofKeyword, ZerooroneKeyword, ZeroormoreKeyword,
    AsiKeyword, AttrKeyword,

    Eof,
}

impl TokenKind {
    pub fn describe(self) -> &'static str {
        use TokenKind::*;
        match self {
            Name => "a name",
            Char => "a character literal",
            String => "a string literal",
            IntConst => "an integer",
            FloatConst | DoubleConst => "a floating point number",
            LParen => "'('",
            RParen => "')'",
            LCurly => "'{'",
            RCurly => "'}'",
            LBracket => "'['",
            RBracket => "']'",
            LAngle => "'<'",
            RAngle => "'>'",
            Eq => "'='",
            Comma => "','",
            Colon => "':'",
            Semicolon => "';'",
            Dot => "'.'",
            DotDotDot => "'...'",
            Star => "'*'",
            Percent => "'%'",
            Plus => "'+'",
            Arrow => "'==>'",
            RuleKeyword => "'rule'",
            StructKeyword => "'STRUCT'",
            OneofKeyword => "'ONEOF'",
            ZerooroneKeyword => "'ZEROORONE'",
            ZeroormoreKeyword => "'ZEROORMORE'",
            AsiKeyword => "'ASI'",
            AttrKeyword => "'attr'",
            Eof => "end of file",
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum TokenValue {
    None,
    Char(char),
    Str(RcString),
    Int(i64),
    Float(f32),
    Double(f64),
}

#[derive(Clone, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub pos: LineCol,
    pub value: TokenValue,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        self.span.as_str(src)
    }
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: u32,
    line: u32,
    line_start: u32,
    comment_prefix: &'a str,
    comments: Vec<String>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, comment_prefix: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            line_start: 0,
            comment_prefix,
            comments: Vec::new(),
        }
    }

    /// Texts of the comments seen so far, without the prefix.
    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn into_comments(self) -> Vec<String> {
        self.comments
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn line_col(&self, pos: u32) -> LineCol {
        if pos >= self.line_start {
            return LineCol::new(self.line, pos - self.line_start + 1);
        }
        // an unterminated literal has already moved past the line it started on
        let before = &self.bytes()[..pos as usize];
        let line = before.iter().filter(|&&b| b == b'\n').count() as u32 + 1;
        let line_start = before
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i as u32 + 1);
        LineCol::new(line, pos - line_start + 1)
    }

    fn is_empty(&self) -> bool {
        self.pos as usize == self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.pos as usize).copied()
    }

    fn peek_nth(&self, n: usize) -> Option<u8> {
        self.bytes().get(self.pos as usize + n).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(byte)
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.src[self.pos as usize..].chars().next()?;
        if c == '\n' {
            self.next();
        } else {
            self.pos += c.len_utf8() as u32;
        }
        Some(c)
    }

    fn consume(&mut self, value: u8) -> bool {
        if self.peek() == Some(value) {
            self.next();
            true
        } else {
            false
        }
    }

    fn consume_while(&mut self, predicate: impl Fn(u8) -> bool) -> Span {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if predicate(c) {
                self.next();
            } else {
                break;
            }
        }
        Span::new(start, self.pos)
    }

    fn sequence(&mut self, sequence: &str) -> bool {
        if self.src[self.pos as usize..].starts_with(sequence) {
            for _ in 0..sequence.len() {
                self.next();
            }
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.consume_while(|c| c.is_ascii_whitespace());
            if !self.comment_prefix.is_empty() && self.sequence(self.comment_prefix) {
                let span = self.consume_while(|c| c != b'\n');
                self.comments.push(span.as_str(self.src).trim().to_owned());
                continue;
            }
            break;
        }
    }

    fn error(&self, start: u32, expected: &'static str) -> SyntaxError {
        let found = self
            .src
            .get(start as usize..)
            .and_then(|s| s.chars().next())
            .map_or_else(|| "end of file".to_owned(), |c| format!("'{c}'"));
        SyntaxError::new(self.line_col(start), expected, found)
    }

    pub fn next_token(&mut self) -> Result<Token, SyntaxError> {
        self.skip_trivia();

        let start = self.pos;
        let pos = self.line_col(start);
        let mut value = TokenValue::None;

        let Some(byte) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span::at(start),
                pos,
                value,
            });
        };

        use TokenKind::*;
        let kind = match byte {
            b'(' => self.single(LParen),
            b')' => self.single(RParen),
            b'{' => self.single(LCurly),
            b'}' => self.single(RCurly),
            b'[' => self.single(LBracket),
            b']' => self.single(RBracket),
            b'<' => self.single(LAngle),
            b'>' => self.single(RAngle),
            b',' => self.single(Comma),
            b':' => self.single(Colon),
            b';' => self.single(Semicolon),
            b'*' => self.single(Star),
            b'%' => self.single(Percent),
            b'+' => self.single(Plus),
            b'=' => {
                if self.sequence("==>") {
                    Arrow
                } else {
                    self.single(Eq)
                }
            }
            b'.' => {
                if self.sequence("...") {
                    DotDotDot
                } else {
                    self.single(Dot)
                }
            }
            b'\'' => {
                self.next();
                let Some(c) = self.next_char() else {
                    return Err(self.error(start, "a character literal"));
                };
                if !self.consume(b'\'') {
                    return Err(self.error(self.pos, "a closing quote"));
                }
                value = TokenValue::Char(c);
                Char
            }
            b'"' => {
                value = TokenValue::Str(self.string_literal(start)?.into());
                String
            }
            b'0'..=b'9' => self.number(start, &mut value)?,
            b'-' if matches!(self.peek_nth(1), Some(b'0'..=b'9' | b'.')) => {
                self.number(start, &mut value)?
            }
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => {
                let span = self.consume_while(
                    |c| matches!(c, b'_' | b'$' | b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9'),
                );
                match span.as_str(self.src) {
                    "rule" => RuleKeyword,
                    "STRUCT" => StructKeyword,
                    "ONEOF" => OneofKeyword,
                    "ZEROORONE" => ZerooroneKeyword,
                    "ZEROORMORE" => ZeroormoreKeyword,
                    "ASI" => AsiKeyword,
                    "attr" => AttrKeyword,
                    _ => Name,
                }
            }
            _ => return Err(self.error(start, "a token")),
        };

        let token = Token {
            kind,
            span: Span::new(start, self.pos),
            pos,
            value,
        };
        log::trace!("{pos} {kind:?} {:?}", token.text(self.src));
        Ok(token)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.next();
        kind
    }

    // `\"` and `\\` collapse to one character, any other escape is kept verbatim
    fn string_literal(&mut self, start: u32) -> Result<String, SyntaxError> {
        self.next();
        let mut out = String::new();
        loop {
            match self.next_char() {
                Some('"') => return Ok(out),
                Some('\\') => match self.next_char() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('\n') | None => break,
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                },
                Some('\n') | None => break,
                Some(c) => out.push(c),
            }
        }
        let mut err = self.error(start, "a closing '\"'");
        err.found = "end of line".to_owned();
        Err(err)
    }

    fn number(&mut self, start: u32, value: &mut TokenValue) -> Result<TokenKind, SyntaxError> {
        let negative = self.consume(b'-');

        if self.sequence("0x") || self.sequence("0X") {
            let digits = self.consume_while(|c| c.is_ascii_hexdigit());
            let parsed = i64::from_str_radix(digits.as_str(self.src), 16)
                .map_err(|_| self.error(start, "a hexadecimal number"))?;
            *value = TokenValue::Int(if negative { -parsed } else { parsed });
            return Ok(TokenKind::IntConst);
        }

        let digits = self.consume_while(|c| c.is_ascii_digit());
        let is_float = matches!(self.peek(), Some(b'.' | b'e' | b'E' | b'f' | b'F'));

        if !is_float {
            let text = digits.as_str(self.src);
            let parsed = if text.len() > 1 && text.starts_with('0') {
                i64::from_str_radix(text, 8)
            } else {
                text.parse::<i64>()
            }
            .map_err(|_| self.error(start, "an integer"))?;

            // integer suffixes carry no meaning in a spec file
            if matches!(self.peek(), Some(b'u' | b'U')) {
                self.next();
                _ = self.consume(b'l') || self.consume(b'L');
            } else if matches!(self.peek(), Some(b'l' | b'L')) {
                self.next();
                if matches!(self.peek(), Some(b'l' | b'L' | b'u' | b'U')) {
                    self.next();
                }
            }

            *value = TokenValue::Int(if negative { -parsed } else { parsed });
            return Ok(TokenKind::IntConst);
        }

        self.consume(b'.');
        self.consume_while(|c| c.is_ascii_digit());
        if self.consume(b'e') || self.consume(b'E') {
            _ = self.consume(b'-') || self.consume(b'+');
            if self.consume_while(|c| c.is_ascii_digit()).is_empty() {
                return Err(self.error(self.pos, "an exponent"));
            }
        }
        let text = Span::new(start, self.pos).as_str(self.src);

        if self.consume(b'f') || self.consume(b'F') {
            let parsed = text
                .parse::<f32>()
                .map_err(|_| self.error(start, "a floating point number"))?;
            *value = TokenValue::Float(parsed);
            Ok(TokenKind::FloatConst)
        } else {
            let parsed = text
                .parse::<f64>()
                .map_err(|_| self.error(start, "a floating point number"))?;
            *value = TokenValue::Double(parsed);
            Ok(TokenKind::DoubleConst)
        }
    }
}

/// Tokenizes the whole file, the last token is always [`TokenKind::Eof`].
pub fn lex(l: &mut Lexer) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    loop {
        let token = l.next_token()?;
        let eof = token.kind == TokenKind::Eof;
        tokens.push(token);
        if eof {
            break;
        }
    }
    debug_assert!(l.is_empty());
    Ok(tokens)
}
