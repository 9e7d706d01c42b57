//! Converts a script source string into a sequence of tokens.
//!
//! The lexer is error-tolerant: an unrecognized character sequence is recorded
//! as a [`LexErr`] with its excerpt and exact position, and scanning resumes at
//! the next character. All errors are collected and returned together with the
//! tokens that did scan — nothing is thrown mid-scan.
//!
//! This module provides:
//! - [`tokenize`]: A function to scan a string into tokens.
//! - [`Lexer`]: The struct that does all the scanning.
//! - [`token`]: The token model.

use crate::err::{Cursor, FullScriptErr, ScriptErr};
use crate::span::Span;

use self::token::{FullToken, Keyword, NumericKind, Token, OP_MAP};
pub mod token;

/// Scan the input into tokens, collecting lexical errors along the way.
pub fn tokenize(input: &str) -> TokenizeOutput {
    Lexer::new(input).lex()
}

/// The result of a tokenize pass: every token that scanned, plus every
/// lexical error encountered. The two are not mutually exclusive.
#[derive(Debug)]
pub struct TokenizeOutput {
    /// Tokens, in source order. Whitespace and comments are skipped.
    pub tokens: Vec<FullToken>,
    /// All lexical errors, in source order.
    pub errors: Vec<FullLexErr>,
}

/// An error that occurs in the scanning process.
#[derive(PartialEq, Eq, Debug)]
pub enum LexErr {
    /// Character sequence matching no token rule.
    UnknownChar(String),
    /// Hit EOF or a bad digit while scanning a numeric literal.
    MalformedNumeric(String),
    /// Hit EOF instead of the closing quote.
    UnterminatedString,
    /// A raw line terminator appeared inside a string literal.
    NewlineInString,
    /// Hit EOF instead of the closing `/` of a regex literal.
    UnterminatedRegex,
    /// A raw line terminator appeared inside a regex literal.
    NewlineInRegex,
    /// Hit EOF inside a `/* */` comment.
    UnclosedComment,
}

impl ScriptErr for LexErr {
    fn err_name(&self) -> &'static str {
        "syntax error"
    }

    fn message(&self) -> String {
        match self {
            LexErr::UnknownChar(s)      => format!("unexpected character sequence '{s}'"),
            LexErr::MalformedNumeric(s) => format!("malformed numeric literal '{s}'"),
            LexErr::UnterminatedString  => String::from("string was never terminated"),
            LexErr::NewlineInString     => String::from("string cannot contain a line break"),
            LexErr::UnterminatedRegex   => String::from("regular expression was never terminated"),
            LexErr::NewlineInRegex      => String::from("regular expression cannot contain a line break"),
            LexErr::UnclosedComment     => String::from("comment was never terminated"),
        }
    }
}

/// A [`LexErr`] with position information attached.
pub type FullLexErr = FullScriptErr<LexErr>;

/// The struct that performs the full scanning process.
///
/// # Example
/// ```
/// # use ccscript::lexer::Lexer;
/// use ccscript::lexer::token::{Token, token};
///
/// let out = Lexer::new("a + b").lex();
/// assert!(out.errors.is_empty());
/// let kinds: Vec<_> = out.tokens.iter().map(|t| (**t).clone()).collect();
/// assert_eq!(kinds, vec![
///     Token::Ident(String::from("a")),
///     token![+],
///     Token::Ident(String::from("b")),
/// ]);
/// ```
pub struct Lexer<'s> {
    src: &'s str,
    /// Byte offset + character, for every character of the input.
    chars: Vec<(usize, char)>,
    /// Index of the next unread character in `chars`.
    pos: usize,

    /// The line/column of the next unread character.
    cursor: Cursor,
    /// The line/column of the last read character.
    last_cursor: Cursor,

    /// Start of the token currently being scanned.
    token_start: TokenStart,
    /// Whether a line terminator has been seen since the last emitted token.
    pending_newline: bool,

    tokens: Vec<FullToken>,
    errors: Vec<FullLexErr>,
}

#[derive(Clone, Copy)]
struct TokenStart {
    cursor: Cursor,
    offset: usize,
}

impl<'s> Lexer<'s> {
    /// Create a new lexer over an input string.
    pub fn new(input: &'s str) -> Self {
        Self {
            src: input,
            chars: input.char_indices().collect(),
            pos: 0,
            cursor: (0, 0),
            last_cursor: (0, 0),
            token_start: TokenStart { cursor: (0, 0), offset: 0 },
            pending_newline: false,
            tokens: vec![],
            errors: vec![],
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).map(|&(_, c)| c)
    }

    /// Byte offset of the next unread character (or end of input).
    fn offset(&self) -> usize {
        self.chars.get(self.pos)
            .map_or(self.src.len(), |&(o, _)| o)
    }

    fn next(&mut self) -> Option<char> {
        let &(_, c) = self.chars.get(self.pos)?;
        self.pos += 1;
        self.last_cursor = self.cursor;

        if c == '\n' {
            self.cursor = (self.cursor.0 + 1, 0);
        } else {
            self.cursor.1 += 1;
        }

        Some(c)
    }

    fn mark_start(&mut self) {
        self.token_start = TokenStart { cursor: self.cursor, offset: self.offset() };
    }

    /// The span from the marked token start through the last read character.
    fn token_span(&self) -> Span {
        Span::new(self.token_start.cursor, self.last_cursor, self.token_start.offset, self.offset())
    }

    fn push_token(&mut self, kind: Token) {
        let span = self.token_span();
        let after_newline = std::mem::take(&mut self.pending_newline);
        self.tokens.push(FullToken::new(kind, span, after_newline));
    }

    fn push_err(&mut self, e: LexErr) {
        self.errors.push(e.at_range(self.token_span().cursor_range()));
    }

    /// Scan the entire input, consuming the lexer.
    pub fn lex(mut self) -> TokenizeOutput {
        while let Some(c) = self.peek() {
            self.mark_start();

            match c {
                c if c.is_whitespace() => {
                    if c == '\n' {
                        self.pending_newline = true;
                    }
                    self.next();
                }
                '/' => self.lex_slash(),
                c if c == '_' || c.is_alphabetic() => self.lex_ident(),
                c if c.is_ascii_digit() => self.lex_numeric(),
                '"' | '\'' => self.lex_str(c),
                ';' => {
                    self.next();
                    self.push_token(Token::LineSep);
                }
                _ => self.lex_punct(),
            }
        }

        TokenizeOutput { tokens: self.tokens, errors: self.errors }
    }

    /// A `/` opens a comment, a division operator, or a regex literal,
    /// depending on the two following characters and the previous token.
    fn lex_slash(&mut self) {
        match self.peek_at(1) {
            Some('/') => {
                // line comment: skip through the end of line (excl. the newline itself)
                while let Some(c) = self.peek() {
                    if c == '\n' { break; }
                    self.next();
                }
            }
            Some('*') => {
                self.next();
                self.next();
                loop {
                    match self.next() {
                        Some('*') if self.peek() == Some('/') => {
                            self.next();
                            break;
                        }
                        Some(_) => {}
                        None => {
                            self.push_err(LexErr::UnclosedComment);
                            break;
                        }
                    }
                }
            }
            _ => {
                let after_operand = self.tokens.last()
                    .is_some_and(|t| t.ends_operand());

                if after_operand {
                    self.lex_punct();
                } else {
                    self.lex_regex();
                }
            }
        }
    }

    fn lex_ident(&mut self) {
        let mut buf = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                buf.push(c);
                self.next();
            } else {
                break;
            }
        }

        // keyword classification happens here, in the same pass
        let token = Keyword::get_kw(&buf)
            .unwrap_or(Token::Ident(buf));
        self.push_token(token);
    }

    fn lex_numeric(&mut self) {
        let mut buf = String::new();

        // radix prefixes: 0x / 0o / 0b
        if self.peek() == Some('0') {
            let kind = match self.peek_at(1) {
                Some('x') | Some('X') => Some((NumericKind::Hex, 16)),
                Some('o') | Some('O') => Some((NumericKind::Oct, 8)),
                Some('b') | Some('B') => Some((NumericKind::Bin, 2)),
                _ => None,
            };

            if let Some((kind, radix)) = kind {
                buf.push(self.next().unwrap());
                buf.push(self.next().unwrap());

                let mut any = false;
                while let Some(c) = self.peek() {
                    if c.is_digit(radix) {
                        buf.push(c);
                        self.next();
                        any = true;
                    } else {
                        break;
                    }
                }

                if any {
                    self.push_token(Token::Numeric(buf, kind));
                } else {
                    self.push_err(LexErr::MalformedNumeric(buf));
                }
                return;
            }
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                buf.push(c);
                self.next();
            } else {
                break;
            }
        }

        // fraction; the dot is only part of the number if a digit follows
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            buf.push(self.next().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    buf.push(c);
                    self.next();
                } else {
                    break;
                }
            }
        }

        // exponent
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                lookahead = 2;
            }

            if self.peek_at(lookahead).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..lookahead {
                    buf.push(self.next().unwrap());
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        buf.push(c);
                        self.next();
                    } else {
                        break;
                    }
                }
            }
        }

        self.push_token(Token::Numeric(buf, NumericKind::Dec));
    }

    /// Scan a string literal. The body is kept raw; escapes are processed
    /// during literal construction in the parser.
    fn lex_str(&mut self, quote: char) {
        self.next(); // consume the quote

        let mut raw = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.next();
                    break;
                }
                Some('\n') => {
                    self.push_err(LexErr::NewlineInString);
                    return;
                }
                Some('\\') => {
                    raw.push(self.next().unwrap());
                    // the escaped character never terminates the literal
                    match self.peek() {
                        Some('\n') => {
                            self.push_err(LexErr::NewlineInString);
                            return;
                        }
                        Some(_) => raw.push(self.next().unwrap()),
                        None => {
                            self.push_err(LexErr::UnterminatedString);
                            return;
                        }
                    }
                }
                Some(_) => raw.push(self.next().unwrap()),
                None => {
                    self.push_err(LexErr::UnterminatedString);
                    return;
                }
            }
        }

        self.push_token(Token::Str { raw, quote });
    }

    /// Scan a regex literal (the leading `/` is still unread).
    ///
    /// The first pattern character must not be `*`, `+` or `?`; when it is,
    /// the slash is reinterpreted as a division operator instead.
    fn lex_regex(&mut self) {
        if matches!(self.peek_at(1), Some('*') | Some('+') | Some('?')) {
            self.lex_punct();
            return;
        }

        self.next(); // consume the slash

        let mut pattern = String::new();
        let mut in_class = false;
        loop {
            match self.peek() {
                Some('/') if !in_class => {
                    self.next();
                    break;
                }
                Some('\n') => {
                    self.push_err(LexErr::NewlineInRegex);
                    return;
                }
                Some('\\') => {
                    pattern.push(self.next().unwrap());
                    match self.peek() {
                        Some('\n') => {
                            self.push_err(LexErr::NewlineInRegex);
                            return;
                        }
                        Some(_) => pattern.push(self.next().unwrap()),
                        None => {
                            self.push_err(LexErr::UnterminatedRegex);
                            return;
                        }
                    }
                }
                Some(c) => {
                    if c == '[' {
                        in_class = true;
                    } else if c == ']' {
                        in_class = false;
                    }
                    pattern.push(self.next().unwrap());
                }
                None => {
                    self.push_err(LexErr::UnterminatedRegex);
                    return;
                }
            }
        }

        let mut flags = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                flags.push(c);
                self.next();
            } else {
                break;
            }
        }

        self.push_token(Token::Regex { pattern, flags });
    }

    /// Scan an operator or punctuation by longest match against the operator map.
    ///
    /// When no operator matches, the maximal run of unmatchable characters is
    /// collected into a single error excerpt and scanning resumes after it.
    fn lex_punct(&mut self) {
        // longest operator in the map is 2 characters
        let two: String = (0..2).filter_map(|i| self.peek_at(i)).collect();

        for len in (1..=two.chars().count()).rev() {
            let prefix: String = two.chars().take(len).collect();
            if let Some(token) = OP_MAP.get(prefix.as_str()) {
                let token = token.clone();
                for _ in 0..len {
                    self.next();
                }
                self.push_token(token);
                return;
            }
        }

        // error recovery: swallow the run of unknown characters, report once
        let mut excerpt = String::new();
        while let Some(c) = self.peek() {
            let known = c.is_whitespace()
                || c == '_'
                || c.is_alphanumeric()
                || c == '"'
                || c == '\''
                || OP_MAP.contains_key(c.to_string().as_str());
            if known {
                break;
            }
            excerpt.push(c);
            self.next();
        }

        if excerpt.is_empty() {
            // a character the loop above cannot make progress on; consume it anyway
            if let Some(c) = self.next() {
                excerpt.push(c);
            }
        }

        self.push_err(LexErr::UnknownChar(excerpt));
    }
}

#[cfg(test)]
mod tests {
    use super::token::{token, NumericKind, Token};
    use super::{tokenize, LexErr};

    fn kinds(src: &str) -> Vec<Token> {
        let out = tokenize(src);
        assert!(out.errors.is_empty(), "unexpected errors: {:?}", out.errors);
        out.tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn numeric_forms() {
        assert_eq!(kinds("10 1.5 2e9 0xFF 0o17 0b101"), vec![
            Token::Numeric(String::from("10"), NumericKind::Dec),
            Token::Numeric(String::from("1.5"), NumericKind::Dec),
            Token::Numeric(String::from("2e9"), NumericKind::Dec),
            Token::Numeric(String::from("0xFF"), NumericKind::Hex),
            Token::Numeric(String::from("0o17"), NumericKind::Oct),
            Token::Numeric(String::from("0b101"), NumericKind::Bin),
        ]);
    }

    #[test]
    fn member_dot_is_not_fraction() {
        assert_eq!(kinds("a.1"), vec![
            Token::Ident(String::from("a")),
            token![.],
            Token::Numeric(String::from("1"), NumericKind::Dec),
        ]);
    }

    #[test]
    fn slash_is_division_after_operand() {
        assert_eq!(kinds("a / b"), vec![
            Token::Ident(String::from("a")),
            token![/],
            Token::Ident(String::from("b")),
        ]);
    }

    #[test]
    fn slash_is_regex_elsewhere() {
        assert_eq!(kinds("x = /ab+c/gi"), vec![
            Token::Ident(String::from("x")),
            token![=],
            Token::Regex { pattern: String::from("ab+c"), flags: String::from("gi") },
        ]);
    }

    #[test]
    fn regex_cannot_start_with_quantifier() {
        // `/*` opens a comment, so use `+`: the slash falls back to division
        let out = tokenize("a = /+b");
        assert!(out.errors.is_empty());
        assert_eq!(out.tokens[2].kind, token![/]);
    }

    #[test]
    fn error_recovery_continues() {
        let out = tokenize("a § b");
        assert_eq!(out.errors.len(), 1);
        assert_eq!(*out.errors[0].inner(), LexErr::UnknownChar(String::from("§")));
        assert_eq!(out.tokens.len(), 2);
    }
}
