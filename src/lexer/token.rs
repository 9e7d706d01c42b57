//! The tokens that the script source can be scanned into.
//!
//! See [`Token`] for more information.

use std::collections::BTreeMap;
use std::fmt::Display;

use once_cell::sync::Lazy;

use crate::span::{Span, Spanned};

/// A specific unit that carries some graphemic value in a script.
#[derive(PartialEq, Eq, Debug, Clone, Hash)]
pub enum Token {
    /// An identifier, such as function names or variable names. (e.g. `abcd`, `a_b`, `a1`)
    Ident(String),

    /// A numeric value, kept as its raw image plus the base it was written in
    /// (e.g. `123`, `1.5e3`, `0xFF`, `0o17`, `0b101`)
    Numeric(String, NumericKind),

    /// A string literal (e.g. `"hello!"`, `'hi'`).
    ///
    /// The body is kept *raw*: escape sequences are processed during literal
    /// construction in the parser, not here.
    Str {
        /// The raw body of the literal, escapes unprocessed.
        raw: String,
        /// The quote character used (`'` or `"`).
        quote: char,
    },

    /// A regular expression literal (e.g. `/ab+c/gi`).
    Regex {
        /// The pattern between the slashes, unprocessed.
        pattern: String,
        /// The trailing flags.
        flags: String,
    },

    /// Keywords (e.g. `if`, `func`, `reply`).
    ///
    /// These cannot be identifiers in any circumstance.
    Keyword(Keyword),

    /// Operators and punctuation (e.g. `+`, `==`, `(`)
    Operator(Operator),

    /// Statement terminator (`;`)
    LineSep,
}

/// The numeric base/shape a [`Token::Numeric`] was written in.
///
/// The parser dispatches on this to convert the raw image into a number.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum NumericKind {
    /// Decimal, with optional fraction and exponent (`12`, `1.5`, `2e9`)
    Dec,
    /// Hexadecimal (`0xFF`)
    Hex,
    /// Octal (`0o17`)
    Oct,
    /// Binary (`0b1011`)
    Bin,
}

/// A token with position information.
#[derive(PartialEq, Eq, Debug, Clone, Hash)]
pub struct FullToken {
    pub(crate) kind: Token,
    pub(crate) span: Span,
    /// Whether a line terminator appeared between the previous token and this one.
    ///
    /// The parser's automatic terminator insertion keys off of this.
    pub(crate) after_newline: bool,
}

impl FullToken {
    /// Create a FullToken using a token and its given position.
    pub fn new(kind: Token, span: Span, after_newline: bool) -> Self {
        Self { kind, span, after_newline }
    }
}

impl std::ops::Deref for FullToken {
    type Target = Token;

    fn deref(&self) -> &Self::Target {
        &self.kind
    }
}

impl PartialEq<Token> for FullToken {
    fn eq(&self, other: &Token) -> bool {
        &self.kind == other
    }
}
impl PartialEq<FullToken> for Token {
    fn eq(&self, other: &FullToken) -> bool {
        self == &other.kind
    }
}
impl Spanned for FullToken {
    fn span(&self) -> Span {
        self.span
    }
}

macro_rules! define_keywords {
    (reserved: { $($id:ident: $ex:literal),* $(,)? }
     future: { $($fid:ident: $fex:literal),* $(,)? }) => {
        /// Enum that provides all the reserved words of the language.
        ///
        /// This includes the future-reserved set, which cannot be used as
        /// identifiers even though no grammar rule consumes them.
        #[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
        pub enum Keyword {
            $(
                #[allow(missing_docs)] $id,
            )*
            $(
                #[allow(missing_docs)] $fid,
            )*
        }

        impl Keyword {
            /// If the string is a keyword, return the `Token` it represents
            /// or `None` if it does not represent a token.
            pub fn get_kw(s: &str) -> Option<Token> {
                match s {
                    $(
                        $ex => Some(Token::Keyword(Self::$id)),
                    )*
                    $(
                        $fex => Some(Token::Keyword(Self::$fid)),
                    )*
                    _ => None
                }
            }

            /// Whether this keyword is reserved for future use only.
            ///
            /// Future-reserved words are rejected wherever an identifier is
            /// expected, but no grammar production consumes them.
            pub fn is_future_reserved(&self) -> bool {
                match self {
                    $(Self::$id => false,)*
                    $(Self::$fid => true,)*
                }
            }
        }

        impl Display for Keyword {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $(Self::$id => $ex,)*
                    $(Self::$fid => $fex,)*
                })
            }
        }
    };
}

macro_rules! define_operators {
    ($($id:ident: $ex:literal),* $(,)?) => {
        /// The defined operators and punctuation.
        #[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
        pub enum Operator {
            $(
                #[allow(missing_docs)] $id
            ),*
        }

        impl Display for Operator {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $(Self::$id => $ex),*
                })
            }
        }

        pub(super) static OP_MAP: Lazy<BTreeMap<&'static str, Token>> = Lazy::new(|| {
            let mut m = BTreeMap::new();

            $(m.insert($ex, Token::Operator(Operator::$id));)*

            m
        });
    };
}

define_keywords! {
    reserved: {
        If:       "if",
        Else:     "else",
        While:    "while",
        For:      "for",
        Of:       "of",       // for (x of xs)
        Func:     "func",
        Return:   "return",
        Break:    "break",
        Continue: "continue",
        Sleep:    "sleep",
        Reply:    "reply",
        Then:     "then",     // cond then a else b
        And:      "and",
        Or:       "or",
        True:     "true",
        False:    "false",
        Null:     "null",
    }
    future: {
        Let:    "let",
        Const:  "const",
        Var:    "var",
        Class:  "class",
        New:    "new",
        Try:    "try",
        Catch:  "catch",
        Throw:  "throw",
        Switch: "switch",
        Case:   "case",
        Do:     "do",
        In:     "in",
        Import: "import",
        Export: "export",
    }
}

define_operators! {
    Plus:    "+",
    Minus:   "-",
    Star:    "*",
    Slash:   "/",
    Percent: "%",
    Caret:   "^",
    Excl:    "!",

    DPlus:  "++",
    DMinus: "--",

    Lt:     "<",
    Le:     "<=",
    Gt:     ">",
    Ge:     ">=",
    Equal:  "=",
    DEqual: "==",
    Ne:     "!=",

    PlusEq:    "+=",
    MinusEq:   "-=",
    StarEq:    "*=",
    SlashEq:   "/=",
    PercentEq: "%=",
    CaretEq:   "^=",

    Dot:    ".",
    Comma:  ",",
    Colon:  ":",

    LParen:  "(",
    RParen:  ")",
    LSquare: "[",
    RSquare: "]",
    LCurly:  "{",
    RCurly:  "}"
}

impl Operator {
    /// All relational operators share this category for grammar dispatch.
    pub fn is_relational(&self) -> bool {
        matches!(self, Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge)
    }

    /// All equality operators share this category for grammar dispatch.
    pub fn is_equality(&self) -> bool {
        matches!(self, Operator::DEqual | Operator::Ne)
    }

    /// All assignment operators (plain and compound) share this category.
    pub fn is_assignment(&self) -> bool {
        matches!(self,
            | Operator::Equal
            | Operator::PlusEq
            | Operator::MinusEq
            | Operator::StarEq
            | Operator::SlashEq
            | Operator::PercentEq
            | Operator::CaretEq
        )
    }
}

impl Token {
    /// Whether this token can end an operand.
    ///
    /// This drives the regex-literal sub-grammar: a `/` after an operand end
    /// is a division operator, anywhere else it opens a regex literal.
    pub fn ends_operand(&self) -> bool {
        matches!(self,
            | Token::Ident(_)
            | Token::Numeric(..)
            | Token::Str { .. }
            | Token::Regex { .. }
            | Token::Keyword(Keyword::True)
            | Token::Keyword(Keyword::False)
            | Token::Keyword(Keyword::Null)
            | Token::Operator(Operator::RParen)
            | Token::Operator(Operator::RSquare)
            | Token::Operator(Operator::DPlus)
            | Token::Operator(Operator::DMinus)
        )
    }
}

/// Utility macro that can be used as a shorthand for [`Keyword`] or [`Operator`] tokens.
#[macro_export]
macro_rules! token {
    (if)       => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::If)       };
    (else)     => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Else)     };
    (while)    => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::While)    };
    (for)      => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::For)      };
    (of)       => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Of)       };
    (func)     => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Func)     };
    (return)   => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Return)   };
    (break)    => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Break)    };
    (continue) => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Continue) };
    (sleep)    => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Sleep)    };
    (reply)    => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Reply)    };
    (then)     => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Then)     };
    (and)      => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::And)      };
    (or)       => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Or)       };
    (true)     => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::True)     };
    (false)    => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::False)    };
    (null)     => { $crate::lexer::token::Token::Keyword($crate::lexer::token::Keyword::Null)     };

    (+)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Plus)      };
    (-)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Minus)     };
    (*)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Star)      };
    (/)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Slash)     };
    (%)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Percent)   };
    (^)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Caret)     };
    (!)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Excl)      };
    (++)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::DPlus)     };
    (--)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::DMinus)    };
    (<)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Lt)        };
    (<=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Le)        };
    (>)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Gt)        };
    (>=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Ge)        };
    (=)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Equal)     };
    (==)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::DEqual)    };
    (!=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Ne)        };
    (+=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::PlusEq)    };
    (-=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::MinusEq)   };
    (*=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::StarEq)    };
    (/=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::SlashEq)   };
    (%=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::PercentEq) };
    (^=)   => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::CaretEq)   };
    (.)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Dot)       };
    (,)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Comma)     };
    (:)    => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::Colon)     };
    ("(")  => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::LParen)    };
    (")")  => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::RParen)    };
    ("[")  => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::LSquare)   };
    ("]")  => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::RSquare)   };
    ("{")  => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::LCurly)    };
    ("}")  => { $crate::lexer::token::Token::Operator($crate::lexer::token::Operator::RCurly)    };

    (;) => { $crate::lexer::token::Token::LineSep };
}
#[doc(inline)]
pub use token;

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => f.write_str(s),
            Token::Numeric(n, _) => f.write_str(n),
            Token::Str { raw, quote } => write!(f, "{quote}{raw}{quote}"),
            Token::Regex { pattern, flags } => write!(f, "/{pattern}/{flags}"),
            Token::Keyword(kw) => Display::fmt(kw, f),
            Token::Operator(op) => Display::fmt(op, f),
            Token::LineSep => f.write_str(";"),
        }
    }
}
