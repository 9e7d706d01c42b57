//! Converts sequences of tokens to a syntax tree.
//!
//! The parser is implemented as a recursive descent parser.
//! This parser has grammatical rules, which break down into smaller grammatical rules.
//! The string is assigned the top-most rule (`program`) and the individual units of
//! this rule are computed by recursive statements.
//!
//! The parser is error-collecting: a statement that fails to parse is recorded and
//! the parser synchronizes to the next statement boundary, so several independent
//! syntax errors can be reported from a single pass.
//!
//! Statement terminators may be omitted where the language's automatic insertion
//! rules apply: before a line break, before a closing brace, and at end of input.
//!
//! This module provides:
//! - [`parse`]: A function to parse [a list of scanned tokens][`crate::lexer`] into a tree.
//! - [`Parser`]: The struct that does all the parsing.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::ast::{self, op, Located};
use crate::err::{Cursor, CursorRange, FullScriptErr, ScriptErr};
use crate::lexer::token::{token, FullToken, Keyword, NumericKind, Token};

/// Parses a sequence of tokens to a program tree, collecting syntax errors.
///
/// The tree is only produced when the token stream parsed cleanly; when errors
/// are present, every independent error found is returned instead.
pub fn parse(tokens: impl IntoIterator<Item = FullToken>) -> ParseOutput {
    Parser::new(tokens).parse()
}

/// The result of a parse pass.
#[derive(Debug)]
pub struct ParseOutput {
    /// The parsed program; `None` when any syntax error was found.
    pub program: Option<ast::Program>,
    /// All syntax errors, in source order.
    pub errors: Vec<FullParseErr>,
}

/// An error that occurs in the parsing process.
#[derive(Debug, PartialEq)]
pub enum ParseErr {
    /// The parser expected one of these tokens.
    ExpectedTokens(Vec<Token>),

    /// The parser expected an identifier.
    ExpectedIdent,

    /// The parser expected an expression here, but failed to match one.
    ExpectedExpr,

    /// The parser expected a property key (identifier, string or number).
    ExpectedPropertyKey,

    /// The string provided could not be parsed into a numeric value.
    CannotParseNumeric,

    /// The left side of an assignment cannot be assigned to.
    InvalidAssignTarget,

    /// The target of `++`/`--` cannot be updated.
    InvalidUpdateTarget,

    /// A reserved word was used where an identifier is expected.
    ReservedWord(Keyword),

    /// An octal escape in a string resolved past the one-byte range.
    OctalEscapeOutOfBounds(u32),

    /// A unicode escape in a string resolved to no valid code point.
    UnicodeEscapeOutOfBounds(u32),

    /// A `\x`/`\u` escape was malformed.
    MalformedEscape(char),
}

impl ScriptErr for ParseErr {
    fn err_name(&self) -> &'static str {
        "syntax error"
    }

    fn message(&self) -> String {
        match self {
            ParseErr::ExpectedTokens(tokens) => if tokens.len() == 1 {
                format!("expected '{}'", tokens[0])
            } else {
                let tstr = tokens.iter()
                    .map(ToString::to_string)
                    .map(|s| format!("'{}'", s))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("expected one of {}", tstr)
            },
            ParseErr::ExpectedIdent => String::from("expected identifier"),
            ParseErr::ExpectedExpr => String::from(
                "expected an expression: an identifier, literal, array, object, \
                 function, prefix operator, or '('"
            ),
            ParseErr::ExpectedPropertyKey => String::from("expected a property key (identifier, string, or number)"),
            ParseErr::CannotParseNumeric => String::from("could not parse numeric"),
            ParseErr::InvalidAssignTarget => String::from("cannot assign to this expression"),
            ParseErr::InvalidUpdateTarget => String::from("cannot increment or decrement this expression"),
            ParseErr::ReservedWord(kw) => format!("'{kw}' is a reserved word and cannot be used as an identifier"),
            ParseErr::OctalEscapeOutOfBounds(v) => format!("octal escape '\\{v:o}' is out of bounds (max \\377)"),
            ParseErr::UnicodeEscapeOutOfBounds(v) => format!("unicode escape '\\u{v:04x}' is out of bounds"),
            ParseErr::MalformedEscape(c) => format!("malformed '\\{c}' escape"),
        }
    }
}

/// A [`Result`] type for operations in the parsing process.
pub type ParseResult<T> = Result<T, FullParseErr>;
/// A [`ParseErr`] with position information attached.
pub type FullParseErr = FullScriptErr<ParseErr>;

macro_rules! expected_tokens {
    ($($t:tt),*) => {
        ParseErr::ExpectedTokens(vec![$(token![$t]),*])
    }
}

/// A struct that does the conversion of tokens to a program tree.
pub struct Parser {
    tokens: VecDeque<FullToken>,
    eof: (Cursor, usize /* byte offset */),
    errors: Vec<FullParseErr>,
}

impl Parser {
    /// Create a new Parser to read a given set of tokens.
    pub fn new(tokens: impl IntoIterator<Item = FullToken>) -> Self {
        let mut tokens: VecDeque<_> = tokens.into_iter().collect();

        let eof = if let Some(tok) = tokens.make_contiguous().last() {
            let span = tok.span;
            ((span.end.0, span.end.1 + 1), span.end_offset)
        } else {
            ((0, 0), 0)
        };

        Self { tokens, eof, errors: vec![] }
    }

    /// Consumes the parser and converts the tokens into a tree.
    pub fn parse(mut self) -> ParseOutput {
        let stmts = self.stmt_list(false);

        let errors = self.errors;
        ParseOutput {
            program: errors.is_empty().then(|| ast::Program(stmts)),
            errors,
        }
    }

    // General terminology:
    // "expect X": The next set of tokens must represent X, otherwise error.
    // "match X": If the next set of tokens represent X, consume those tokens.
    //     Otherwise, do & return nothing.

    /// Look at the next token in the input if present.
    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(0).map(|FullToken { kind, .. }| kind)
    }

    /// Look at the token `n` ahead in the input if present.
    fn peek_nth_token(&self, n: usize) -> Option<&Token> {
        self.tokens.get(n).map(|FullToken { kind, .. }| kind)
    }

    /// Consume the next token in the input and return it if present.
    fn next_token(&mut self) -> Option<FullToken> {
        self.tokens.pop_front()
    }

    /// Look at the range of the next token in the input (or return EOF).
    fn peek_loc(&self) -> CursorRange {
        self.tokens.get(0)
            .map_or(self.eof.0..=self.eof.0, |ft| ft.span.cursor_range())
    }

    /// Return whether the next token matches the specified token,
    /// and consume the token from input if it does.
    fn match1(&mut self, u: Token) -> bool {
        match self.peek_token() {
            Some(t) if t == &u => self.next_token(),
            _ => None,
        }
        .is_some()
    }

    /// If the next token is in the specified list of tokens,
    /// consume the token from input and return it.
    fn match_n(&mut self, one_of: &[Token]) -> Option<FullToken> {
        match self.peek_token() {
            Some(t) if one_of.contains(t) => self.next_token(),
            _ => None,
        }
    }

    /// Expect that the next token is the specified token,
    /// and error if the next token is not.
    fn expect1(&mut self, u: Token) -> ParseResult<FullToken> {
        if let Some(ft) = self.tokens.pop_front() {
            if ft.kind == u {
                Ok(ft)
            } else {
                Err(ParseErr::ExpectedTokens(vec![u]).at_range(ft.span.cursor_range()))
            }
        } else {
            Err(ParseErr::ExpectedTokens(vec![u]).at(self.eof.0))
        }
    }

    /// Expect that the next token is an identifier, rejecting reserved words.
    fn expect_ident(&mut self) -> ParseResult<Located<String>> {
        match self.tokens.pop_front() {
            Some(FullToken { kind: Token::Ident(s), span, .. }) => Ok(Located(s, span)),
            Some(FullToken { kind: Token::Keyword(kw), span, .. }) if kw.is_future_reserved() => {
                Err(ParseErr::ReservedWord(kw).at_range(span.cursor_range()))
            }
            Some(ft) => Err(ParseErr::ExpectedIdent.at_range(ft.span.cursor_range())),
            None => Err(ParseErr::ExpectedIdent.at(self.eof.0)),
        }
    }

    /// Expect a statement terminator.
    ///
    /// An explicit `;` is consumed. Failing that, a terminator is inserted
    /// automatically when a line break preceded the next token, the next token
    /// is a closing brace, or the input is exhausted. The inserted terminator
    /// is virtual: no token is consumed, so the insertion can never produce an
    /// empty statement. The `for`-header clause separators go through
    /// [`Parser::expect1`] instead and are never synthesized.
    fn expect_terminator(&mut self) -> ParseResult<()> {
        match self.tokens.get(0) {
            None => Ok(()),
            Some(ft) if ft.kind == Token::LineSep => {
                self.next_token();
                Ok(())
            }
            Some(ft) if ft.kind == token!["}"] || ft.after_newline => Ok(()),
            Some(ft) => Err(expected_tokens![;].at_range(ft.span.cursor_range())),
        }
    }

    /// Skip tokens until a statement boundary, so parsing can continue
    /// after an error. At least one token is always consumed.
    fn synchronize(&mut self) {
        // the offending token itself may already be the boundary
        if let Some(ft) = self.next_token() {
            if ft.kind == Token::LineSep {
                return;
            }
        }

        while let Some(t) = self.peek_token() {
            match t {
                Token::LineSep => {
                    self.next_token();
                    return;
                }
                t if t == &token!["}"] => return,
                | token![if] | token![while] | token![for] | token![func]
                | token![return] | token![break] | token![continue]
                | token![sleep] | token![reply] => return,
                _ => {
                    self.next_token();
                }
            }
        }
    }

    /// Parse statements until end of input (`in_block` false) or a closing
    /// brace (`in_block` true). Statement errors are collected, not propagated.
    fn stmt_list(&mut self, in_block: bool) -> Vec<ast::Stmt> {
        let mut stmts = vec![];

        loop {
            match self.peek_token() {
                None => break,
                Some(t) if in_block && t == &token!["}"] => break,
                Some(Token::LineSep) => {
                    // an explicit `;` on its own is an empty statement
                    self.next_token();
                    stmts.push(ast::Stmt::Empty);
                }
                Some(t) if !in_block && t == &token!["}"] => {
                    let e = ParseErr::ExpectedExpr.at_range(self.peek_loc());
                    self.errors.push(e);
                    self.synchronize();
                }
                Some(_) => match self.expect_terminated_stmt() {
                    Ok(st) => stmts.push(st),
                    Err(e) => {
                        self.errors.push(e);
                        self.synchronize();
                    }
                },
            }
        }

        stmts
    }

    /// Expect a statement plus its terminator (unless it ends with a block).
    fn expect_terminated_stmt(&mut self) -> ParseResult<ast::Stmt> {
        let st = self.expect_stmt()?;
        if !st.ends_with_block() {
            self.expect_terminator()?;
        }
        Ok(st)
    }

    /// Expect that the next tokens represent a statement.
    fn expect_stmt(&mut self) -> ParseResult<ast::Stmt> {
        match self.peek_token() {
            Some(t) if t == &token!["{"] => self.expect_block().map(ast::Stmt::Block),
            Some(token![if]) => self.expect_if(),
            Some(token![while]) => self.expect_while(),
            Some(token![for]) => self.expect_for(),
            Some(token![continue]) => {
                let span = self.next_token().unwrap().span;
                Ok(ast::Stmt::Continue(span))
            }
            Some(token![break]) => {
                let span = self.next_token().unwrap().span;
                Ok(ast::Stmt::Break(span))
            }
            Some(token![return]) => self.expect_return(),
            Some(token![sleep]) => {
                let span = self.next_token().unwrap().span;
                let expr = self.expect_expr()?;
                Ok(ast::Stmt::Sleep(span, expr))
            }
            Some(token![reply]) => {
                let span = self.next_token().unwrap().span;
                let expr = self.expect_expr()?;
                Ok(ast::Stmt::Reply(span, expr))
            }
            // `func name(...)` is a declaration; an anonymous `func (...)`
            // falls through to the expression statement
            Some(token![func]) if matches!(self.peek_nth_token(1), Some(Token::Ident(_))) => {
                self.expect_fun_decl().map(ast::Stmt::FunDecl)
            }
            _ => {
                let e = self.expect_expr()?;
                Ok(ast::Stmt::Expr(e))
            }
        }
    }

    /// Expect that the next tokens represent a block.
    fn expect_block(&mut self) -> ParseResult<ast::Block> {
        self.expect1(token!["{"])?;
        let stmts = self.stmt_list(true);
        self.expect1(token!["}"])?;
        Ok(ast::Block(stmts))
    }

    fn expect_if(&mut self) -> ParseResult<ast::Stmt> {
        self.expect1(token![if])?;
        self.expect1(token!["("])?;
        let cond = self.expect_expr()?;
        self.expect1(token![")"])?;

        let then_branch = Box::new(self.expect_terminated_stmt()?);

        // the else eagerly binds to the nearest if
        let else_branch = if self.match1(token![else]) {
            Some(Box::new(self.expect_terminated_stmt()?))
        } else {
            None
        };

        Ok(ast::Stmt::If { cond, then_branch, else_branch })
    }

    fn expect_while(&mut self) -> ParseResult<ast::Stmt> {
        self.expect1(token![while])?;
        self.expect1(token!["("])?;
        let cond = self.expect_expr()?;
        self.expect1(token![")"])?;

        let body = Box::new(self.expect_terminated_stmt()?);
        Ok(ast::Stmt::While { cond, body })
    }

    fn expect_for(&mut self) -> ParseResult<ast::Stmt> {
        self.expect1(token![for])?;
        self.expect1(token!["("])?;

        // `for (x of ...)` vs the three-clause form
        if matches!(self.peek_token(), Some(Token::Ident(_)))
            && matches!(self.peek_nth_token(1), Some(token![of]))
        {
            let var = self.expect_ident()?;
            self.expect1(token![of])?;
            let iter = self.expect_expr()?;
            self.expect1(token![")"])?;

            let body = Box::new(self.expect_terminated_stmt()?);
            return Ok(ast::Stmt::ForOf { var, iter, body });
        }

        let init = match self.peek_token() {
            Some(Token::LineSep) => None,
            _ => Some(self.expect_expr()?),
        };
        self.expect1(token![;])?;

        let cond = match self.peek_token() {
            Some(Token::LineSep) => None,
            _ => Some(self.expect_expr()?),
        };
        self.expect1(token![;])?;

        let update = match self.peek_token() {
            Some(t) if t == &token![")"] => None,
            _ => Some(self.expect_expr()?),
        };
        self.expect1(token![")"])?;

        let body = Box::new(self.expect_terminated_stmt()?);
        Ok(ast::Stmt::For { init, cond, update, body })
    }

    fn expect_return(&mut self) -> ParseResult<ast::Stmt> {
        let span = self.expect1(token![return])?.span;

        // `return` with no expression: the value ends at a terminator,
        // including an automatically inserted one
        let value = match self.tokens.get(0) {
            None => None,
            Some(ft) if ft.kind == Token::LineSep || ft.kind == token!["}"] => None,
            Some(ft) if ft.after_newline => None,
            Some(_) => Some(self.expect_expr()?),
        };

        Ok(ast::Stmt::Return(span, value))
    }

    fn expect_fun_decl(&mut self) -> ParseResult<ast::FunDecl> {
        self.expect1(token![func])?;
        let name = self.expect_ident()?;
        let params = self.expect_params()?;
        let body = Rc::new(self.expect_block()?);

        Ok(ast::FunDecl { name, params, body })
    }

    /// Expect a parenthesized, comma-separated parameter name list.
    fn expect_params(&mut self) -> ParseResult<Vec<Located<String>>> {
        self.expect1(token!["("])?;

        let mut params = vec![];
        if !matches!(self.peek_token(), Some(t) if t == &token![")"]) {
            params.push(self.expect_ident()?);
            while self.match1(token![,]) {
                params.push(self.expect_ident()?);
            }
        }

        self.expect1(token![")"])?;
        Ok(params)
    }

    // === expressions ===

    /// Expect that the next tokens represent an expression.
    fn expect_expr(&mut self) -> ParseResult<Located<ast::Expr>> {
        self.match_expr()?
            .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))
    }

    /// Match an expression at the lowest precedence level.
    fn match_expr(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        self.match_assignment()
    }

    fn match_assignment(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(lhs) = self.match_conditional()? else { return Ok(None) };

        let is_asg = matches!(
            self.peek_token(),
            Some(Token::Operator(o)) if o.is_assignment()
        );
        if !is_asg {
            return Ok(Some(lhs));
        }
        let op_tok = self.next_token().unwrap();

        if !is_assign_target(&lhs) {
            return Err(ParseErr::InvalidAssignTarget.at_range(lhs.range().cursor_range()));
        }

        // right-associative: `a = b = c` assigns `b = c` first
        let value = self.match_assignment()?
            .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;

        let op = op::compound_assign_op(&op_tok.kind);
        let span = lhs.range() + value.range();
        Ok(Some(Located(
            ast::Expr::Assign {
                target: Box::new(lhs),
                op,
                value: Box::new(value),
            },
            span,
        )))
    }

    fn match_conditional(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(cond) = self.match_or()? else { return Ok(None) };

        if !self.match1(token![then]) {
            return Ok(Some(cond));
        }

        let then_val = self.match_assignment()?
            .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
        self.expect1(token![else])?;
        let else_val = self.match_assignment()?
            .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;

        let span = cond.range() + else_val.range();
        Ok(Some(Located(
            ast::Expr::Conditional {
                cond: Box::new(cond),
                then_val: Box::new(then_val),
                else_val: Box::new(else_val),
            },
            span,
        )))
    }

    fn match_or(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(mut e) = self.match_and()? else { return Ok(None) };

        while self.match1(token![or]) {
            let right = self.match_and()?
                .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
            let span = e.range() + right.range();
            e = Located(
                ast::Expr::LogOr { left: Box::new(e), right: Box::new(right) },
                span,
            );
        }

        Ok(Some(e))
    }

    fn match_and(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(mut e) = self.match_equality()? else { return Ok(None) };

        while self.match1(token![and]) {
            let right = self.match_equality()?
                .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
            let span = e.range() + right.range();
            e = Located(
                ast::Expr::LogAnd { left: Box::new(e), right: Box::new(right) },
                span,
            );
        }

        Ok(Some(e))
    }

    fn match_equality(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(mut e) = self.match_relational()? else { return Ok(None) };

        while let Some(op_tok) = self.match_n(&[token![==], token![!=]]) {
            let right = self.match_relational()?
                .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
            let span = e.range() + right.range();
            e = Located(
                ast::Expr::Cmp {
                    op: op_tok.kind.try_into().unwrap(),
                    left: Box::new(e),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(Some(e))
    }

    fn match_relational(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(mut e) = self.match_additive()? else { return Ok(None) };

        while let Some(op_tok) = self.match_n(&[token![<], token![<=], token![>], token![>=]]) {
            let right = self.match_additive()?
                .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
            let span = e.range() + right.range();
            e = Located(
                ast::Expr::Cmp {
                    op: op_tok.kind.try_into().unwrap(),
                    left: Box::new(e),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(Some(e))
    }

    fn match_additive(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(mut e) = self.match_multiplicative()? else { return Ok(None) };

        while let Some(op_tok) = self.match_n(&[token![+], token![-]]) {
            let right = self.match_multiplicative()?
                .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
            let span = e.range() + right.range();
            e = Located(
                ast::Expr::BinaryOp {
                    op: op_tok.kind.try_into().unwrap(),
                    left: Box::new(e),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(Some(e))
    }

    fn match_multiplicative(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(mut e) = self.match_exponent()? else { return Ok(None) };

        while let Some(op_tok) = self.match_n(&[token![*], token![/], token![%]]) {
            let right = self.match_exponent()?
                .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
            let span = e.range() + right.range();
            e = Located(
                ast::Expr::BinaryOp {
                    op: op_tok.kind.try_into().unwrap(),
                    left: Box::new(e),
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(Some(e))
    }

    /// `^` is right-associative, so this rule recurses into itself directly
    /// instead of looping: `2 ^ 3 ^ 2` parses as `2 ^ (3 ^ 2)`.
    fn match_exponent(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(base) = self.match_unary()? else { return Ok(None) };

        if !self.match1(token![^]) {
            return Ok(Some(base));
        }

        let exp = self.match_exponent()?
            .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
        let span = base.range() + exp.range();
        Ok(Some(Located(
            ast::Expr::BinaryOp {
                op: op::Binary::Pow,
                left: Box::new(base),
                right: Box::new(exp),
            },
            span,
        )))
    }

    fn match_unary(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(op_tok) = self.match_n(&[token![+], token![-], token![!]]) else {
            return self.match_update();
        };

        let operand = self.match_unary()?
            .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;
        let span = op_tok.span + operand.range();
        Ok(Some(Located(
            ast::Expr::UnaryOp {
                op: op_tok.kind.try_into().unwrap(),
                expr: Box::new(operand),
            },
            span,
        )))
    }

    fn match_update(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        // prefix form
        if let Some(op_tok) = self.match_n(&[token![++], token![--]]) {
            let target = self.match_update()?
                .ok_or_else(|| ParseErr::ExpectedExpr.at_range(self.peek_loc()))?;

            if !is_assign_target(&target) {
                return Err(ParseErr::InvalidUpdateTarget.at_range(target.range().cursor_range()));
            }

            let span = op_tok.span + target.range();
            return Ok(Some(Located(
                ast::Expr::Update {
                    op: op_tok.kind.try_into().unwrap(),
                    prefix: true,
                    target: Box::new(target),
                },
                span,
            )));
        }

        let Some(e) = self.match_member_call()? else { return Ok(None) };

        // postfix form
        if let Some(op_tok) = self.match_n(&[token![++], token![--]]) {
            if !is_assign_target(&e) {
                return Err(ParseErr::InvalidUpdateTarget.at_range(e.range().cursor_range()));
            }

            let span = e.range() + op_tok.span;
            return Ok(Some(Located(
                ast::Expr::Update {
                    op: op_tok.kind.try_into().unwrap(),
                    prefix: false,
                    target: Box::new(e),
                },
                span,
            )));
        }

        Ok(Some(e))
    }

    /// Match member accesses, index accesses, and calls, which chain freely:
    /// `a.b[0](x).c`.
    fn match_member_call(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(mut e) = self.match_primary()? else { return Ok(None) };

        loop {
            match self.peek_token() {
                Some(token![.]) => {
                    self.next_token();
                    let prop = self.expect_ident()?;
                    let span = e.range() + prop.range();
                    e = Located(
                        ast::Expr::Member { obj: Box::new(e), prop },
                        span,
                    );
                }
                Some(t) if t == &token!["["] => {
                    self.next_token();
                    let index = self.expect_expr()?;
                    let close = self.expect1(token!["]"])?;
                    let span = e.range() + close.span;
                    e = Located(
                        ast::Expr::Index { obj: Box::new(e), index: Box::new(index) },
                        span,
                    );
                }
                Some(t) if t == &token!["("] => {
                    self.next_token();
                    let mut args = vec![];
                    if !matches!(self.peek_token(), Some(t) if t == &token![")"]) {
                        args.push(self.expect_expr()?);
                        while self.match1(token![,]) {
                            args.push(self.expect_expr()?);
                        }
                    }
                    let close = self.expect1(token![")"])?;
                    let span = e.range() + close.span;
                    e = Located(
                        ast::Expr::Call { func: Box::new(e), args },
                        span,
                    );
                }
                _ => break,
            }
        }

        Ok(Some(e))
    }

    fn match_primary(&mut self) -> ParseResult<Option<Located<ast::Expr>>> {
        let Some(tok) = self.tokens.get(0) else { return Ok(None) };
        let span = tok.span;

        let expr = match &tok.kind {
            Token::Numeric(raw, kind) => {
                let n = parse_numeric(raw, *kind)
                    .ok_or_else(|| ParseErr::CannotParseNumeric.at_range(span.cursor_range()))?;
                self.next_token();
                ast::Expr::Literal(ast::Literal::Number(n))
            }
            Token::Str { raw, .. } => {
                let s = process_escapes(raw)
                    .map_err(|e| e.at_range(span.cursor_range()))?;
                self.next_token();
                ast::Expr::Literal(ast::Literal::Str(s))
            }
            Token::Regex { pattern, flags } => {
                let lit = ast::Literal::Regex {
                    pattern: pattern.clone(),
                    flags: flags.clone(),
                };
                self.next_token();
                ast::Expr::Literal(lit)
            }
            token![true] => {
                self.next_token();
                ast::Expr::Literal(ast::Literal::Bool(true))
            }
            token![false] => {
                self.next_token();
                ast::Expr::Literal(ast::Literal::Bool(false))
            }
            token![null] => {
                self.next_token();
                ast::Expr::Literal(ast::Literal::Null)
            }
            Token::Ident(_) => {
                let Some(FullToken { kind: Token::Ident(s), .. }) = self.next_token() else {
                    unreachable!()
                };
                ast::Expr::Ident(s)
            }
            Token::Keyword(kw) if kw.is_future_reserved() => {
                return Err(ParseErr::ReservedWord(*kw).at_range(span.cursor_range()));
            }
            token![func] => return self.expect_fun_expr().map(Some),
            t if t == &token!["["] => return self.expect_list_literal().map(Some),
            t if t == &token!["{"] => return self.expect_map_literal().map(Some),
            t if t == &token!["("] => {
                self.next_token();
                let e = self.expect_expr()?;
                let close = self.expect1(token![")"])?;
                // keep the parenthesized span so errors point at the whole group
                return Ok(Some(Located(e.0, span + close.span)));
            }
            _ => return Ok(None),
        };

        Ok(Some(Located(expr, span)))
    }

    fn expect_fun_expr(&mut self) -> ParseResult<Located<ast::Expr>> {
        let start = self.expect1(token![func])?.span;

        let name = match self.peek_token() {
            Some(Token::Ident(_)) => Some(self.expect_ident()?.0),
            _ => None,
        };
        let params = self.expect_params()?;
        let body = Rc::new(self.expect_block()?);

        let span = params.last().map_or(start, |p| start + p.range());
        Ok(Located(ast::Expr::FunExpr { name, params, body }, span))
    }

    fn expect_list_literal(&mut self) -> ParseResult<Located<ast::Expr>> {
        let start = self.expect1(token!["["])?.span;

        let mut items = vec![];
        loop {
            if matches!(self.peek_token(), Some(t) if t == &token!["]"]) {
                break;
            }
            items.push(self.expect_expr()?);
            if !self.match1(token![,]) {
                break;
            }
        }

        let close = self.expect1(token!["]"])?;
        Ok(Located(ast::Expr::ListLiteral(items), start + close.span))
    }

    fn expect_map_literal(&mut self) -> ParseResult<Located<ast::Expr>> {
        let start = self.expect1(token!["{"])?.span;

        let mut entries = vec![];
        loop {
            if matches!(self.peek_token(), Some(t) if t == &token!["}"]) {
                break;
            }

            let key = self.expect_property_key()?;
            self.expect1(token![:])?;
            let value = self.expect_expr()?;
            entries.push((key, value));

            if !self.match1(token![,]) {
                break;
            }
        }

        let close = self.expect1(token!["}"])?;
        Ok(Located(ast::Expr::MapLiteral(entries), start + close.span))
    }

    /// Object keys can be written as identifiers, strings, or numbers;
    /// all of them are kept in their textual form.
    fn expect_property_key(&mut self) -> ParseResult<Located<String>> {
        match self.tokens.get(0) {
            Some(FullToken { kind: Token::Ident(_), .. }) => self.expect_ident(),
            Some(FullToken { kind: Token::Str { raw, .. }, span, .. }) => {
                let span = *span;
                let raw = raw.clone();
                let s = process_escapes(&raw)
                    .map_err(|e| e.at_range(span.cursor_range()))?;
                self.next_token();
                Ok(Located(s, span))
            }
            Some(FullToken { kind: Token::Numeric(raw, kind), span, .. }) => {
                let span = *span;
                let n = parse_numeric(raw, *kind)
                    .ok_or_else(|| ParseErr::CannotParseNumeric.at_range(span.cursor_range()))?;
                self.next_token();
                Ok(Located(fmt_f64_key(n), span))
            }
            Some(ft) => Err(ParseErr::ExpectedPropertyKey.at_range(ft.span.cursor_range())),
            None => Err(ParseErr::ExpectedPropertyKey.at(self.eof.0)),
        }
    }
}

/// Whether an expression can stand on the left of `=` (or under `++`/`--`).
fn is_assign_target(e: &ast::Expr) -> bool {
    matches!(e,
        | ast::Expr::Ident(_)
        | ast::Expr::Member { .. }
        | ast::Expr::Index { .. }
    )
}

/// Convert a raw numeric image into a number, dispatching on the base tag
/// the lexer attached.
fn parse_numeric(raw: &str, kind: NumericKind) -> Option<f64> {
    match kind {
        NumericKind::Dec => raw.parse::<f64>().ok(),
        NumericKind::Hex => u64::from_str_radix(raw.get(2..)?, 16).ok().map(|v| v as f64),
        NumericKind::Oct => u64::from_str_radix(raw.get(2..)?, 8).ok().map(|v| v as f64),
        NumericKind::Bin => u64::from_str_radix(raw.get(2..)?, 2).ok().map(|v| v as f64),
    }
}

/// Render a numeric object key the way the runtime renders numbers,
/// so `{1: "a"}` and `obj[1]` agree on the key text.
fn fmt_f64_key(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Resolve the escape sequences of a raw string-literal body.
///
/// This runs at literal-construction time, not in the lexer, so malformed
/// escapes are syntax errors pointing at the literal. Octal escapes above
/// `\377` and unicode escapes that resolve to no code point are rejected
/// explicitly.
fn process_escapes(raw: &str) -> Result<String, ParseErr> {
    let mut out = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        // the lexer guarantees a character follows every backslash
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };

        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{0008}'),
            'f' => out.push('\u{000C}'),
            'v' => out.push('\u{000B}'),
            '0'..='7' => {
                let mut value = esc.to_digit(8).unwrap();
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            chars.next();
                            value = value * 8 + d;
                        }
                        None => break,
                    }
                }

                if value > 255 {
                    return Err(ParseErr::OctalEscapeOutOfBounds(value));
                }
                out.push(char::from_u32(value).unwrap());
            }
            'x' => {
                let mut value = 0;
                for _ in 0..2 {
                    let d = chars.next()
                        .and_then(|c| c.to_digit(16))
                        .ok_or(ParseErr::MalformedEscape('x'))?;
                    value = value * 16 + d;
                }
                out.push(char::from_u32(value).unwrap());
            }
            'u' => {
                let mut value = 0;
                for _ in 0..4 {
                    let d = chars.next()
                        .and_then(|c| c.to_digit(16))
                        .ok_or(ParseErr::MalformedEscape('u'))?;
                    value = value * 16 + d;
                }
                let c = char::from_u32(value)
                    .ok_or(ParseErr::UnicodeEscapeOutOfBounds(value))?;
                out.push(c);
            }
            '\n' => {} // line continuation
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::ast::{self, Literal, Stmt};
    use crate::lexer::tokenize;

    use super::parse;

    fn parse_ok(src: &str) -> ast::Program {
        let lexed = tokenize(src);
        assert!(lexed.errors.is_empty(), "lex errors: {:?}", lexed.errors);
        let out = parse(lexed.tokens);
        assert!(out.errors.is_empty(), "parse errors: {:?}", out.errors);
        out.program.unwrap()
    }

    fn parse_errs(src: &str) -> Vec<super::FullParseErr> {
        let lexed = tokenize(src);
        parse(lexed.tokens).errors
    }

    #[test]
    fn terminator_insertion_at_newline_and_eof() {
        let prog = parse_ok("a = 1\nb = 2");
        assert_eq!(prog.0.len(), 2);
    }

    #[test]
    fn terminator_not_inserted_mid_line() {
        let errs = parse_errs("a = 1 b = 2");
        assert!(!errs.is_empty());
    }

    #[test]
    fn ternary_uses_then_else() {
        let prog = parse_ok("x = 1 < 2 then 'a' else 'b';");
        let Stmt::Expr(e) = &prog.0[0] else { panic!("expected expr") };
        let ast::Expr::Assign { value, .. } = &e.0 else { panic!("expected assign") };
        assert!(matches!(&value.0, ast::Expr::Conditional { .. }));
    }

    #[test]
    fn exponent_is_right_associative() {
        let prog = parse_ok("y = 2 ^ 3 ^ 2;");
        let Stmt::Expr(e) = &prog.0[0] else { panic!("expected expr") };
        let ast::Expr::Assign { value, .. } = &e.0 else { panic!("expected assign") };
        let ast::Expr::BinaryOp { right, .. } = &value.0 else { panic!("expected pow") };
        assert!(matches!(&right.0, ast::Expr::BinaryOp { op: ast::op::Binary::Pow, .. }));
    }

    #[test]
    fn two_errors_in_unrelated_statements() {
        let errs = parse_errs("x = ;\ny = 1;\nz = *;");
        assert!(errs.len() >= 2, "expected at least 2 errors, got {errs:?}");
    }

    #[test]
    fn octal_escape_out_of_bounds() {
        let errs = parse_errs(r#"s = "\400";"#);
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0].inner(), super::ParseErr::OctalEscapeOutOfBounds(256)));
    }

    #[test]
    fn string_escapes_resolved() {
        let prog = parse_ok(r#"s = "a\tbA";"#);
        let Stmt::Expr(e) = &prog.0[0] else { panic!("expected expr") };
        let ast::Expr::Assign { value, .. } = &e.0 else { panic!("expected assign") };
        assert_eq!(value.0, ast::Expr::Literal(Literal::Str(String::from("a\tbA"))));
    }

    #[test]
    fn sleep_requires_expression() {
        assert!(!parse_errs("sleep;").is_empty());
    }

    #[test]
    fn dangling_else_binds_to_nearest_if() {
        let prog = parse_ok("if (a) if (b) c = 1\nelse c = 2\n");
        let Stmt::If { else_branch, then_branch, .. } = &prog.0[0] else { panic!("expected if") };
        assert!(else_branch.is_none());
        let Stmt::If { else_branch: inner_else, .. } = &**then_branch else { panic!("expected inner if") };
        assert!(inner_else.is_some());
    }
}
