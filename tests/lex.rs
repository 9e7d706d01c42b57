//! Lexer integration tests, including the re-scan property: re-lexing the
//! concatenation of every token's exact source slice reproduces the same
//! token-kind sequence.

use ccscript::lexer::token::{NumericKind, Token};
use ccscript::lexer::tokenize;
use ccscript::span::Spanned;

fn kinds(src: &str) -> Vec<Token> {
    let out = tokenize(src);
    assert!(out.errors.is_empty(), "lex errors in {src:?}: {:?}", out.errors);
    out.tokens.into_iter().map(|t| (*t).clone()).collect()
}

fn rescan_property(src: &str) {
    let first = tokenize(src);
    assert!(first.errors.is_empty(), "lex errors in {src:?}: {:?}", first.errors);

    let rebuilt = first
        .tokens
        .iter()
        .map(|t| t.span().slice(src))
        .collect::<Vec<_>>()
        .join(" ");

    let second = tokenize(&rebuilt);
    assert!(second.errors.is_empty(), "re-scan errors in {rebuilt:?}: {:?}", second.errors);

    let a: Vec<&Token> = first.tokens.iter().map(|t| &**t).collect();
    let b: Vec<&Token> = second.tokens.iter().map(|t| &**t).collect();
    assert_eq!(a, b, "re-scan of {rebuilt:?} diverged from {src:?}");
}

#[test]
fn rescan_reproduces_token_kinds() {
    rescan_property("x = 1 + 2.5e3; y = 0xFF % 0b101");
    rescan_property("if (a >= 2) { reply 'hi'; } else { sleep 5; }");
    rescan_property("m = msg.content.match(/ab+c/gi)");
    rescan_property("for (i = 0; i < 10; i++) { total += i ^ 2 }");
    rescan_property("obj = {a: 1, \"b c\": [2, 3]}");
}

#[test]
fn comments_and_whitespace_are_skipped() {
    let out = tokenize("a // line comment\n/* block\ncomment */ b");
    assert!(out.errors.is_empty());

    let kinds: Vec<_> = out.tokens.iter().map(|t| (**t).clone()).collect();
    assert_eq!(kinds, vec![
        Token::Ident(String::from("a")),
        Token::Ident(String::from("b")),
    ]);
}

#[test]
fn every_numeric_base_is_tagged() {
    let tags: Vec<_> = kinds("7 0x7 0o7 0b1")
        .into_iter()
        .map(|t| match t {
            Token::Numeric(_, kind) => kind,
            other => panic!("expected a numeric, got {other:?}"),
        })
        .collect();

    assert_eq!(tags, vec![
        NumericKind::Dec,
        NumericKind::Hex,
        NumericKind::Oct,
        NumericKind::Bin,
    ]);
}

#[test]
fn string_bodies_stay_raw() {
    let toks = kinds(r#"s = "a\nb""#);
    // escape processing belongs to literal construction, not the lexer
    assert_eq!(toks[2], Token::Str { raw: String::from(r"a\nb"), quote: '"' });
}

#[test]
fn regex_literal_keeps_pattern_and_flags() {
    let toks = kinds("x = /[a/]+c\\//gim");
    assert_eq!(toks[2], Token::Regex {
        pattern: String::from("[a/]+c\\/"),
        flags: String::from("gim"),
    });
}

#[test]
fn unknown_sequences_are_collected_not_fatal() {
    let out = tokenize("a = § ¶ 3");
    assert_eq!(out.errors.len(), 2);
    // the surrounding tokens still scanned
    assert_eq!(out.tokens.len(), 3);
}

#[test]
fn token_positions_are_exact() {
    let out = tokenize("ab\n  cd");
    let spans: Vec<_> = out.tokens.iter().map(|t| t.span()).collect();

    assert_eq!(spans[0].start, (0, 0));
    assert_eq!(spans[0].end, (0, 1));
    assert_eq!(spans[1].start, (1, 2));
    assert_eq!(spans[1].end, (1, 3));
    assert_eq!(spans[1].start_offset, 5);
    assert_eq!(spans[1].end_offset, 7);
}
