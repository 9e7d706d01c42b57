//! Parser integration tests: terminator insertion, grammar shape, and
//! multi-error recovery.

use ccscript::ast::{op, Expr, Stmt};
use ccscript::interpreter::lint;
use ccscript::lexer::tokenize;
use ccscript::parser::parse;

fn parse_ok(src: &str) -> ccscript::ast::Program {
    let lexed = tokenize(src);
    assert!(lexed.errors.is_empty(), "lex errors: {:?}", lexed.errors);
    let out = parse(lexed.tokens);
    assert!(out.errors.is_empty(), "parse errors: {:?}", out.errors);
    out.program.unwrap()
}

#[test]
fn statements_without_semicolons_parse_across_lines() {
    let prog = parse_ok(
        "count = 0\n\
         count = count + 1\n\
         reply count",
    );
    assert_eq!(prog.0.len(), 3);
}

#[test]
fn terminator_inserted_before_closing_brace() {
    parse_ok("func f() { return 1 }");
}

#[test]
fn terminator_inserted_at_end_of_input() {
    parse_ok("reply 1 + 2");
}

#[test]
fn no_insertion_in_for_header() {
    // the clause separators of a for header must be written
    assert!(!lint("for (i = 0\ni < 3\ni++) { }").is_empty());
    assert!(lint("for (i = 0; i < 3; i++) { }").is_empty());
}

#[test]
fn return_value_ends_at_a_line_break() {
    let prog = parse_ok("func f() {\nreturn\n1\n}");
    let Stmt::FunDecl(decl) = &prog.0[0] else { panic!("expected func") };

    // `return \n 1` is a bare return followed by an expression statement
    assert!(matches!(decl.body.0[0], Stmt::Return(_, None)));
    assert_eq!(decl.body.0.len(), 2);
}

#[test]
fn both_for_forms_parse() {
    let prog = parse_ok(
        "for (i = 0; i < 3; i = i + 1) { }\n\
         for (x of [1, 2]) { }",
    );
    assert!(matches!(prog.0[0], Stmt::For { .. }));
    assert!(matches!(prog.0[1], Stmt::ForOf { .. }));
}

#[test]
fn update_operators_parse_prefix_and_postfix() {
    let prog = parse_ok("a = 0; ++a; a--;");

    let Stmt::Expr(e) = &prog.0[1] else { panic!() };
    assert!(matches!(&e.0, Expr::Update { prefix: true, op: op::Update::Inc, .. }));

    let Stmt::Expr(e) = &prog.0[2] else { panic!() };
    assert!(matches!(&e.0, Expr::Update { prefix: false, op: op::Update::Dec, .. }));
}

#[test]
fn member_call_chains() {
    let prog = parse_ok("x = a.b[0](1, 2).c;");
    let Stmt::Expr(e) = &prog.0[0] else { panic!() };
    let Expr::Assign { value, .. } = &e.0 else { panic!() };
    let Expr::Member { obj, prop } = &value.0 else { panic!("expected member") };
    assert_eq!(prop.0, "c");
    assert!(matches!(&obj.0, Expr::Call { .. }));
}

#[test]
fn assignment_to_a_call_is_rejected() {
    let errors = lint("f() = 3;");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("cannot assign"));
}

#[test]
fn reserved_words_cannot_be_identifiers() {
    let errors = lint("let = 3;");
    assert!(!errors.is_empty());
    assert!(errors[0].message.contains("reserved word"));
}

#[test]
fn multiple_errors_in_one_pass() {
    // two unrelated statements, each with its own mistake
    let errors = lint("a = ;\nb = 1;\nc = = 2;");
    assert!(errors.len() >= 2, "expected two independent errors: {errors:?}");
}

#[test]
fn error_positions_are_one_based() {
    let errors = lint("a = ;");
    assert_eq!(errors[0].start_line_number, 1);
    assert!(errors[0].start_column >= 1);
}

#[test]
fn lexer_and_parser_errors_combine() {
    let errors = lint("a = §;\nb = ;");
    assert!(errors.len() >= 2);
}

#[test]
fn object_literals_in_expression_position() {
    let prog = parse_ok("e = {title: 'hi', fields: [{name: 'a', value: 1}]};");
    let Stmt::Expr(e) = &prog.0[0] else { panic!() };
    let Expr::Assign { value, .. } = &e.0 else { panic!() };
    assert!(matches!(&value.0, Expr::MapLiteral(entries) if entries.len() == 2));
}

#[test]
fn braces_in_statement_position_are_blocks() {
    let prog = parse_ok("{ a = 1; }");
    assert!(matches!(prog.0[0], Stmt::Block(_)));
}
