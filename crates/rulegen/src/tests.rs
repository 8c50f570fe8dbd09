use crate::{
    ast::{RuleElem, RuleOp},
    error::Severity,
    lower::{patch_tokens, EntryKind, RuleProperties, TableData, TableName},
    token_table::TokenId,
    compile, CompilationContext, CompileError, CompileOutput, Config, Phase,
};

fn compile_one(src: &str) -> CompileOutput {
    match compile(Config::default(), None, &[("test", src)]) {
        Ok(output) => output,
        Err(e) => panic!("{e}"),
    }
}

fn sub(rule: &str, n: u32) -> TableData {
    TableData::Subtable(TableName::sub(rule.into(), n))
}

const ARITH: &str = "\
STRUCT Operator : ((\"+\", Add), (\"*\", Mul))
rule Literal : ONEOF(DIGIT, ZEROORMORE(DIGIT))
rule Mul : ONEOF(Literal, Mul + '*' + Literal)
  attr.action.%2 : BuildBinary(%1, %2, %3)
rule Add : ONEOF(Mul, Add + '+' + Mul)
  attr.action.%2 : BuildBinary(%1, %2, %3)
rule Expr : Add
  attr.property : Top
";

const RESERVED: &str = "\
rule DIGIT : ONEOF('0', '1', '2', '3', '4', '5', '6', '7', '8', '9')
rule Underscores : '_' + ZEROORMORE('_')
";

#[test]
fn digit_is_a_single_table() {
    let output = compile(Config::default(), Some(RESERVED), &[]).unwrap();
    let digit = output.find_rule("DIGIT").unwrap();
    assert_eq!(digit.tables.len(), 1);

    let table = digit.root().unwrap();
    assert_eq!(table.name.to_string(), "TblDIGIT");
    assert_eq!(table.kind, EntryKind::OneOf);
    assert_eq!(table.arity(), 10);
    assert_eq!(table.data[0], TableData::Char('0'));
    assert_eq!(table.data[9], TableData::Char('9'));
}

#[test]
fn nested_operator_becomes_sub_table() {
    let output = compile(Config::default(), Some(RESERVED), &[]).unwrap();
    let tables = &output.find_rule("Underscores").unwrap().tables;
    assert_eq!(tables.len(), 2);

    assert_eq!(tables[0].name.to_string(), "TblUnderscores_sub1");
    assert_eq!(tables[0].kind, EntryKind::ZeroOrMore);
    assert_eq!(tables[0].data, [TableData::Char('_')]);

    assert_eq!(tables[1].name.to_string(), "TblUnderscores");
    assert_eq!(tables[1].kind, EntryKind::Concatenate);
    assert_eq!(tables[1].data, [TableData::Char('_'), sub("Underscores", 1)]);
    assert!(tables[0].seq < tables[1].seq);
}

#[test]
fn actions_land_on_the_alternative() {
    let output = compile(Config::default(), Some(RESERVED), &[("arith", ARITH)]).unwrap();

    let add = output.find_table("TblAdd").unwrap();
    assert_eq!(add.kind, EntryKind::OneOf);
    assert!(add.action.is_none());
    assert_eq!(add.data[1], sub("Add", 1));

    let alt = output.find_table("TblAdd_sub1").unwrap();
    assert_eq!(alt.kind, EntryKind::Concatenate);
    let action = alt.action.as_ref().unwrap();
    assert_eq!(action.name, "TblAdd_sub1_action");
    assert_eq!(&*action.entries[0].name, "BuildBinary");
    assert_eq!(action.entries[0].args, [1, 2, 3]);

    // both rules share one opcode
    let mul = output.find_table("TblMul_sub1").unwrap();
    assert_eq!(
        mul.action.as_ref().unwrap().entries[0].opcode,
        action.entries[0].opcode
    );
    assert_eq!(output.actions.len(), 1);
}

#[test]
fn literals_become_tokens() {
    let output = compile(Config::default(), Some(RESERVED), &[("arith", ARITH)]).unwrap();
    assert_eq!(output.tokens.len(), 2);
    let plus = output.tokens.find_char('+').unwrap();
    assert_eq!(plus, TokenId(0));

    let alt = output.find_table("TblAdd_sub1").unwrap();
    assert_eq!(
        alt.data,
        [
            TableData::Subtable(TableName::rule("Add".into())),
            TableData::Token(plus),
            TableData::Subtable(TableName::rule("Mul".into())),
        ]
    );

    // exempt character classes keep their literals
    let digit = output.find_table("TblDIGIT").unwrap();
    assert_eq!(digit.data[0], TableData::Char('0'));
}

#[test]
fn top_rules() {
    let output = compile(Config::default(), Some(RESERVED), &[("arith", ARITH)]).unwrap();
    assert_eq!(output.top_rules.len(), 1);
    assert_eq!(&*output.top_rules[0], "Expr");

    let expr = output.find_table("TblExpr").unwrap();
    assert_eq!(expr.kind, EntryKind::Data);
    assert!(expr.properties.contains(RuleProperties::TOP));
}

#[test]
fn lowering_is_deterministic() {
    let a = compile(Config::default(), Some(RESERVED), &[("arith", ARITH)]).unwrap();
    let b = compile(Config::default(), Some(RESERVED), &[("arith", ARITH)]).unwrap();
    assert_eq!(a.debug_table, b.debug_table);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );

    // seq numbers are dense and follow emission order
    for (i, entry) in a.debug_table.iter().enumerate() {
        assert_eq!(entry.seq, i as u32);
    }
    assert_eq!(a.table_count(), a.debug_table.len());
}

#[test]
fn concatenation_and_interning() {
    let mut cx = CompilationContext::new(Config::default());
    let id = cx
        .parse_category("test", "rule A : 'a'\nrule B : 'a' + 'b' + 'c'\nrule C : ONEOF('a', \"bb\", \"bb\")")
        .unwrap();

    let registry = &cx.registries[id];
    let root = |name: &str| {
        let rule = registry.find_local(name).unwrap();
        &cx.pool[registry.rules[rule].root.unwrap()].elem
    };

    let RuleElem::Op(RuleOp::Concatenate, b) = root("B") else {
        panic!("{:?}", root("B"))
    };
    assert_eq!(b.len(), 3);

    let RuleElem::Op(RuleOp::OneOf, c) = root("C") else {
        panic!("{:?}", root("C"))
    };
    assert_eq!(c[1], c[2]);
    assert_eq!(b[0], c[0]);
    assert_eq!(registry.rules[registry.find_local("A").unwrap()].root, Some(b[0]));
}

#[test]
fn forward_references_are_backpatched() {
    let mut cx = CompilationContext::new(Config::default());
    let id = cx
        .parse_category("test", "rule A : B + 'x'\nrule B : 'b'")
        .unwrap();
    let registry = &cx.registries[id];
    let pending = registry.pending[0];
    assert_eq!(cx.pool[pending].elem, RuleElem::Pending("B".into()));

    assert!(cx.backpatch().unwrap().is_empty());
    let RuleElem::Rule(r) = &cx.pool[pending].elem else {
        panic!("{:?}", cx.pool[pending].elem)
    };
    assert_eq!(cx.registries.rule_name(*r), "B");
}

#[test]
fn references_across_categories() {
    let output = compile(
        Config::default(),
        None,
        &[("stmt", "rule Stmt : Expr + ';'"), ("expr", "rule Expr : 'e'")],
    )
    .unwrap();
    let stmt = output.find_table("TblStmt").unwrap();
    assert_eq!(stmt.data[0], TableData::Subtable(TableName::rule("Expr".into())));
}

#[test]
fn unresolved_references() {
    let src = "rule A : Missing + 'a'";
    let result = compile(Config::default(), None, &[("test", src)]);
    let Err(CompileError::Unresolved { names }) = result else {
        panic!("{result:?}")
    };
    assert_eq!(names[0].name, "Missing");

    let config = Config {
        strict_references: false,
        ..Config::default()
    };
    let output = compile(config, None, &[("test", src)]).unwrap();
    let table = output.find_table("TblA").unwrap();
    assert_eq!(table.data[0], TableData::Null);
    let warnings = output
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .count();
    assert_eq!(warnings, 2);
}

#[test]
fn patching_twice_changes_nothing() {
    let mut cx = CompilationContext::new(Config::default());
    let id = cx
        .parse_category(
            "test",
            "STRUCT Keyword : ((\"while\", While))\nrule Loop : \"while\" + 'x'",
        )
        .unwrap();
    cx.backpatch().unwrap();
    cx.build_token_table().unwrap();

    let registry = &cx.registries[id];
    let root = registry.rules[registry.find_local("Loop").unwrap()].root.unwrap();
    let tokens = cx.tokens().clone();
    assert_eq!(patch_tokens(root, &mut cx.pool, &tokens), 1);
    assert_eq!(patch_tokens(root, &mut cx.pool, &tokens), 0);
    assert_eq!(cx.pool[cx.pool[root].elem.children()[0]].elem, RuleElem::Token(TokenId(0)));
}

#[test]
fn phases_run_in_order() {
    let mut cx = CompilationContext::new(Config::default());
    cx.parse_category("test", "rule A : 'a'").unwrap();
    assert!(matches!(
        cx.lower(),
        Err(CompileError::PhaseOrder {
            expected: Phase::TokensBuilt,
            found: Phase::Parsing,
            ..
        })
    ));
    assert!(cx.relations().is_err());

    cx.backpatch().unwrap();
    assert!(matches!(
        cx.parse_category("late", "rule B : 'b'"),
        Err(CompileError::PhaseOrder { .. })
    ));
    cx.build_token_table().unwrap();
    cx.lower().unwrap();
    assert_eq!(cx.phase(), Phase::Lowered);
    assert!(cx.backpatch().is_err());
}

#[test]
fn category_errors() {
    let result = compile(Config::default(), None, &[("a", "rule A : 'a'"), ("a", "rule B : 'b'")]);
    assert!(matches!(result, Err(CompileError::DuplicateCategory(name)) if name == "a"));

    let mut cx = CompilationContext::new(Config::default());
    cx.parse_category("a", "rule A : 'a'").unwrap();
    assert!(matches!(
        cx.parse_reserved("reserved", RESERVED),
        Err(CompileError::ReservedTooLate(_))
    ));

    let config = Config {
        category_order: vec!["nope".to_owned()],
        ..Config::default()
    };
    let result = compile(config, None, &[("a", "rule A : 'a'")]);
    assert!(matches!(result, Err(CompileError::UnknownCategory(name)) if name == "nope"));
}

#[test]
fn category_order() {
    let config = Config {
        category_order: vec!["second".to_owned()],
        ..Config::default()
    };
    let output = compile(
        config,
        Some(RESERVED),
        &[("first", "rule A : 'a'"), ("second", "rule B : 'b'")],
    )
    .unwrap();
    let names: Vec<&str> = output.categories.iter().map(|c| &*c.name).collect();
    assert_eq!(names, ["reserved", "second", "first"]);
}

#[test]
fn relations() {
    let mut cx = CompilationContext::new(Config::default());
    cx.parse_reserved("reserved", RESERVED).unwrap();
    let arith = cx.parse_category("arith", ARITH).unwrap();
    cx.backpatch().unwrap();

    let find = |name: &str| cx.registries.find_rule(arith, name).unwrap();
    let relations = cx.relations().unwrap();
    let (literal, mul, add, expr) = (find("Literal"), find("Mul"), find("Add"), find("Expr"));
    let digit = find("DIGIT");

    assert!(relations.is_used_by(digit, expr));
    assert!(relations.is_used_by(literal, add));
    assert!(!relations.is_used_by(add, mul));

    assert!(relations.is_a(digit, literal));
    assert!(relations.is_a(literal, add));
    assert!(relations.is_a(mul, expr));
    assert!(!relations.is_a(expr, add));
}

#[test]
fn arena_is_released_after_lowering() {
    let mut cx = CompilationContext::new(Config::default());
    cx.parse_reserved("reserved", RESERVED).unwrap();
    let reserved_len = cx.pool.len();
    let arith = cx.parse_category("arith", ARITH).unwrap();
    assert!(cx.pool.len() > reserved_len);

    cx.backpatch().unwrap();
    cx.build_token_table().unwrap();
    cx.lower().unwrap();

    assert_eq!(cx.pool.len(), reserved_len);
    assert_eq!(cx.pool.reserved_len(), reserved_len);
    assert!(cx.registries[arith].released);
    assert!(!cx.registries[cx.reserved().unwrap()].released);
}

#[test]
fn token_rules() {
    let config = Config {
        token_rules: true,
        ..Config::default()
    };
    let mut cx = CompilationContext::new(config);
    cx.parse_category("arith", ARITH).unwrap();
    cx.parse_category("digits", "rule DIGIT : ONEOF('0', '1')").unwrap();
    cx.backpatch().unwrap();
    cx.build_token_table().unwrap();

    let tokens = cx.registries.by_name("tokens").unwrap();
    let add = cx.registries.find_rule(tokens, "TK_Add").unwrap();
    let arith = cx.registries.by_name("arith").unwrap();
    let add_rule = cx.registries.find_rule(arith, "Add").unwrap();
    assert!(cx.relations().unwrap().is_used_by(add, add_rule));

    let output = cx.lower().unwrap();
    assert_eq!(output.categories.last().map(|c| &*c.name), Some("tokens"));
    let table = output.find_table("TblTK_Mul").unwrap();
    assert_eq!(table.kind, EntryKind::Data);
    assert_eq!(table.data, [TableData::Token(TokenId(1))]);
}

#[test]
fn missing_literals_are_noted() {
    let output = compile_one("STRUCT Operator : ((\"+\", Add))\nrule A : '+' + '-'");
    let notes: Vec<&str> = output
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Note)
        .map(|d| &*d.message)
        .collect();
    assert_eq!(notes, ["literal \"-\" is not in the token table"]);
}

#[test]
fn unterminated_string_is_a_syntax_error() {
    let result = compile(Config::default(), None, &[("test", "rule A : \"abc\nrule B : 'b'")]);
    let Err(CompileError::Syntax { category, error }) = result else {
        panic!("{result:?}")
    };
    assert_eq!(category, "test");
    assert_eq!((error.line(), error.column()), (1, 10));
}

const NESTED: &str = "\
rule B : 'b'
rule R : ONEOF('a' + ASI(ZEROORMORE('x')), B, 'c')
  attr.action.%2 : BuildB(%1)
  attr.property.%3 : ZomFast, Weird
  attr.validity : Check(%1)
";

#[test]
fn nested_sub_tables_are_numbered_in_pre_order() {
    let output = compile_one(NESTED);
    let tables = &output.find_rule("R").unwrap().tables;
    let names: Vec<String> = tables.iter().map(|t| t.name.to_string()).collect();
    assert_eq!(
        names,
        ["TblR_sub3", "TblR_sub2", "TblR_sub1", "TblR_sub4", "TblR_sub5", "TblR"]
    );

    let concat = output.find_table("TblR_sub1").unwrap();
    assert_eq!(concat.kind, EntryKind::Concatenate);
    assert_eq!(concat.data, [TableData::Char('a'), sub("R", 2)]);

    let asi = output.find_table("TblR_sub2").unwrap();
    assert_eq!(asi.kind, EntryKind::Asi);
    assert_eq!(asi.data, [sub("R", 3)]);

    let zom = output.find_table("TblR_sub3").unwrap();
    assert_eq!(zom.kind, EntryKind::ZeroOrMore);
    assert_eq!(zom.data, [TableData::Char('x')]);

    let root = output.find_table("TblR").unwrap();
    assert_eq!(root.kind, EntryKind::OneOf);
    assert_eq!(root.data, [sub("R", 1), sub("R", 4), sub("R", 5)]);
}

#[test]
fn attributed_leaves_get_their_own_table() {
    let output = compile_one(NESTED);

    let rule_ref = output.find_table("TblR_sub4").unwrap();
    assert_eq!(rule_ref.kind, EntryKind::Data);
    assert_eq!(rule_ref.data, [TableData::Subtable(TableName::rule("B".into()))]);
    let action = rule_ref.action.as_ref().unwrap();
    assert_eq!(&*action.entries[0].name, "BuildB");

    let literal = output.find_table("TblR_sub5").unwrap();
    assert_eq!(literal.kind, EntryKind::Data);
    assert_eq!(literal.data, [TableData::Char('c')]);
    assert!(literal.action.is_none());
    assert_eq!(literal.properties, RuleProperties::ZOM_FAST);
    assert_eq!(literal.property_names.len(), 2);

    // the action stays on the reference, rule B itself has none
    assert!(output.find_table("TblB").unwrap().action.is_none());
}

#[test]
fn validity_and_unknown_properties() {
    let output = compile_one(NESTED);

    let root = output.find_table("TblR").unwrap();
    assert!(root.action.is_none());
    assert_eq!(root.validity.len(), 1);
    assert_eq!(&*root.validity[0].name, "Check");
    assert_eq!(root.validity[0].args, [1]);
    assert!(output.find_table("TblR_sub1").unwrap().validity.is_empty());

    let notes: Vec<&str> = output
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Note && d.message.contains("Weird"))
        .map(|d| &*d.message)
        .collect();
    assert_eq!(notes, ["unknown property `Weird` on TblR_sub5"]);
}
