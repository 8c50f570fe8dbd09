//! Turns rule trees into flat tables.
//!
//! Every operator node becomes one table. The operator at the root of a rule produces the rule's
//! own table `Tbl<Rule>`, nested operators are extracted into `Tbl<Rule>_sub<N>` and referenced
//! from their parent's data. Sub-tables are numbered in pre-order and emitted in post-order so a
//! table only ever refers to tables emitted before it.

use std::{collections::HashMap, fmt::Display};

use serde::Serialize;

use crate::{
    ast::{RcString, RuleAction, RuleAttr, RuleElem, RuleOp, TypeId},
    config::Config,
    error::Diagnostics,
    pool::{ElemHandle, RuleElemPool},
    registry::{Registries, RuleRef},
    token_table::{TokenId, TokenTable},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum EntryKind {
    /// A rule whose root is a single leaf.
    Data,
    OneOf,
    ZeroOrMore,
    ZeroOrOne,
    Concatenate,
    Asi,
}

impl From<RuleOp> for EntryKind {
    fn from(op: RuleOp) -> Self {
        match op {
            RuleOp::OneOf => EntryKind::OneOf,
            RuleOp::ZeroOrMore => EntryKind::ZeroOrMore,
            RuleOp::ZeroOrOne => EntryKind::ZeroOrOne,
            RuleOp::Concatenate => EntryKind::Concatenate,
            RuleOp::Asi => EntryKind::Asi,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct TableName {
    pub rule: RcString,
    pub sub: Option<u32>,
}

impl TableName {
    pub fn rule(rule: RcString) -> TableName {
        Self { rule, sub: None }
    }
    pub fn sub(rule: RcString, sub: u32) -> TableName {
        Self {
            rule,
            sub: Some(sub),
        }
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sub {
            Some(n) => write!(f, "Tbl{}_sub{n}", self.rule),
            None => write!(f, "Tbl{}", self.rule),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub enum TableData {
    Char(char),
    String(RcString),
    Type(TypeId),
    Token(TokenId),
    Subtable(TableName),
    /// A reference that stayed unresolved.
    Null,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize)]
pub struct RuleProperties(pub u32);

impl RuleProperties {
    pub const NONE: RuleProperties = RuleProperties(0);
    pub const TOP: RuleProperties = RuleProperties(1 << 0);
    pub const ZOM_FAST: RuleProperties = RuleProperties(1 << 1);
    pub const SECOND_TRY: RuleProperties = RuleProperties(1 << 2);
    pub const SINGLE: RuleProperties = RuleProperties(1 << 3);
    pub const NO_ALT_MERGE: RuleProperties = RuleProperties(1 << 4);

    pub fn from_name(name: &str) -> Option<RuleProperties> {
        let bit = match name {
            "Top" => Self::TOP,
            "ZomFast" => Self::ZOM_FAST,
            "SecondTry" => Self::SECOND_TRY,
            "Single" => Self::SINGLE,
            "NoAltMerge" => Self::NO_ALT_MERGE,
            _ => return None,
        };
        Some(bit)
    }
    pub fn contains(self, other: RuleProperties) -> bool {
        self.0 & other.0 == other.0
    }
    pub fn insert(&mut self, other: RuleProperties) {
        self.0 |= other.0;
    }
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct ActionId(pub u32);

/// Opcodes for action names, in first use order.
#[derive(Default, Debug, Serialize)]
pub struct ActionRegistry {
    names: Vec<RcString>,
    #[serde(skip)]
    ids: HashMap<RcString, ActionId>,
}

impl ActionRegistry {
    pub fn intern(&mut self, name: &RcString) -> ActionId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = ActionId(self.names.len() as u32);
        self.names.push(name.clone());
        self.ids.insert(name.clone(), id);
        id
    }
    pub fn find(&self, name: &str) -> Option<ActionId> {
        self.ids.get(name).copied()
    }
    pub fn name(&self, id: ActionId) -> Option<&str> {
        self.names.get(id.0 as usize).map(|n| &**n)
    }
    pub fn names(&self) -> &[RcString] {
        &self.names
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct LoweredAction {
    pub name: RcString,
    pub opcode: ActionId,
    pub args: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct ActionTable {
    pub name: String,
    pub entries: Vec<LoweredAction>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct LoweredTable {
    pub name: TableName,
    pub seq: u32,
    pub kind: EntryKind,
    pub properties: RuleProperties,
    /// Every property tag as written, including the ones without a known bit.
    pub property_names: Vec<RcString>,
    pub data: Vec<TableData>,
    pub action: Option<ActionTable>,
    pub validity: Vec<LoweredAction>,
}

impl LoweredTable {
    pub fn arity(&self) -> usize {
        self.data.len()
    }
}

/// Tables of one rule, sub-tables first and the rule's own table last.
#[derive(Clone, Debug, Serialize)]
pub struct RuleTables {
    pub rule: RcString,
    pub tables: Vec<LoweredTable>,
}

impl RuleTables {
    pub fn root(&self) -> Option<&LoweredTable> {
        self.tables.last()
    }
    pub fn find(&self, name: &TableName) -> Option<&LoweredTable> {
        self.tables.iter().find(|t| t.name == *name)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct DebugEntry {
    pub name: String,
    pub seq: u32,
}

pub struct LowerCx<'a> {
    pub tokens: &'a TokenTable,
    pub config: &'a Config,
    pub diagnostics: &'a Diagnostics,
}

/// Lowering results shared by every rule of a compilation.
#[derive(Default)]
pub struct LowerState {
    pub actions: ActionRegistry,
    pub top_rules: Vec<RcString>,
    pub debug_table: Vec<DebugEntry>,
    pub next_seq: u32,
}

/// Replaces literal leaves found in the token table by their token, returns how many were replaced.
pub fn patch_tokens(handle: ElemHandle, pool: &mut RuleElemPool, tokens: &TokenTable) -> usize {
    let token = match &pool[handle].elem {
        RuleElem::Char(c) => tokens.find_char(*c),
        RuleElem::String(s) => tokens.find_token(s),
        RuleElem::Op(_, children) => {
            let children = children.clone();
            return children
                .into_iter()
                .map(|child| patch_tokens(child, pool, tokens))
                .sum();
        }
        _ => None,
    };

    match token {
        Some(id) => {
            pool[handle].elem = RuleElem::Token(id);
            1
        }
        None => 0,
    }
}

pub fn lower_rule(
    rule: RuleRef,
    pool: &RuleElemPool,
    registries: &Registries,
    cx: &LowerCx,
    state: &mut LowerState,
) -> RuleTables {
    let base = registries.rule(rule);
    let category = &*registries[rule.category].name;
    let Some(root) = base.root else {
        unreachable!("rule {} was registered without a body", base.name)
    };

    let mut rulegen = RuleGen {
        pool,
        registries,
        cx,
        state,
        category,
        rule: base.name.clone(),
        exempt: cx.config.is_exempt(&base.name),
        next_sub: 1,
        tables: Vec::new(),
    };

    let mut attr = base.attr.clone();
    if let Some(root_attr) = &pool[root].attr {
        attr.extend(root_attr);
    }

    let (kind, data) = match &pool[root].elem {
        RuleElem::Op(op, children) => {
            let data = children.iter().map(|&c| rulegen.data_item(c)).collect();
            (EntryKind::from(*op), data)
        }
        _ => (EntryKind::Data, vec![rulegen.leaf(root)]),
    };
    rulegen.emit(TableName::rule(base.name.clone()), kind, data, &attr);

    if base.attr.has_property("Top") {
        rulegen.state.top_rules.push(base.name.clone());
    }

    log::debug!(
        "{}: lowered {} into {} tables",
        category,
        base.name,
        rulegen.tables.len()
    );
    RuleTables {
        rule: base.name.clone(),
        tables: rulegen.tables,
    }
}

struct RuleGen<'a, 'b> {
    pool: &'a RuleElemPool,
    registries: &'a Registries,
    cx: &'a LowerCx<'a>,
    state: &'b mut LowerState,
    category: &'a str,
    rule: RcString,
    exempt: bool,
    next_sub: u32,
    tables: Vec<LoweredTable>,
}

impl RuleGen<'_, '_> {
    fn data_item(&mut self, handle: ElemHandle) -> TableData {
        let pool = self.pool;
        let node = &pool[handle];
        let empty = RuleAttr::default();
        let attr = node.attr.as_deref().unwrap_or(&empty);

        match &node.elem {
            RuleElem::Op(op, children) => {
                let name = self.next_name();
                let data = children.iter().map(|&c| self.data_item(c)).collect();
                self.emit(name.clone(), EntryKind::from(*op), data, attr);
                TableData::Subtable(name)
            }
            // the attribute needs a table of its own
            _ if node.has_attr() => {
                let name = self.next_name();
                let data = vec![self.leaf(handle)];
                self.emit(name.clone(), EntryKind::Data, data, attr);
                TableData::Subtable(name)
            }
            _ => self.leaf(handle),
        }
    }

    fn next_name(&mut self) -> TableName {
        let n = self.next_sub;
        self.next_sub += 1;
        TableName::sub(self.rule.clone(), n)
    }

    fn leaf(&mut self, handle: ElemHandle) -> TableData {
        let pool = self.pool;
        let node = &pool[handle];
        match &node.elem {
            RuleElem::Char(c) => TableData::Char(*c),
            RuleElem::String(s) => TableData::String(s.clone()),
            RuleElem::Type(t) => TableData::Type(*t),
            // shared literals may have been patched through another rule
            RuleElem::Token(id) if self.exempt => match self.cx.tokens.get(*id) {
                Some(entry) => {
                    let mut chars = entry.text.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => TableData::Char(c),
                        _ => TableData::String(entry.text.clone()),
                    }
                }
                None => TableData::Token(*id),
            },
            RuleElem::Token(id) => TableData::Token(*id),
            RuleElem::Rule(r) => {
                TableData::Subtable(TableName::rule(self.registries.rule(*r).name.clone()))
            }
            RuleElem::Pending(name) => {
                self.cx.diagnostics.warning(
                    self.category,
                    Some(node.pos),
                    format_args!("unresolved `{name}` in rule `{}` lowered as null", self.rule),
                );
                TableData::Null
            }
            RuleElem::Op(..) => unreachable!("operators are lowered into sub-tables"),
        }
    }

    fn lower_action(&mut self, action: &RuleAction) -> LoweredAction {
        LoweredAction {
            name: action.name.clone(),
            opcode: self.state.actions.intern(&action.name),
            args: action.args.clone(),
        }
    }

    fn emit(&mut self, name: TableName, kind: EntryKind, data: Vec<TableData>, attr: &RuleAttr) {
        debug_assert!(!data.is_empty());

        let mut properties = RuleProperties::NONE;
        for p in &attr.properties {
            match RuleProperties::from_name(p) {
                Some(bit) => properties.insert(bit),
                None => self.cx.diagnostics.note(
                    self.category,
                    None,
                    format_args!("unknown property `{p}` on {name}"),
                ),
            }
        }

        let action = match attr.action.is_empty() {
            true => None,
            false => Some(ActionTable {
                name: format!("{name}_action"),
                entries: attr.action.iter().map(|a| self.lower_action(a)).collect(),
            }),
        };
        let validity = attr.validity.iter().map(|a| self.lower_action(a)).collect();

        let seq = self.state.next_seq;
        self.state.next_seq += 1;
        self.state.debug_table.push(DebugEntry {
            name: name.to_string(),
            seq,
        });
        log::trace!("{name}: seq {seq} {kind:?} arity {}", data.len());

        self.tables.push(LoweredTable {
            name,
            seq,
            kind,
            properties,
            property_names: attr.properties.clone(),
            data,
            action,
            validity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{ElemNode, RuleBase},
        registry::Registry,
        span::LineCol,
        token_table::TokenTableBuilder,
    };

    #[test]
    fn table_names() {
        assert_eq!(TableName::rule("Expr".into()).to_string(), "TblExpr");
        assert_eq!(TableName::sub("Expr".into(), 3).to_string(), "TblExpr_sub3");
    }

    #[test]
    fn properties() {
        let mut p = RuleProperties::NONE;
        assert!(p.is_empty());
        p.insert(RuleProperties::from_name("Top").unwrap());
        p.insert(RuleProperties::SINGLE);
        assert!(p.contains(RuleProperties::TOP));
        assert!(!p.contains(RuleProperties::ZOM_FAST));
        assert_eq!(RuleProperties::from_name("Bottom"), None);
    }

    #[test]
    fn action_opcodes_are_stable() {
        let mut actions = ActionRegistry::default();
        let a = actions.intern(&"BuildBinary".into());
        let b = actions.intern(&"BuildUnary".into());
        assert_eq!(actions.intern(&"BuildBinary".into()), a);
        assert_eq!((a, b), (ActionId(0), ActionId(1)));
        assert_eq!(actions.name(b), Some("BuildUnary"));
        assert_eq!(actions.find("Nope"), None);
    }

    #[test]
    fn patching_is_idempotent() {
        let mut pool = RuleElemPool::new();
        let plus = pool.alloc(ElemNode::new(RuleElem::Char('+')));
        let x = pool.alloc(ElemNode::new(RuleElem::Char('x')));
        let kw = pool.alloc(ElemNode::new(RuleElem::String("while".into())));
        let inner = pool.alloc(ElemNode::new(RuleElem::Op(RuleOp::ZeroOrOne, vec![kw])));
        let root = pool.alloc(ElemNode::new(RuleElem::Op(
            RuleOp::Concatenate,
            vec![plus, x, inner],
        )));

        let mut builder = TokenTableBuilder::new();
        builder.add("+", None, &"Operator".into());
        builder.add("while", None, &"Keyword".into());
        let tokens = builder.build();

        assert_eq!(patch_tokens(root, &mut pool, &tokens), 2);
        let snapshot: Vec<_> = [plus, x, kw].map(|h| pool[h].elem.clone()).to_vec();
        assert_eq!(patch_tokens(root, &mut pool, &tokens), 0);
        assert_eq!(
            snapshot,
            [
                RuleElem::Token(TokenId(0)),
                RuleElem::Char('x'),
                RuleElem::Token(TokenId(1))
            ]
        );
        assert_eq!(snapshot, [plus, x, kw].map(|h| pool[h].elem.clone()));
    }

    #[test]
    fn exempt_rules_keep_literals() {
        let mut pool = RuleElemPool::new();
        let mut registries = Registries::new();
        let mut reg = Registry::new("reserved");

        let zero = pool.alloc(ElemNode::new(RuleElem::Char('0')));
        let one = pool.alloc(ElemNode::new(RuleElem::Char('1')));
        let root = pool.alloc(ElemNode::new(RuleElem::Op(RuleOp::OneOf, vec![zero, one])));
        let mut base = RuleBase::new("DIGIT".into(), LineCol::default());
        base.root = Some(root);
        let digit = reg.new_rule(base).unwrap();
        let cat = registries.push(reg);

        let mut builder = TokenTableBuilder::new();
        builder.add("0", None, &"Operator".into());
        let tokens = builder.build();

        // another rule sharing the literal got patched first
        patch_tokens(zero, &mut pool, &tokens);

        let config = Config::default();
        let diagnostics = Diagnostics::new();
        let cx = LowerCx {
            tokens: &tokens,
            config: &config,
            diagnostics: &diagnostics,
        };
        let mut state = LowerState::default();
        let tables = lower_rule(RuleRef::new(cat, digit), &pool, &registries, &cx, &mut state);

        let table = tables.root().unwrap();
        assert_eq!(table.data, [TableData::Char('0'), TableData::Char('1')]);
    }
}
