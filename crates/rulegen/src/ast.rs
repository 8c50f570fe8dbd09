use std::{fmt::Write, rc::Rc};

use serde::Serialize;

use crate::{
    lexer::TokenKind,
    pool::{ElemHandle, RuleElemPool},
    registry::{Registries, RuleRef},
    span::LineCol,
    token_table::TokenId,
};

pub type RcString = Rc<str>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum RuleOp {
    OneOf,
    ZeroOrMore,
    ZeroOrOne,
    Concatenate,
    Asi,
}

impl RuleOp {
    pub fn keyword(self) -> &'static str {
        match self {
            RuleOp::OneOf => "ONEOF",
            RuleOp::ZeroOrMore => "ZEROORMORE",
            RuleOp::ZeroOrOne => "ZEROORONE",
            RuleOp::Concatenate => "+",
            RuleOp::Asi => "ASI",
        }
    }
    /// Operators written as `KEYWORD(E)` take exactly one operand.
    pub fn is_unary(self) -> bool {
        matches!(self, RuleOp::ZeroOrMore | RuleOp::ZeroOrOne | RuleOp::Asi)
    }
}

/// Type keywords recognized in any spec without a rule declaring them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[rustfmt::skip]
pub enum TypeId {
    Boolean, Byte, Short, Int, Long, Char, Float, Double, Void, Null,
    Object, String, Class, Interface, Array, Function, Undefined, Any,
}

impl TypeId {
    const ALL: [(&'static str, TypeId); 18] = [
        ("Boolean", TypeId::Boolean),
        ("Byte", TypeId::Byte),
        ("Short", TypeId::Short),
        ("Int", TypeId::Int),
        ("Long", TypeId::Long),
        ("Char", TypeId::Char),
        ("Float", TypeId::Float),
        ("Double", TypeId::Double),
        ("Void", TypeId::Void),
        ("Null", TypeId::Null),
        ("Object", TypeId::Object),
        ("String", TypeId::String),
        ("Class", TypeId::Class),
        ("Interface", TypeId::Interface),
        ("Array", TypeId::Array),
        ("Function", TypeId::Function),
        ("Undefined", TypeId::Undefined),
        ("Any", TypeId::Any),
    ];

    pub fn from_name(name: &str) -> Option<TypeId> {
        Self::ALL
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, id)| id)
    }

    pub fn name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, id)| *id == self)
            .map(|&(n, _)| n)
            .unwrap_or("NA")
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum RuleElem {
    Char(char),
    String(RcString),
    Rule(RuleRef),
    Type(TypeId),
    Token(TokenId),
    Pending(RcString),
    Op(RuleOp, Vec<ElemHandle>),
}

impl RuleElem {
    pub fn is_literal(&self) -> bool {
        matches!(self, RuleElem::Char(_) | RuleElem::String(_))
    }
    pub fn children(&self) -> &[ElemHandle] {
        match self {
            RuleElem::Op(_, children) => children,
            _ => &[],
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct RuleAction {
    pub name: RcString,
    /// Operand positions, `%N` in the source.
    pub args: Vec<u8>,
    #[serde(skip)]
    pub pos: LineCol,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize)]
pub struct RuleAttr {
    pub properties: Vec<RcString>,
    pub validity: Vec<RuleAction>,
    pub action: Vec<RuleAction>,
}

impl RuleAttr {
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.validity.is_empty() && self.action.is_empty()
    }
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| &**p == name)
    }
    pub fn extend(&mut self, other: &RuleAttr) {
        self.properties.extend(other.properties.iter().cloned());
        self.validity.extend(other.validity.iter().cloned());
        self.action.extend(other.action.iter().cloned());
    }
}

/// One arena slot.
#[derive(Clone, Debug)]
pub struct ElemNode {
    pub elem: RuleElem,
    pub attr: Option<Box<RuleAttr>>,
    /// The spec token the element was parsed from, `None` for synthesized elements.
    pub origin: Option<TokenKind>,
    pub pos: LineCol,
}

impl ElemNode {
    pub fn new(elem: RuleElem) -> ElemNode {
        Self {
            elem,
            attr: None,
            origin: None,
            pos: LineCol::default(),
        }
    }
    pub fn parsed(elem: RuleElem, origin: TokenKind, pos: LineCol) -> ElemNode {
        Self {
            elem,
            attr: None,
            origin: Some(origin),
            pos,
        }
    }
    pub fn attr_mut(&mut self) -> &mut RuleAttr {
        self.attr.get_or_insert_with(Default::default)
    }
    pub fn has_attr(&self) -> bool {
        self.attr.as_ref().is_some_and(|a| !a.is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct RuleBase {
    pub name: RcString,
    /// `None` only while the declaration is being parsed.
    pub root: Option<ElemHandle>,
    pub attr: RuleAttr,
    pub pos: LineCol,
}

impl RuleBase {
    pub fn new(name: RcString, pos: LineCol) -> RuleBase {
        Self {
            name,
            root: None,
            attr: RuleAttr::default(),
            pos,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub enum StructData {
    Char(char),
    Int(i64),
    Float(f32),
    Double(f64),
    Name(RcString),
    String(RcString),
}

impl StructData {
    /// Text of a cell that can stand for a literal token.
    pub fn as_text(&self) -> Option<String> {
        match self {
            StructData::Char(c) => Some(c.to_string()),
            StructData::Name(s) | StructData::String(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Serialize)]
pub struct StructElem {
    pub data: Vec<StructData>,
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct StructBase {
    pub name: RcString,
    pub elems: Vec<StructElem>,
}

impl StructBase {
    pub fn new(name: RcString) -> StructBase {
        Self {
            name,
            elems: Vec::new(),
        }
    }
}

/// Writes `handle` back in spec syntax.
pub fn display_elem(
    buf: &mut dyn Write,
    handle: ElemHandle,
    pool: &RuleElemPool,
    registries: &Registries,
) -> std::fmt::Result {
    let node = &pool[handle];
    match &node.elem {
        RuleElem::Char(c) => write!(buf, "'{c}'")?,
        RuleElem::String(s) => write!(buf, "{:?}", &**s)?,
        RuleElem::Rule(r) => buf.write_str(registries.rule_name(*r))?,
        RuleElem::Type(t) => buf.write_str(t.name())?,
        RuleElem::Token(t) => write!(buf, "<token {}>", t.0)?,
        RuleElem::Pending(name) => write!(buf, "{name}?")?,
        RuleElem::Op(RuleOp::Concatenate, children) => {
            for (i, &child) in children.iter().enumerate() {
                if i > 0 {
                    buf.write_str(" + ")?;
                }
                display_elem(buf, child, pool, registries)?;
            }
        }
        RuleElem::Op(op, children) => {
            write!(buf, "{}(", op.keyword())?;
            for (i, &child) in children.iter().enumerate() {
                if i > 0 {
                    buf.write_str(", ")?;
                }
                display_elem(buf, child, pool, registries)?;
            }
            buf.write_str(")")?;
        }
    }
    if let Some(attr) = &node.attr {
        for action in &attr.action {
            write!(buf, " ==> func {}(", action.name)?;
            display_args(buf, &action.args)?;
            buf.write_str(")")?;
        }
    }
    Ok(())
}

pub fn display_args(buf: &mut dyn Write, args: &[u8]) -> std::fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            buf.write_str(", ")?;
        }
        write!(buf, "%{arg}")?;
    }
    Ok(())
}
