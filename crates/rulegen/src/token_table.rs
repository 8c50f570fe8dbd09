use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::{
    ast::{RcString, RuleElem, StructBase, StructData},
    pool::{ElemHandle, RuleElemPool},
    registry::{Registry, RuleId},
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct TokenId(pub u32);

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct TokenEntry {
    pub id: TokenId,
    pub text: RcString,
    /// Symbolic name from the second tuple cell, `Add` for `("+", Add)`.
    pub name: Option<RcString>,
    /// The STRUCT the literal came from.
    pub class: RcString,
}

impl TokenEntry {
    pub fn rule_name(&self) -> String {
        match &self.name {
            Some(name) => format!("TK_{name}"),
            None => format!("TK_{}", self.id.0),
        }
    }
}

/// Unified numbering of operator, separator and keyword literals.
#[derive(Clone, Default, Debug, Serialize)]
pub struct TokenTable {
    entries: Vec<TokenEntry>,
    #[serde(skip)]
    by_text: HashMap<RcString, TokenId>,
}

impl TokenTable {
    pub fn find_token(&self, text: &str) -> Option<TokenId> {
        self.by_text.get(text).copied()
    }

    pub fn find_char(&self, c: char) -> Option<TokenId> {
        let mut buf = [0; 4];
        self.find_token(c.encode_utf8(&mut buf))
    }

    pub fn get(&self, id: TokenId) -> Option<&TokenEntry> {
        self.entries.get(id.0 as usize)
    }

    pub fn entries(&self) -> &[TokenEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct TokenTableBuilder {
    table: TokenTable,
}

impl TokenTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A literal that is already present keeps its first id.
    pub fn add(&mut self, text: &str, name: Option<RcString>, class: &RcString) -> TokenId {
        if let Some(id) = self.table.find_token(text) {
            return id;
        }
        let id = TokenId(self.table.entries.len() as u32);
        let text: RcString = text.into();
        self.table.by_text.insert(text.clone(), id);
        self.table.entries.push(TokenEntry {
            id,
            text,
            name,
            class: class.clone(),
        });
        id
    }

    /// Adds the first cell of every tuple, a second `Name` cell becomes the token's name.
    pub fn add_struct(&mut self, s: &StructBase) -> usize {
        let mut added = 0;
        for elem in &s.elems {
            let Some(text) = elem.data.first().and_then(StructData::as_text) else {
                log::debug!("{}: skipping tuple without a literal {:?}", s.name, elem.data);
                continue;
            };
            let name = match elem.data.get(1) {
                Some(StructData::Name(name)) => Some(name.clone()),
                _ => None,
            };
            let before = self.table.len();
            self.add(&text, name, &s.name);
            added += self.table.len() - before;
        }
        added
    }

    pub fn build(self) -> TokenTable {
        self.table
    }
}

/// Literal values used by the rules of one category.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Literals {
    pub chars: BTreeSet<char>,
    pub strings: BTreeSet<RcString>,
}

impl Literals {
    pub fn iter_text(&self) -> impl Iterator<Item = String> + '_ {
        self.chars
            .iter()
            .map(|c| c.to_string())
            .chain(self.strings.iter().map(|s| s.to_string()))
    }
}

pub fn collect_literals(pool: &RuleElemPool, registry: &Registry) -> Literals {
    fn visit(handle: ElemHandle, pool: &RuleElemPool, out: &mut Literals) {
        match &pool[handle].elem {
            RuleElem::Char(c) => {
                out.chars.insert(*c);
            }
            RuleElem::String(s) => {
                out.strings.insert(s.clone());
            }
            RuleElem::Op(_, children) => {
                for &child in children {
                    visit(child, pool, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Literals::default();
    for (_, rule) in registry.rules.iter() {
        if let Some(root) = rule.root {
            visit(root, pool, &mut out);
        }
    }
    out
}

/// Creates a `TK_<name>` wrapper rule for every token, reusing existing ones.
pub fn install_token_rules(
    table: &TokenTable,
    pool: &mut RuleElemPool,
    registry: &mut Registry,
) -> Vec<RuleId> {
    table
        .entries()
        .iter()
        .map(|entry| {
            let name = entry.rule_name();
            let mut chars = entry.text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => registry.add_char_rule(pool, &name, c),
                _ => registry.add_string_rule(pool, &name, &entry.text),
            }
        })
        .collect()
}
