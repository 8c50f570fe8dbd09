//! Per category rule storage and cross category resolution.

use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    fmt::Write,
};

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::{
    ast::{display_args, display_elem, ElemNode, RcString, RuleBase, RuleElem, StructBase},
    error::UnresolvedRef,
    lexer::TokenKind,
    pool::{ElemHandle, PoolTag, RuleElemPool},
    span::LineCol,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CategoryId(u32);
entity_impl!(CategoryId);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleId(u32);
entity_impl!(RuleId);

/// Identifies a rule across categories.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RuleRef {
    pub category: CategoryId,
    pub rule: RuleId,
}

impl RuleRef {
    pub fn new(category: CategoryId, rule: RuleId) -> RuleRef {
        Self { category, rule }
    }
}

pub struct Registry {
    pub name: RcString,
    pub rules: PrimaryMap<RuleId, RuleBase>,
    pub structs: Vec<StructBase>,
    /// `Pending` elements created while parsing, in creation order.
    pub pending: Vec<ElemHandle>,
    /// Category consulted by [`Registries::find_rule`] after this one.
    pub reserved: Option<CategoryId>,
    pub tag: Option<PoolTag>,
    pub released: bool,
    pub comments: Vec<String>,
    name_to_rule: HashMap<RcString, RuleId>,
    chars: HashMap<char, ElemHandle>,
    strings: HashMap<RcString, ElemHandle>,
    interned: HashSet<ElemHandle>,
}

impl Registry {
    pub fn new(name: impl Into<RcString>) -> Registry {
        Self {
            name: name.into(),
            rules: PrimaryMap::new(),
            structs: Vec::new(),
            pending: Vec::new(),
            reserved: None,
            tag: None,
            released: false,
            comments: Vec::new(),
            name_to_rule: HashMap::new(),
            chars: HashMap::new(),
            strings: HashMap::new(),
            interned: HashSet::new(),
        }
    }

    pub fn find_local(&self, name: &str) -> Option<RuleId> {
        self.name_to_rule.get(name).copied()
    }

    pub fn find_struct(&self, name: &str) -> Option<&StructBase> {
        self.structs.iter().find(|s| &*s.name == name)
    }

    /// Registers a rule, on a name clash the handle of the earlier declaration is returned as the error.
    pub fn new_rule(&mut self, rule: RuleBase) -> Result<RuleId, RuleId> {
        match self.name_to_rule.entry(rule.name.clone()) {
            Entry::Occupied(o) => Err(*o.get()),
            Entry::Vacant(v) => {
                let id = self.rules.push(rule);
                v.insert(id);
                Ok(id)
            }
        }
    }

    pub fn intern_char(&mut self, pool: &mut RuleElemPool, c: char, pos: LineCol) -> ElemHandle {
        if let Some(&handle) = self.chars.get(&c) {
            return handle;
        }
        let handle = pool.alloc(ElemNode::parsed(RuleElem::Char(c), TokenKind::Char, pos));
        log::debug!("{}: interned '{c}'", self.name);
        self.chars.insert(c, handle);
        self.interned.insert(handle);
        handle
    }

    pub fn intern_string(
        &mut self,
        pool: &mut RuleElemPool,
        s: &RcString,
        pos: LineCol,
    ) -> ElemHandle {
        if let Some(&handle) = self.strings.get(s) {
            return handle;
        }
        let handle = pool.alloc(ElemNode::parsed(
            RuleElem::String(s.clone()),
            TokenKind::String,
            pos,
        ));
        log::debug!("{}: interned {s:?}", self.name);
        self.strings.insert(s.clone(), handle);
        self.interned.insert(handle);
        handle
    }

    pub fn is_interned(&self, handle: ElemHandle) -> bool {
        self.interned.contains(&handle)
    }

    /// Keyword style rule, `rule class : "class"`.
    pub fn add_literal_rule(&mut self, pool: &mut RuleElemPool, name: &str) -> RuleId {
        let literal: RcString = name.into();
        self.add_string_rule(pool, name, &literal)
    }

    pub fn add_char_rule(&mut self, pool: &mut RuleElemPool, name: &str, c: char) -> RuleId {
        if let Some(id) = self.find_local(name) {
            return id;
        }
        let root = self.intern_char(pool, c, LineCol::default());
        self.add_wrapper(name, root)
    }

    pub fn add_string_rule(&mut self, pool: &mut RuleElemPool, name: &str, s: &RcString) -> RuleId {
        if let Some(id) = self.find_local(name) {
            return id;
        }
        let root = self.intern_string(pool, s, LineCol::default());
        self.add_wrapper(name, root)
    }

    fn add_wrapper(&mut self, name: &str, root: ElemHandle) -> RuleId {
        let mut rule = RuleBase::new(name.into(), LineCol::default());
        rule.root = Some(root);
        match self.new_rule(rule) {
            Ok(id) | Err(id) => id,
        }
    }

    pub fn register_pending(&mut self, handle: ElemHandle) {
        self.pending.push(handle);
    }

    /// Renders every rule in spec syntax.
    pub fn dump(&self, pool: &RuleElemPool, registries: &Registries) -> String {
        let mut out = String::new();
        _ = self.dump_into(&mut out, pool, registries);
        out
    }

    fn dump_into(
        &self,
        buf: &mut String,
        pool: &RuleElemPool,
        registries: &Registries,
    ) -> std::fmt::Result {
        for (_, rule) in self.rules.iter() {
            write!(buf, "rule {} : ", rule.name)?;
            match rule.root {
                Some(root) => display_elem(buf, root, pool, registries)?,
                None => buf.write_str("<incomplete>")?,
            }
            buf.write_str("\n")?;
            if !rule.attr.properties.is_empty() {
                buf.write_str("  attr.property : ")?;
                for (i, p) in rule.attr.properties.iter().enumerate() {
                    if i > 0 {
                        buf.write_str(", ")?;
                    }
                    buf.write_str(p)?;
                }
                buf.write_str("\n")?;
            }
            for (selector, actions) in [("validity", &rule.attr.validity), ("action", &rule.attr.action)] {
                for action in actions {
                    write!(buf, "  attr.{selector} : {}(", action.name)?;
                    display_args(buf, &action.args)?;
                    buf.write_str(")\n")?;
                }
            }
        }
        for s in &self.structs {
            writeln!(buf, "STRUCT {} : {} entries", s.name, s.elems.len())?;
        }
        Ok(())
    }
}

/// Every category of one compilation, in registration order.
#[derive(Default)]
pub struct Registries {
    pub categories: PrimaryMap<CategoryId, Registry>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, registry: Registry) -> CategoryId {
        self.categories.push(registry)
    }

    pub fn by_name(&self, name: &str) -> Option<CategoryId> {
        self.categories
            .iter()
            .find(|(_, r)| &*r.name == name)
            .map(|(id, _)| id)
    }

    /// Searches `category` and then its linked reserved category.
    pub fn find_rule(&self, category: CategoryId, name: &str) -> Option<RuleRef> {
        let registry = &self.categories[category];
        if let Some(rule) = registry.find_local(name) {
            return Some(RuleRef::new(category, rule));
        }
        let reserved = registry.reserved?;
        self.categories[reserved]
            .find_local(name)
            .map(|rule| RuleRef::new(reserved, rule))
    }

    pub fn rule(&self, r: RuleRef) -> &RuleBase {
        &self.categories[r.category].rules[r.rule]
    }

    pub fn rule_name(&self, r: RuleRef) -> &str {
        &self.rule(r).name
    }

    /// Resolves the pending elements of `category`, searching the category itself first and
    /// then `order`. Resolved elements become [`RuleElem::Rule`] in place, the rest stay pending
    /// and are returned.
    pub fn backpatch(
        &mut self,
        category: CategoryId,
        pool: &mut RuleElemPool,
        order: &[CategoryId],
    ) -> Vec<UnresolvedRef> {
        let pending = std::mem::take(&mut self.categories[category].pending);
        let mut still_pending = Vec::new();
        let mut unresolved = Vec::new();

        for handle in pending {
            let RuleElem::Pending(name) = &pool[handle].elem else {
                // already resolved through another path
                continue;
            };
            let name = name.clone();

            let found = self.find_rule(category, &name).or_else(|| {
                order.iter().find_map(|&other| {
                    self.categories[other]
                        .find_local(&name)
                        .map(|rule| RuleRef::new(other, rule))
                })
            });

            match found {
                Some(r) => {
                    log::debug!(
                        "{}: resolved `{name}` to {}::{}",
                        self.categories[category].name,
                        self.categories[r.category].name,
                        self.rule_name(r)
                    );
                    pool[handle].elem = RuleElem::Rule(r);
                }
                None => {
                    unresolved.push(UnresolvedRef {
                        category: self.categories[category].name.to_string(),
                        name: name.to_string(),
                    });
                    still_pending.push(handle);
                }
            }
        }

        self.categories[category].pending = still_pending;
        unresolved
    }
}

impl std::ops::Index<CategoryId> for Registries {
    type Output = Registry;
    fn index(&self, index: CategoryId) -> &Self::Output {
        &self.categories[index]
    }
}

impl std::ops::IndexMut<CategoryId> for Registries {
    fn index_mut(&mut self, index: CategoryId) -> &mut Self::Output {
        &mut self.categories[index]
    }
}
