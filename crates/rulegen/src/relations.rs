//! Transitive "used by" and "is a" relations between rules.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    ast::{RuleElem, RuleOp},
    pool::{ElemHandle, RuleElemPool},
    registry::{Registries, RuleRef},
    token_table::{TokenId, TokenTable},
};

type RelationMap = BTreeMap<RuleRef, BTreeSet<RuleRef>>;

/// Lets literal leaves stand for their `TK_` wrapper rules.
#[derive(Clone, Copy)]
pub struct TokenLinks<'a> {
    pub table: &'a TokenTable,
    pub rules: &'a HashMap<TokenId, RuleRef>,
}

impl TokenLinks<'_> {
    fn rule_of(&self, elem: &RuleElem) -> Option<RuleRef> {
        let token = match elem {
            RuleElem::Token(id) => *id,
            RuleElem::Char(c) => self.table.find_char(*c)?,
            RuleElem::String(s) => self.table.find_token(s)?,
            _ => return None,
        };
        self.rules.get(&token).copied()
    }
}

#[derive(Default, Debug)]
pub struct RuleRelations {
    used_by: RelationMap,
    is_a: RelationMap,
}

impl RuleRelations {
    pub fn build(
        pool: &RuleElemPool,
        registries: &Registries,
        links: Option<TokenLinks>,
    ) -> RuleRelations {
        let mut this = RuleRelations::default();

        for (category, registry) in registries.categories.iter() {
            if registry.released {
                continue;
            }
            for (id, rule) in registry.rules.iter() {
                let Some(root) = rule.root else {
                    continue;
                };
                let user = RuleRef::new(category, id);

                visit_refs(root, pool, links, &mut |used| {
                    if used != user {
                        this.used_by.entry(used).or_default().insert(user);
                    }
                });

                let alternatives: &[ElemHandle] = match &pool[root].elem {
                    RuleElem::Op(RuleOp::OneOf, children) => children,
                    RuleElem::Op(..) => &[],
                    _ => std::slice::from_ref(&root),
                };
                for &alt in alternatives {
                    if let Some(child) = direct_ref(&pool[alt].elem, links) {
                        if child != user {
                            this.is_a.entry(child).or_default().insert(user);
                        }
                    }
                }
            }
        }

        let rounds = closure(&mut this.used_by) + closure(&mut this.is_a);
        log::debug!(
            "rule relations: {} used-by entries, {} is-a entries, {rounds} closure rounds",
            this.used_by.len(),
            this.is_a.len()
        );
        this
    }

    /// Whether `rule` appears in the tree of `user`, directly or through other rules.
    pub fn is_used_by(&self, rule: RuleRef, user: RuleRef) -> bool {
        self.used_by.get(&rule).is_some_and(|s| s.contains(&user))
    }

    /// Whether `rule` is one of the alternatives of `parent`, directly or through other rules.
    pub fn is_a(&self, rule: RuleRef, parent: RuleRef) -> bool {
        self.is_a.get(&rule).is_some_and(|s| s.contains(&parent))
    }

    pub fn parents(&self, rule: RuleRef) -> impl Iterator<Item = RuleRef> + '_ {
        self.is_a.get(&rule).into_iter().flatten().copied()
    }
}

fn direct_ref(elem: &RuleElem, links: Option<TokenLinks>) -> Option<RuleRef> {
    match elem {
        RuleElem::Rule(r) => Some(*r),
        _ => links.and_then(|l| l.rule_of(elem)),
    }
}

fn visit_refs(
    handle: ElemHandle,
    pool: &RuleElemPool,
    links: Option<TokenLinks>,
    f: &mut dyn FnMut(RuleRef),
) {
    let elem = &pool[handle].elem;
    if let Some(r) = direct_ref(elem, links) {
        f(r);
    }
    for &child in elem.children() {
        visit_refs(child, pool, links, f);
    }
}

/// Extends every set with the sets of its members until nothing changes.
fn closure(map: &mut RelationMap) -> usize {
    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut changed = false;
        let keys: Vec<RuleRef> = map.keys().copied().collect();
        for key in keys {
            let reachable: Vec<RuleRef> = map[&key]
                .iter()
                .filter_map(|member| map.get(member))
                .flatten()
                .copied()
                .collect();
            let set = map.entry(key).or_default();
            for r in reachable {
                changed |= set.insert(r);
            }
        }
        if !changed {
            return rounds;
        }
    }
}
