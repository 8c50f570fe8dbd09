use std::collections::HashMap;

use serde::Serialize;

use crate::{
    ast::{RcString, StructBase},
    config::Config,
    error::{CompileError, Diagnostic, Diagnostics, UnresolvedRef},
    lower::{lower_rule, patch_tokens, DebugEntry, LowerCx, LowerState, LoweredTable, RuleTables},
    parser::{self, ParseCx},
    pool::RuleElemPool,
    registry::{CategoryId, Registries, Registry, RuleRef},
    relations::{RuleRelations, TokenLinks},
    token_table::{collect_literals, install_token_rules, TokenId, TokenTable, TokenTableBuilder},
};

/// Pipeline stages, every stage needs all of the previous ones to be complete.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Phase {
    Parsing,
    Resolved,
    TokensBuilt,
    Lowered,
}

/// Tables of one category, rules in declaration order.
#[derive(Debug, Serialize)]
pub struct CategoryTables {
    pub name: RcString,
    pub rules: Vec<RuleTables>,
    pub structs: Vec<StructBase>,
}

#[derive(Debug, Serialize)]
pub struct CompileOutput {
    pub categories: Vec<CategoryTables>,
    pub top_rules: Vec<RcString>,
    pub debug_table: Vec<DebugEntry>,
    /// Action names, the index is the opcode.
    pub actions: Vec<RcString>,
    pub tokens: TokenTable,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    pub fn find_rule(&self, name: &str) -> Option<&RuleTables> {
        self.categories
            .iter()
            .flat_map(|c| &c.rules)
            .find(|r| &*r.rule == name)
    }

    /// Looks a table up by its generated name, `TblExpr_sub2`.
    pub fn find_table(&self, name: &str) -> Option<&LoweredTable> {
        self.categories
            .iter()
            .flat_map(|c| &c.rules)
            .flat_map(|r| &r.tables)
            .find(|t| t.name.to_string() == name)
    }

    pub fn table_count(&self) -> usize {
        self.debug_table.len()
    }
}

/// Owns everything one compilation needs, the stages are run by calling the methods in order.
pub struct CompilationContext {
    pub config: Config,
    pub pool: RuleElemPool,
    pub registries: Registries,
    reserved: Option<CategoryId>,
    token_category: Option<CategoryId>,
    phase: Phase,
    tokens: TokenTable,
    token_rules: HashMap<TokenId, RuleRef>,
    lower: LowerState,
    diagnostics: Diagnostics,
}

impl CompilationContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pool: RuleElemPool::new(),
            registries: Registries::new(),
            reserved: None,
            token_category: None,
            phase: Phase::Parsing,
            tokens: TokenTable::default(),
            token_rules: HashMap::new(),
            lower: LowerState::default(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tokens(&self) -> &TokenTable {
        &self.tokens
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn reserved(&self) -> Option<CategoryId> {
        self.reserved
    }

    fn expect_phase(&self, operation: &'static str, expected: Phase) -> Result<(), CompileError> {
        if self.phase != expected {
            return Err(CompileError::PhaseOrder {
                operation,
                expected,
                found: self.phase,
            });
        }
        Ok(())
    }

    fn add_registry(&mut self, name: &str) -> Result<CategoryId, CompileError> {
        if self.registries.by_name(name).is_some() {
            return Err(CompileError::DuplicateCategory(name.to_owned()));
        }
        Ok(self.registries.push(Registry::new(name)))
    }

    /// The reserved category is parsed before the first arena tag, its elements are never released.
    pub fn parse_reserved(&mut self, name: &str, src: &str) -> Result<CategoryId, CompileError> {
        self.expect_phase("parse the reserved category", Phase::Parsing)?;
        if self.reserved.is_some() || !self.registries.categories.is_empty() {
            return Err(CompileError::ReservedTooLate(name.to_owned()));
        }

        let id = self.add_registry(name)?;
        self.parse_into(id, src)?;
        self.reserved = Some(id);
        Ok(id)
    }

    pub fn parse_category(&mut self, name: &str, src: &str) -> Result<CategoryId, CompileError> {
        self.expect_phase("parse a category", Phase::Parsing)?;

        let id = self.add_registry(name)?;
        let tag = self.pool.tag();
        self.registries[id].tag = Some(tag);
        self.registries[id].reserved = self.reserved;

        self.parse_into(id, src)?;
        Ok(id)
    }

    fn parse_into(&mut self, id: CategoryId, src: &str) -> Result<(), CompileError> {
        // moved out so that the other categories stay readable while this one is filled
        let mut registry = std::mem::replace(&mut self.registries[id], Registry::new(""));
        let result = parser::parse(
            src,
            id,
            &mut registry,
            ParseCx {
                pool: &mut self.pool,
                registries: &self.registries,
                config: &self.config,
                diagnostics: &self.diagnostics,
            },
        );
        self.registries[id] = registry;
        result?;

        if log::log_enabled!(log::Level::Trace) {
            let registry = &self.registries[id];
            log::trace!(
                "{}:\n{}",
                registry.name,
                registry.dump(&self.pool, &self.registries)
            );
        }
        Ok(())
    }

    /// Resolves every pending reference, each category searches itself, its reserved category
    /// and then all categories in registration order.
    pub fn backpatch(&mut self) -> Result<Vec<UnresolvedRef>, CompileError> {
        self.expect_phase("backpatch", Phase::Parsing)?;

        let order: Vec<CategoryId> = self.registries.categories.keys().collect();
        let mut unresolved = Vec::new();
        for &id in &order {
            unresolved.extend(self.registries.backpatch(id, &mut self.pool, &order));
        }

        if !unresolved.is_empty() {
            if self.config.strict_references {
                return Err(CompileError::Unresolved { names: unresolved });
            }
            for name in &unresolved {
                self.diagnostics
                    .warning(&name.category, None, format_args!("unresolved reference `{}`", name.name));
            }
        }

        log::info!(
            "backpatched {} categories, {} unresolved",
            order.len(),
            unresolved.len()
        );
        self.phase = Phase::Resolved;
        Ok(unresolved)
    }

    pub fn relations(&self) -> Result<RuleRelations, CompileError> {
        if self.phase < Phase::Resolved {
            return Err(CompileError::PhaseOrder {
                operation: "build rule relations",
                expected: Phase::Resolved,
                found: self.phase,
            });
        }
        let links = (!self.token_rules.is_empty()).then_some(TokenLinks {
            table: &self.tokens,
            rules: &self.token_rules,
        });
        Ok(RuleRelations::build(&self.pool, &self.registries, links))
    }

    pub fn build_token_table(&mut self) -> Result<&TokenTable, CompileError> {
        self.expect_phase("build the token table", Phase::Resolved)?;

        let mut builder = TokenTableBuilder::new();
        for source in &self.config.token_sources {
            for (_, registry) in self.registries.categories.iter() {
                if let Some(s) = registry.find_struct(source) {
                    let added = builder.add_struct(s);
                    log::debug!("{}: {added} tokens from STRUCT {source}", registry.name);
                }
            }
        }
        self.tokens = builder.build();

        for (_, registry) in self.registries.categories.iter() {
            let literals = collect_literals(&self.pool, registry);
            for text in literals.iter_text() {
                if self.tokens.find_token(&text).is_none() {
                    self.diagnostics.note(
                        &registry.name,
                        None,
                        format_args!("literal {text:?} is not in the token table"),
                    );
                }
            }
        }

        if self.config.token_rules {
            self.install_token_rules()?;
        }

        log::info!("token table has {} entries", self.tokens.len());
        self.phase = Phase::TokensBuilt;
        Ok(&self.tokens)
    }

    fn install_token_rules(&mut self) -> Result<(), CompileError> {
        let id = self.add_registry("tokens")?;
        let tag = self.pool.tag();
        let registry = &mut self.registries[id];
        registry.tag = Some(tag);
        registry.reserved = self.reserved;

        let rules = install_token_rules(&self.tokens, &mut self.pool, registry);
        for (entry, rule) in self.tokens.entries().iter().zip(rules) {
            self.token_rules.insert(entry.id, RuleRef::new(id, rule));
        }
        self.token_category = Some(id);
        Ok(())
    }

    fn lowering_order(&self) -> Result<Vec<CategoryId>, CompileError> {
        let mut order: Vec<CategoryId> = self.reserved.into_iter().collect();
        for name in &self.config.category_order {
            let id = self
                .registries
                .by_name(name)
                .ok_or_else(|| CompileError::UnknownCategory(name.clone()))?;
            if !order.contains(&id) {
                order.push(id);
            }
        }
        for id in self.registries.categories.keys() {
            if !order.contains(&id) && Some(id) != self.token_category {
                order.push(id);
            }
        }
        if let Some(id) = self.token_category {
            if !order.contains(&id) {
                order.push(id);
            }
        }
        Ok(order)
    }

    /// Patches and lowers every rule, then releases the arena back to the reserved elements.
    pub fn lower(&mut self) -> Result<CompileOutput, CompileError> {
        self.expect_phase("lower", Phase::TokensBuilt)?;
        let order = self.lowering_order()?;

        let cx = LowerCx {
            tokens: &self.tokens,
            config: &self.config,
            diagnostics: &self.diagnostics,
        };

        let mut categories = Vec::new();
        for id in order {
            let registry = &self.registries[id];
            let mut rules = Vec::new();
            for (rule_id, rule) in registry.rules.iter() {
                if let Some(root) = rule.root {
                    if !self.config.is_exempt(&rule.name) {
                        patch_tokens(root, &mut self.pool, &self.tokens);
                    }
                }
                rules.push(lower_rule(
                    RuleRef::new(id, rule_id),
                    &self.pool,
                    &self.registries,
                    &cx,
                    &mut self.lower,
                ));
            }
            log::info!("{}: lowered {} rules", registry.name, rules.len());
            categories.push(CategoryTables {
                name: registry.name.clone(),
                rules,
                structs: registry.structs.clone(),
            });
        }

        self.release();
        self.phase = Phase::Lowered;

        Ok(CompileOutput {
            categories,
            top_rules: self.lower.top_rules.clone(),
            debug_table: self.lower.debug_table.clone(),
            actions: self.lower.actions.names().to_vec(),
            tokens: self.tokens.clone(),
            diagnostics: self.diagnostics.take(),
        })
    }

    // categories are released newest first, which keeps every remaining tag live
    fn release(&mut self) {
        let ids: Vec<CategoryId> = self.registries.categories.keys().rev().collect();
        for id in ids {
            let registry = &mut self.registries[id];
            if let Some(tag) = registry.tag.take() {
                self.pool.release_to_tag(tag);
                registry.released = true;
            }
        }
        debug_assert_eq!(self.pool.len(), self.pool.reserved_len());
        log::debug!("arena released to {} reserved elements", self.pool.len());
    }
}

/// Runs the whole pipeline, `categories` are `(name, source)` pairs.
pub fn compile(
    config: Config,
    reserved: Option<&str>,
    categories: &[(&str, &str)],
) -> Result<CompileOutput, CompileError> {
    let mut cx = CompilationContext::new(config);
    if let Some(src) = reserved {
        cx.parse_reserved("reserved", src)?;
    }
    for &(name, src) in categories {
        cx.parse_category(name, src)?;
    }
    cx.backpatch()?;
    cx.build_token_table()?;
    cx.lower()
}
