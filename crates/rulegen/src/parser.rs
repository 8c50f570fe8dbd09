//! Recursive descent parser for spec files.
//!
//! A file is parsed into the [`Registry`] of its category, rule elements are allocated in the
//! shared [`RuleElemPool`]. Names that do not resolve to an already declared rule (or a type
//! keyword) become [`RuleElem::Pending`] and are left for [`Registries::backpatch`].

use crate::{
    ast::{
        ElemNode, RcString, RuleAction, RuleAttr, RuleBase, RuleElem, RuleOp, StructBase,
        StructData, StructElem, TypeId,
    },
    config::Config,
    error::{CompileError, Diagnostics, SyntaxError},
    lexer::{lex, Lexer, Token, TokenKind, TokenValue},
    pool::{ElemHandle, RuleElemPool},
    registry::{CategoryId, Registries, Registry, RuleId, RuleRef},
    span::{LineCol, Spanned},
};

use TokenKind::*;

type PResult<T> = Result<T, CompileError>;

/// Decides what a `+` or `)` means for the element currently being parsed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ElemContext {
    None,
    /// Inside the parentheses of `ONEOF`, `ZEROORMORE`, `ZEROORONE` or `ASI`.
    Set,
    /// Parsing an operand of a `+` chain, the chain itself is extended by the caller.
    Concatenate,
}

#[derive(Clone, Copy)]
enum AttrSelector {
    Property,
    Validity,
    Action,
    Type,
}

pub struct ParseCx<'a> {
    pub pool: &'a mut RuleElemPool,
    /// The other categories, only the reserved one is consulted while parsing.
    pub registries: &'a Registries,
    pub config: &'a Config,
    pub diagnostics: &'a Diagnostics,
}

/// Parses `src` into `registry`, returning the declared rules in order.
pub fn parse(
    src: &str,
    category: CategoryId,
    registry: &mut Registry,
    cx: ParseCx,
) -> Result<Vec<RuleId>, CompileError> {
    let mut lexer = Lexer::new(src, &cx.config.comment_prefix);
    let tokens = lex(&mut lexer).map_err(|error| CompileError::Syntax {
        category: registry.name.to_string(),
        error,
    })?;
    registry.comments.extend(lexer.into_comments());

    let mut parser = SpecParser {
        src,
        tokens,
        pos: 0,
        context: Vec::new(),
        category,
        registry,
        cx,
        current: None,
        declared: Vec::new(),
    };
    parser.file()?;

    log::info!(
        "{}: parsed {} rules, {} structs, {} pending",
        parser.registry.name,
        parser.declared.len(),
        parser.registry.structs.len(),
        parser.registry.pending.len()
    );
    Ok(parser.declared)
}

pub struct SpecParser<'a, 'b> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    context: Vec<ElemContext>,
    category: CategoryId,
    registry: &'b mut Registry,
    cx: ParseCx<'b>,
    current: Option<RuleId>,
    declared: Vec<RuleId>,
}

impl<'a, 'b> SpecParser<'a, 'b> {
    fn peek(&self) -> &Token {
        self.nth(0)
    }

    fn nth(&self, lookahead: usize) -> &Token {
        // the token list always ends with Eof
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + lookahead).min(last)]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_word(&self, word: &str) -> bool {
        self.at(Name) && self.peek().text(self.src) == word
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != Eof {
            self.pos += 1;
        }
        token
    }

    fn token(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(kind.describe()))
        }
    }

    fn expect_word(&mut self, word: &'static str) -> PResult<()> {
        if self.at_word(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("'{word}'")))
        }
    }

    fn expect_name(&mut self) -> PResult<Spanned<RcString>> {
        let token = self.expect(Name)?;
        Ok(Spanned::new(token.text(self.src).into(), token.pos))
    }

    fn error(&self, expected: impl Into<crate::error::Message>) -> CompileError {
        let token = self.peek();
        let found = match token.kind {
            Eof => "end of file".to_owned(),
            _ => format!("'{}'", token.text(self.src)),
        };
        self.syntax(SyntaxError::new(token.pos, expected, found))
    }

    fn syntax(&self, error: SyntaxError) -> CompileError {
        CompileError::Syntax {
            category: self.registry.name.to_string(),
            error,
        }
    }

    fn context(&self) -> ElemContext {
        self.context.last().copied().unwrap_or(ElemContext::None)
    }

    fn alloc(&mut self, elem: RuleElem, origin: TokenKind, pos: LineCol) -> ElemHandle {
        self.cx.pool.alloc(ElemNode::parsed(elem, origin, pos))
    }

    fn find_rule(&self, name: &str) -> Option<RuleRef> {
        if let Some(rule) = self.registry.find_local(name) {
            return Some(RuleRef::new(self.category, rule));
        }
        let reserved = self.registry.reserved?;
        self.cx.registries[reserved]
            .find_local(name)
            .map(|rule| RuleRef::new(reserved, rule))
    }

    // (RuleDecl | StructDecl | AttrDecl)* EOF
    fn file(&mut self) -> PResult<()> {
        loop {
            match self.peek().kind {
                RuleKeyword => self.rule_decl()?,
                StructKeyword => self.struct_decl()?,
                AttrKeyword => self.attr_decl()?,
                Eof => return Ok(()),
                _ => return Err(self.error("'rule', 'STRUCT' or 'attr'")),
            }
        }
    }

    // 'rule' Name ':' Element
    fn rule_decl(&mut self) -> PResult<()> {
        self.expect(RuleKeyword)?;
        let name = self.expect_name()?;
        self.expect(Colon)?;

        // registered before the body so that the rule can refer to itself
        let rule = RuleBase::new(name.inner.clone(), name.pos);
        let id = self
            .registry
            .new_rule(rule)
            .map_err(|_| CompileError::DuplicateRule {
                category: self.registry.name.to_string(),
                name: name.to_string(),
                pos: name.pos,
            })?;
        self.current = Some(id);
        self.declared.push(id);

        debug_assert!(self.context.is_empty());
        let root = self.element()?;
        debug_assert!(self.context.is_empty());

        self.registry.rules[id].root = Some(root);
        log::trace!("{}: rule {}", self.registry.name, name.inner);
        Ok(())
    }

    // Primary ('+' Primary)* ('==>' 'func' Action)*
    fn element(&mut self) -> PResult<ElemHandle> {
        let first = self.primary()?;
        if self.context() == ElemContext::Concatenate {
            return Ok(first);
        }

        let mut elem = first;
        if self.at(Plus) {
            let pos = self.cx.pool[first].pos;
            let mut children = vec![first];

            self.context.push(ElemContext::Concatenate);
            while self.token(Plus) {
                children.push(self.element()?);
            }
            self.context.pop();

            elem = self.alloc(RuleElem::Op(RuleOp::Concatenate, children), Plus, pos);
        }

        while self.at(Arrow) {
            elem = self.action_func(elem)?;
        }
        Ok(elem)
    }

    // Name | Char | String | SetOp
    fn primary(&mut self) -> PResult<ElemHandle> {
        let token = self.peek().clone();
        let pos = token.pos;

        let handle = match token.kind {
            Name => {
                self.advance();
                let name = token.text(self.src);
                if let Some(rule) = self.find_rule(name) {
                    self.alloc(RuleElem::Rule(rule), Name, pos)
                } else if let Some(ty) = TypeId::from_name(name) {
                    self.alloc(RuleElem::Type(ty), Name, pos)
                } else {
                    let handle = self.alloc(RuleElem::Pending(name.into()), Name, pos);
                    log::debug!("{}: pending reference to `{name}` at {pos}", self.registry.name);
                    self.registry.register_pending(handle);
                    handle
                }
            }
            Char => {
                self.advance();
                let TokenValue::Char(c) = token.value else {
                    unreachable!("Char token without a value")
                };
                self.registry.intern_char(self.cx.pool, c, pos)
            }
            String => {
                self.advance();
                let TokenValue::Str(s) = &token.value else {
                    unreachable!("String token without a value")
                };
                self.registry.intern_string(self.cx.pool, s, pos)
            }
            OneofKeyword => self.set_op(RuleOp::OneOf)?,
            ZeroormoreKeyword => self.set_op(RuleOp::ZeroOrMore)?,
            ZerooroneKeyword => self.set_op(RuleOp::ZeroOrOne)?,
            AsiKeyword => self.set_op(RuleOp::Asi)?,
            _ => return Err(self.error("an element")),
        };

        Ok(handle)
    }

    // KEYWORD '(' Element (',' Element)* ')'
    fn set_op(&mut self, op: RuleOp) -> PResult<ElemHandle> {
        let keyword = self.advance();
        self.expect(LParen)?;

        let mut children = Vec::new();
        self.context.push(ElemContext::Set);
        loop {
            children.push(self.element()?);
            if !self.token(Comma) {
                break;
            }
        }
        self.context.pop();

        if op.is_unary() && children.len() != 1 {
            return Err(self.error(format!("')', {} takes exactly one element", op.keyword())));
        }
        self.expect(RParen)?;

        Ok(self.alloc(RuleElem::Op(op, children), keyword.kind, keyword.pos))
    }

    // '==>' 'func' Action
    fn action_func(&mut self, elem: ElemHandle) -> PResult<ElemHandle> {
        self.expect(Arrow)?;
        self.expect_word("func")?;
        let action = self.action()?;

        let elem = self.detach_literal(elem);
        self.cx.pool[elem].attr_mut().action.push(action);
        Ok(elem)
    }

    /// Gives an interned literal its own element so that attributes stay local to one use.
    fn detach_literal(&mut self, elem: ElemHandle) -> ElemHandle {
        if !self.registry.is_interned(elem) {
            return elem;
        }
        let node = self.cx.pool[elem].clone();
        log::debug!("{}: detaching literal at {}", self.registry.name, node.pos);
        self.cx.pool.alloc(node)
    }

    // Name '(' ('%' Int (',' '%' Int)*)? ')'
    fn action(&mut self) -> PResult<RuleAction> {
        let name = self.expect_name()?;
        self.expect(LParen)?;

        let mut args = Vec::new();
        if !self.at(RParen) {
            loop {
                self.expect(Percent)?;
                args.push(self.operand()?);
                if !self.token(Comma) {
                    break;
                }
            }
        }
        self.expect(RParen)?;

        let max = self.cx.config.max_action_args;
        if args.len() > max {
            return Err(CompileError::TooManyActionArgs {
                category: self.registry.name.to_string(),
                action: name.to_string(),
                max,
                pos: name.pos,
            });
        }

        Ok(RuleAction {
            name: name.inner,
            args,
            pos: name.pos,
        })
    }

    fn operand(&mut self) -> PResult<u8> {
        if let TokenValue::Int(value) = self.peek().value {
            if let Ok(value) = u8::try_from(value) {
                self.advance();
                return Ok(value);
            }
        }
        Err(self.error("an operand number"))
    }

    // 'attr' '.' Selector ('.' '%' Int (',' '%' Int)*)? ':' Values
    fn attr_decl(&mut self) -> PResult<()> {
        let attr = self.expect(AttrKeyword)?;
        let Some(rule) = self.current else {
            return Err(self.syntax(SyntaxError::new(
                attr.pos,
                "a rule declaration before 'attr'",
                "'attr'",
            )));
        };
        self.expect(Dot)?;

        let selector = match self.peek().text(self.src) {
            "property" if self.at(Name) => AttrSelector::Property,
            "validity" if self.at(Name) => AttrSelector::Validity,
            "action" if self.at(Name) => AttrSelector::Action,
            "type" if self.at(Name) => AttrSelector::Type,
            _ => return Err(self.error("'property', 'validity', 'action' or 'type'")),
        };
        self.advance();

        let mut targets = Vec::new();
        if self.token(Dot) {
            loop {
                let pos = self.expect(Percent)?.pos;
                targets.push(Spanned::new(self.operand()?, pos));
                if !self.token(Comma) {
                    break;
                }
            }
        }
        self.expect(Colon)?;

        let mut attr = RuleAttr::default();
        match selector {
            AttrSelector::Property => loop {
                attr.properties.push(self.expect_name()?.inner);
                if !self.token(Comma) {
                    break;
                }
            },
            AttrSelector::Validity | AttrSelector::Action => {
                let list = match selector {
                    AttrSelector::Validity => &mut attr.validity,
                    _ => &mut attr.action,
                };
                loop {
                    list.push(self.action()?);
                    if !(self.token(Comma) || self.token(Semicolon)) || !self.at(Name) {
                        break;
                    }
                }
            }
            AttrSelector::Type => {
                let name = self.expect_name()?;
                log::debug!("{}: ignoring attr.type {}", self.registry.name, name.inner);
                return Ok(());
            }
        }

        if targets.is_empty() {
            self.registry.rules[rule].attr.extend(&attr);
            return Ok(());
        }

        for target in targets {
            self.attach_to_operand(rule, target, &attr)?;
        }
        Ok(())
    }

    fn attach_to_operand(
        &mut self,
        rule: RuleId,
        target: Spanned<u8>,
        attr: &RuleAttr,
    ) -> PResult<()> {
        let Some(root) = self.registry.rules[rule].root else {
            unreachable!("attr parsed before the rule body")
        };
        let len = self.cx.pool[root].elem.children().len();
        let index = *target as usize;

        if index == 0 || index > len {
            let rule_name = self.registry.rules[rule].name.to_string();
            if self.cx.config.strict_operands {
                return Err(CompileError::OperandOutOfRange {
                    category: self.registry.name.to_string(),
                    rule: rule_name,
                    index: u32::from(*target),
                    len,
                    pos: target.pos,
                });
            }
            self.cx.diagnostics.warning_at(
                &self.registry.name,
                Spanned::new(
                    format!("operand %{} of rule `{rule_name}` is out of range, ignoring", *target),
                    target.pos,
                ),
            );
            return Ok(());
        }

        let child = self.cx.pool[root].elem.children()[index - 1];
        let detached = self.detach_literal(child);
        if detached != child {
            if let RuleElem::Op(_, children) = &mut self.cx.pool[root].elem {
                children[index - 1] = detached;
            }
        }
        self.cx.pool[detached].attr_mut().extend(attr);
        Ok(())
    }

    // 'STRUCT' Name ':' 'ONEOF'? ( '(' Tuple (','? Tuple)* ')' | Tuple* )
    fn struct_decl(&mut self) -> PResult<()> {
        self.expect(StructKeyword)?;
        let name = self.expect_name()?;
        self.expect(Colon)?;
        self.token(OneofKeyword);

        let mut s = StructBase::new(name.inner);
        if self.at(LParen) && self.nth(1).kind == LParen {
            self.advance();
            while self.at(LParen) {
                s.elems.push(self.tuple()?);
                self.token(Comma);
            }
            self.expect(RParen)?;
        } else if self.at(LParen) {
            while self.at(LParen) {
                s.elems.push(self.tuple()?);
            }
        } else {
            return Err(self.error("'('"));
        }

        log::debug!("{}: STRUCT {} with {} tuples", self.registry.name, s.name, s.elems.len());
        self.registry.structs.push(s);
        Ok(())
    }

    // '(' Cell (',' Cell)* ')'
    fn tuple(&mut self) -> PResult<StructElem> {
        self.expect(LParen)?;
        let mut elem = StructElem::default();
        if !self.at(RParen) {
            loop {
                elem.data.push(self.cell()?);
                if !self.token(Comma) {
                    break;
                }
            }
        }
        self.expect(RParen)?;
        Ok(elem)
    }

    fn cell(&mut self) -> PResult<StructData> {
        let token = self.peek().clone();
        let data = match (token.kind, &token.value) {
            (Char, TokenValue::Char(c)) => StructData::Char(*c),
            (String, TokenValue::Str(s)) => StructData::String(s.clone()),
            (IntConst, TokenValue::Int(i)) => StructData::Int(*i),
            (FloatConst, TokenValue::Float(f)) => StructData::Float(*f),
            (DoubleConst, TokenValue::Double(d)) => StructData::Double(*d),
            // reserved words are plain names inside a tuple
            (
                Name | RuleKeyword | StructKeyword | OneofKeyword | ZerooroneKeyword
                | ZeroormoreKeyword | AsiKeyword | AttrKeyword,
                _,
            ) => StructData::Name(token.text(self.src).into()),
            _ => return Err(self.error("a character, string, number or name")),
        };
        self.advance();
        Ok(data)
    }
}
