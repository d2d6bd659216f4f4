// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Statement and expression code generation, including the builtin blocks.

use crate::builder::OpcodeBuilder;
use crate::constants::{Function, TestKind};
use crate::scanner::ScannedStatement;
use crate::symbol_table::{ATTRS_BLOCK, TableKind};
use crate::wire::{Expression, Hash, Path};
use ahash::AHashMap;
use arcstr::ArcStr;
use lazy_static::lazy_static;
use trellis_common::model::CompileError;
use trellis_var::program::{Op, Primitive};
use trellis_var::{Var, Variant};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BuiltinBlock {
    If,
    Unless,
    Each,
    With,
    WithDynamicVars,
}

lazy_static! {
    static ref BUILTIN_BLOCKS: AHashMap<&'static str, BuiltinBlock> = AHashMap::from_iter([
        ("if", BuiltinBlock::If),
        ("unless", BuiltinBlock::Unless),
        ("each", BuiltinBlock::Each),
        ("with", BuiltinBlock::With),
        ("-with-dynamic-vars", BuiltinBlock::WithDynamicVars),
    ]);
}

fn head(path: &Path) -> Result<(&ArcStr, &[ArcStr]), CompileError> {
    path.split_first()
        .ok_or_else(|| CompileError::malformed("path", "empty path"))
}

impl OpcodeBuilder<'_> {
    pub(crate) fn statements(&mut self, statements: &[ScannedStatement]) -> Result<(), CompileError> {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &ScannedStatement) -> Result<(), CompileError> {
        match statement {
            ScannedStatement::Text(text) => {
                let text = self.string(text);
                self.push1(Op::Text, text);
            }
            ScannedStatement::Comment(text) => {
                let text = self.string(text);
                self.push1(Op::Comment, text);
            }
            ScannedStatement::Append { value, trusted } => {
                self.expr(value)?;
                self.push1(Op::DynamicContent, *trusted as u32);
            }
            ScannedStatement::Modifier { name, params, hash } => {
                if !self.ctx.resolver.has_modifier(name) {
                    return Err(CompileError::UnknownModifier(name.to_string()));
                }
                self.args(Op::PushArgs, params, hash)?;
                let name = self.string(name);
                self.push1(Op::Modifier, name);
            }
            ScannedStatement::Block {
                name,
                params,
                hash,
                default,
                inverse,
            } => self.builtin_block(name, params, hash, *default, *inverse)?,
            ScannedStatement::Component {
                name,
                layout,
                params,
                hash,
                shadow,
                default,
                inverse,
            } => {
                let name = self.string(name);
                self.push(Op::PutComponent, name, *layout, 0);
                self.args(Op::PushArgs, params, hash)?;
                self.push(
                    Op::OpenComponent,
                    shadow.unwrap_or(0),
                    default.unwrap_or(0),
                    inverse.unwrap_or(0),
                );
                self.push0(Op::CloseComponent);
            }
            ScannedStatement::OpenElement(tag) => {
                let tag = self.string(tag);
                self.push1(Op::OpenElement, tag);
            }
            ScannedStatement::FlushElement => {
                self.push0(Op::FlushElement);
            }
            ScannedStatement::CloseElement => {
                self.push0(Op::CloseElement);
            }
            ScannedStatement::StaticAttr {
                name,
                value,
                namespace,
            } => {
                let name = self.string(name);
                let value = self.string(value);
                let namespace = self.namespace(namespace);
                self.push(Op::StaticAttr, name, value, namespace);
            }
            ScannedStatement::DynamicAttr {
                name,
                value,
                namespace,
                trusting,
            } => {
                self.expr(value)?;
                let name = self.string(name);
                let namespace = self.namespace(namespace);
                self.push(Op::DynamicAttr, name, namespace, *trusting as u32);
            }
            ScannedStatement::Yield { to, params } => self.yield_block(to, params)?,
            ScannedStatement::StaticPartial(block) => {
                self.push1(Op::PutPartial, *block);
                self.push0(Op::EvaluatePartial);
            }
            ScannedStatement::DynamicPartial {
                name,
                names,
                blocks,
            } => {
                self.expr(name)?;
                let local = self.get_local();
                self.push1(Op::PutLocal, local);
                let names = self.ctx.constants.string_array(names);
                let blocks = self.ctx.constants.array(blocks.clone());
                self.labelled(|b| {
                    b.push1(Op::PushLocal, local);
                    b.push(Op::PutDynamicPartial, names, blocks, 0);
                    b.push0(Op::EvaluatePartial);
                    Ok(())
                })?;
                self.release_local(local);
            }
            ScannedStatement::Debugger => {}
        }
        Ok(())
    }

    fn namespace(&mut self, namespace: &Option<ArcStr>) -> u32 {
        match namespace {
            Some(ns) => self.string(ns),
            None => 0,
        }
    }

    /// The binding prelude and root-element wrapper of a component layout around its body.
    pub(crate) fn layout(
        &mut self,
        prelude: Option<&[ScannedStatement]>,
        body: &[ScannedStatement],
    ) -> Result<(), CompileError> {
        let (names, symbols): (Vec<ArcStr>, Vec<u32>) = self
            .ctx
            .tables
            .named_symbols(self.table)
            .into_iter()
            .map(|(name, symbol)| match name.strip_prefix('@') {
                Some(bare) => (ArcStr::from(bare), symbol),
                None => (name.clone(), symbol),
            })
            .unzip();
        let names = self.ctx.constants.string_array(&names);
        let symbols = self.ctx.constants.array(symbols);
        self.push(Op::BindNamedArgs, names, symbols, 0);
        self.push0(Op::BindCallerScope);

        let (names, symbols): (Vec<ArcStr>, Vec<u32>) = self
            .ctx
            .tables
            .yield_symbols(self.table)
            .into_iter()
            .unzip();
        let names = self.ctx.constants.string_array(&names);
        let symbols = self.ctx.constants.array(symbols);
        self.push(Op::BindBlocks, names, symbols, 0);

        if let Some(bag) = self.ctx.tables.get_partial_args(self.table) {
            self.push1(Op::BindPartialArgs, bag);
        }

        if let Some(prelude) = prelude {
            self.statements(prelude)?;
            self.push0(Op::DidCreateElement);
            self.yield_block(&ArcStr::from(ATTRS_BLOCK), &[])?;
            self.push0(Op::FlushElement);
        }
        self.statements(body)?;
        if prelude.is_some() {
            self.push0(Op::CloseElement);
        }
        self.push0(Op::DidRenderLayout);
        Ok(())
    }

    fn yield_block(&mut self, to: &ArcStr, params: &[Expression]) -> Result<(), CompileError> {
        for param in params {
            self.expr(param)?;
        }
        if let Some(symbol) = self.ctx.tables.get_yield(self.table, to) {
            self.push1(Op::GetBlock, symbol);
        } else if let Some(bag) = self.ctx.tables.get_partial_args(self.table) {
            let name = self.string(to);
            self.push(Op::GetEvalBlock, bag, name, 0);
        } else {
            return Err(CompileError::UnknownBlock(to.to_string()));
        }
        self.push1(Op::OpenBlock, params.len() as u32);
        self.push0(Op::CloseBlock);
        Ok(())
    }

    fn builtin_block(
        &mut self,
        name: &ArcStr,
        params: &[Expression],
        hash: &Hash,
        default: Option<u32>,
        inverse: Option<u32>,
    ) -> Result<(), CompileError> {
        let Some(builtin) = BUILTIN_BLOCKS.get(name.as_str()) else {
            return Err(CompileError::UnknownBlock(name.to_string()));
        };
        match builtin {
            BuiltinBlock::If | BuiltinBlock::With => {
                self.conditional(name, params, hash, default, inverse)
            }
            BuiltinBlock::Unless => self.conditional(name, params, hash, inverse, default),
            BuiltinBlock::Each => self.each(params, hash, default, inverse),
            BuiltinBlock::WithDynamicVars => {
                self.args(Op::PutArgs, &[], hash)?;
                self.push0(Op::PushDynamicScope);
                let names = self.ctx.constants.string_array(&hash.names);
                self.push1(Op::BindDynamicScope, names);
                if let Some(default) = default {
                    self.push1(Op::Evaluate, default);
                }
                self.push0(Op::PopDynamicScope);
                Ok(())
            }
        }
    }

    fn single_param<'e>(
        &self,
        name: &str,
        params: &'e [Expression],
    ) -> Result<&'e Expression, CompileError> {
        match params {
            [param] => Ok(param),
            _ => Err(CompileError::malformed(
                name,
                format!("expected exactly one positional parameter, got {}", params.len()),
            )),
        }
    }

    /// `if`, `unless` and `with`: render `truthy` when the first param passes the environment's
    /// truthiness test, `falsy` otherwise.
    fn conditional(
        &mut self,
        name: &str,
        params: &[Expression],
        hash: &Hash,
        truthy: Option<u32>,
        falsy: Option<u32>,
    ) -> Result<(), CompileError> {
        let param = self.single_param(name, params)?;
        let kind = match param {
            Expression::Value(_) => TestKind::Const,
            _ => TestKind::Environment,
        };
        self.args(Op::PutArgs, params, hash)?;
        let test = self.ctx.constants.function(Function::Test(kind));
        self.push1(Op::Test, test);
        self.labelled(|b| {
            match (truthy, falsy) {
                (Some(truthy), Some(falsy)) => {
                    b.jump_unless("ELSE");
                    b.push1(Op::Evaluate, truthy);
                    b.jump("END");
                    b.label("ELSE");
                    b.push1(Op::Evaluate, falsy);
                }
                (Some(truthy), None) => {
                    b.jump_unless("END");
                    b.push1(Op::Evaluate, truthy);
                }
                (None, Some(falsy)) => {
                    b.jump_if("END");
                    b.push1(Op::Evaluate, falsy);
                }
                (None, None) => {}
            }
            Ok(())
        })
    }

    fn each(
        &mut self,
        params: &[Expression],
        hash: &Hash,
        default: Option<u32>,
        inverse: Option<u32>,
    ) -> Result<(), CompileError> {
        self.single_param("each", params)?;
        self.labelled(|b| {
            b.args(Op::PutArgs, params, hash)?;
            b.push0(Op::PutIterator);
            match inverse {
                Some(_) => b.jump_unless("ELSE"),
                None => b.jump_unless("END"),
            }
            b.iter(|b| {
                if let Some(default) = default {
                    b.push1(Op::Evaluate, default);
                }
                Ok(())
            })?;
            if let Some(inverse) = inverse {
                b.jump("END");
                b.label("ELSE");
                b.push1(Op::Evaluate, inverse);
            }
            Ok(())
        })
    }

    /// Push (or, with `PutArgs`, store) positional params followed by the hash values.
    fn args(&mut self, op: Op, params: &[Expression], hash: &Hash) -> Result<(), CompileError> {
        for param in params {
            self.expr(param)?;
        }
        for value in &hash.values {
            self.expr(value)?;
        }
        let names = if hash.is_empty() {
            0
        } else {
            self.ctx.constants.string_array(&hash.names)
        };
        self.push(op, params.len() as u32, names, 0);
        Ok(())
    }

    pub(crate) fn expr(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Value(v) => self.literal(v),
            Expression::Undefined => {
                self.push1(Op::PushPrimitive, Primitive::Undefined.encode());
            }
            Expression::Get(path) => {
                let (name, rest) = head(path)?;
                let symbol = self
                    .ctx
                    .tables
                    .get_local(self.table, name)
                    .ok_or_else(|| CompileError::UnresolvedSymbol(name.to_string()))?;
                self.push1(Op::PushSymbol, symbol);
                self.get_keys(rest);
            }
            Expression::SelfGet(path) => {
                self.push0(Op::PushSelf);
                self.get_keys(path);
            }
            Expression::Unknown(path) => {
                let (name, rest) = head(path)?;
                if rest.is_empty() && self.ctx.resolver.has_helper(name) {
                    self.push(Op::PushArgs, 0, 0, 0);
                    let name = self.string(name);
                    self.push1(Op::Helper, name);
                } else if let Some(symbol) = self.ctx.tables.get_local(self.table, name) {
                    self.push1(Op::PushSymbol, symbol);
                    self.get_keys(rest);
                } else {
                    self.push0(Op::PushSelf);
                    self.get_keys(path);
                }
            }
            Expression::Arg(path) => {
                let (name, rest) = head(path)?;
                if self.ctx.tables.program_kind(self.table) != TableKind::Layout {
                    return Err(CompileError::ArgumentOutsideComponent(name.to_string()));
                }
                let tables = &self.ctx.tables;
                let symbol = tables.get_named(self.table, name).or_else(|| {
                    let bare = name.strip_prefix('@').unwrap_or(name);
                    tables.get_named(self.table, &format!("@{bare}"))
                });
                match symbol {
                    Some(symbol) => self.push1(Op::PushSymbol, symbol),
                    None => self.push1(Op::PushPrimitive, Primitive::Undefined.encode()),
                };
                self.get_keys(rest);
            }
            Expression::Concat(parts) => {
                for part in parts {
                    self.expr(part)?;
                }
                self.push1(Op::Concat, parts.len() as u32);
            }
            Expression::HasBlock(name) => self.has_block(Op::HasBlock, name),
            Expression::HasBlockParams(name) => self.has_block(Op::HasBlockParams, name),
            Expression::Helper { path, params, hash } => {
                let name = match path.as_slice() {
                    [name] => name,
                    _ => return Err(CompileError::UnknownHelper(path.join("."))),
                };
                if name.as_str() == "-get-dynamic-var" {
                    let param = self.single_param(name, params)?;
                    self.expr(param)?;
                    self.push0(Op::GetDynamicVar);
                } else if self.ctx.resolver.has_helper(name) {
                    self.args(Op::PushArgs, params, hash)?;
                    let name = self.string(name);
                    self.push1(Op::Helper, name);
                } else {
                    return Err(CompileError::UnknownHelper(name.to_string()));
                }
            }
        }
        Ok(())
    }

    fn get_keys(&mut self, keys: &[ArcStr]) {
        for key in keys {
            let key = self.string(key);
            self.push1(Op::GetKey, key);
        }
    }

    fn has_block(&mut self, op: Op, name: &ArcStr) {
        if let Some(symbol) = self.ctx.tables.get_yield(self.table, name) {
            self.push(op, symbol, 0, 0);
        } else if let Some(bag) = self.ctx.tables.get_partial_args(self.table) {
            let name = self.string(name);
            self.push(op, bag, name, 0);
        } else {
            self.push1(Op::PushPrimitive, Primitive::Bool(false).encode());
        }
    }

    fn literal(&mut self, v: &Var) {
        let primitive = match v.variant() {
            Variant::Int(n) if (0..=Primitive::MAX_NUMBER as i64).contains(n) => {
                Some(Primitive::Number(*n as u32))
            }
            Variant::Str(s) => Some(Primitive::String(self.string(s))),
            Variant::Bool(b) => Some(Primitive::Bool(*b)),
            Variant::Null => Some(Primitive::Null),
            Variant::Undefined => Some(Primitive::Undefined),
            _ => None,
        };
        match primitive {
            Some(p) => self.push1(Op::PushPrimitive, p.encode()),
            None => {
                let value = self.ctx.constants.value(v.clone());
                self.push1(Op::PushImmediate, value)
            }
        };
    }
}
