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

//! Specialization of wire statements into the form the statement compiler consumes.
//!
//! Scanning decides everything that needs the resolver or the symbol tables: which invocations
//! are components, which `partial` calls can be resolved up front, where nested blocks live.
//! Nested blocks are scanned eagerly and registered in the constant pool; their code is
//! generated later from the compiler's worklist.

use crate::CompileContext;
use crate::constants::BlockSource;
use crate::symbol_table::TableId;
use crate::wire::{BlockRef, Expression, Hash, Path, SerializedBlock, SerializedTemplate, Statement};
use arcstr::ArcStr;
use tracing::{trace, warn};
use trellis_common::model::CompileError;

#[derive(Debug)]
pub struct ScannedBlock {
    pub table: TableId,
    pub params: Vec<u32>,
    pub statements: Vec<ScannedStatement>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScannedStatement {
    Text(ArcStr),
    Comment(ArcStr),
    Append {
        value: Expression,
        trusted: bool,
    },
    Modifier {
        name: ArcStr,
        params: Vec<Expression>,
        hash: Hash,
    },
    /// A builtin block (`if`, `each`, ...). Block operands are pool handles.
    Block {
        name: ArcStr,
        params: Vec<Expression>,
        hash: Hash,
        default: Option<u32>,
        inverse: Option<u32>,
    },
    Component {
        name: ArcStr,
        layout: u32,
        params: Vec<Expression>,
        hash: Hash,
        shadow: Option<u32>,
        default: Option<u32>,
        inverse: Option<u32>,
    },
    OpenElement(ArcStr),
    FlushElement,
    CloseElement,
    StaticAttr {
        name: ArcStr,
        value: ArcStr,
        namespace: Option<ArcStr>,
    },
    DynamicAttr {
        name: ArcStr,
        value: Expression,
        namespace: Option<ArcStr>,
        trusting: bool,
    },
    Yield {
        to: ArcStr,
        params: Vec<Expression>,
    },
    StaticPartial(u32),
    DynamicPartial {
        name: Expression,
        names: Vec<ArcStr>,
        blocks: Vec<u32>,
    },
    Debugger,
}

pub(crate) struct Scanner<'a> {
    ctx: &'a mut CompileContext,
    template: &'a SerializedTemplate,
}

fn single_name(path: &Path) -> Option<&ArcStr> {
    match path.as_slice() {
        [name] => Some(name),
        _ => None,
    }
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(ctx: &'a mut CompileContext, template: &'a SerializedTemplate) -> Self {
        Self { ctx, template }
    }

    /// Scan a block whose symbol table has already been allocated.
    pub(crate) fn scan_block(
        &mut self,
        block: &SerializedBlock,
        table: TableId,
    ) -> Result<ScannedBlock, CompileError> {
        let statements = self.scan_statements(&block.statements, table)?;
        Ok(ScannedBlock {
            table,
            params: self.ctx.tables.local_symbols(table),
            statements,
        })
    }

    pub(crate) fn scan_statements(
        &mut self,
        statements: &[Statement],
        table: TableId,
    ) -> Result<Vec<ScannedStatement>, CompileError> {
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            self.scan_statement(statement, table, &mut out)?;
        }
        Ok(out)
    }

    /// Register a nested block under a fresh child table of `parent`.
    fn child_block(
        &mut self,
        block: &SerializedBlock,
        parent: TableId,
    ) -> Result<u32, CompileError> {
        let table = self.ctx.tables.block(parent, &block.locals);
        let scanned = self.scan_block(block, table)?;
        Ok(self.ctx.enqueue(BlockSource::Inline(scanned)))
    }

    fn child_ref(
        &mut self,
        block: &Option<BlockRef>,
        parent: TableId,
    ) -> Result<Option<u32>, CompileError> {
        let template = self.template;
        match block {
            None => Ok(None),
            Some(r) => {
                let block = template.block_ref(r)?;
                self.child_block(block, parent).map(Some)
            }
        }
    }

    fn scan_statement(
        &mut self,
        statement: &Statement,
        table: TableId,
        out: &mut Vec<ScannedStatement>,
    ) -> Result<(), CompileError> {
        match statement {
            Statement::Text(text) => out.push(ScannedStatement::Text(text.clone())),
            Statement::Comment(text) => out.push(ScannedStatement::Comment(text.clone())),
            Statement::Append { value, trusted } => {
                self.scan_append(value, *trusted, table, out)?
            }
            Statement::Modifier { path, params, hash } => {
                let name = single_name(path)
                    .ok_or_else(|| CompileError::UnknownModifier(path.join(".")))?;
                out.push(ScannedStatement::Modifier {
                    name: name.clone(),
                    params: params.clone(),
                    hash: hash.clone(),
                });
            }
            Statement::Block {
                path,
                params,
                hash,
                template,
                inverse,
            } => {
                let name = single_name(path)
                    .ok_or_else(|| CompileError::InvalidBlockName(path.join(".")))?
                    .clone();
                let default = self.child_ref(template, table)?;
                let inverse = self.child_ref(inverse, table)?;
                match self.ctx.layout_for(&name) {
                    Some(layout) => out.push(ScannedStatement::Component {
                        name,
                        layout,
                        params: params.clone(),
                        hash: hash.clone(),
                        shadow: None,
                        default,
                        inverse,
                    }),
                    None => out.push(ScannedStatement::Block {
                        name,
                        params: params.clone(),
                        hash: hash.clone(),
                        default,
                        inverse,
                    }),
                }
            }
            Statement::Component {
                tag,
                attrs,
                args,
                block,
            } => self.scan_component(tag, attrs, args, block, table, out)?,
            Statement::OpenElement { tag, .. } => {
                out.push(ScannedStatement::OpenElement(tag.clone()))
            }
            Statement::FlushElement => out.push(ScannedStatement::FlushElement),
            Statement::CloseElement => out.push(ScannedStatement::CloseElement),
            Statement::StaticAttr {
                name,
                value,
                namespace,
            } => out.push(ScannedStatement::StaticAttr {
                name: name.clone(),
                value: value.clone(),
                namespace: namespace.clone(),
            }),
            Statement::DynamicAttr {
                name,
                value,
                namespace,
                trusting,
            } => out.push(specialize_attr(name, value, namespace, *trusting)),
            Statement::StaticArg { name, .. } | Statement::DynamicArg { name, .. } => {
                return Err(CompileError::malformed(
                    "arg",
                    format!("{name} outside of a component invocation"),
                ));
            }
            Statement::Yield { to, params } => out.push(ScannedStatement::Yield {
                to: to.clone(),
                params: params.clone(),
            }),
        }
        Ok(())
    }

    fn scan_append(
        &mut self,
        value: &Expression,
        trusted: bool,
        table: TableId,
        out: &mut Vec<ScannedStatement>,
    ) -> Result<(), CompileError> {
        match value {
            Expression::Helper { path, params, .. } if is_named(path, "partial") => {
                let Some(name) = params.first() else {
                    return Err(CompileError::malformed("partial", "missing partial name"));
                };
                out.push(self.partial(name, table)?);
            }
            Expression::Helper { path, .. } | Expression::Unknown(path)
                if is_named(path, "debugger") =>
            {
                trace!("debugger statement compiled to a no-op");
                out.push(ScannedStatement::Debugger);
            }
            Expression::Helper { path, params, hash } => {
                if let Some(name) = single_name(path)
                    && let Some(layout) = self.ctx.layout_for(name)
                {
                    out.push(ScannedStatement::Component {
                        name: name.clone(),
                        layout,
                        params: params.clone(),
                        hash: hash.clone(),
                        shadow: None,
                        default: None,
                        inverse: None,
                    });
                    return Ok(());
                }
                out.push(ScannedStatement::Append {
                    value: value.clone(),
                    trusted,
                });
            }
            Expression::Unknown(path) => {
                if let Some(name) = single_name(path)
                    && !self.ctx.resolver.has_helper(name)
                    && let Some(layout) = self.ctx.layout_for(name)
                {
                    out.push(ScannedStatement::Component {
                        name: name.clone(),
                        layout,
                        params: vec![],
                        hash: Hash::default(),
                        shadow: None,
                        default: None,
                        inverse: None,
                    });
                    return Ok(());
                }
                out.push(ScannedStatement::Append {
                    value: value.clone(),
                    trusted,
                });
            }
            _ => out.push(ScannedStatement::Append {
                value: value.clone(),
                trusted,
            }),
        }
        Ok(())
    }

    /// `{{partial name}}`: resolved now for a literal name, otherwise at render time among
    /// every partial the resolver knows.
    fn partial(
        &mut self,
        name: &Expression,
        table: TableId,
    ) -> Result<ScannedStatement, CompileError> {
        if let Expression::Value(v) = name
            && let Some(literal) = v.as_str()
        {
            let block = self.ctx.partial_for(literal, table)?;
            return Ok(ScannedStatement::StaticPartial(block));
        }
        let names = self.ctx.resolver.partial_names();
        let mut blocks = Vec::with_capacity(names.len());
        for partial in &names {
            blocks.push(self.ctx.partial_for(partial, table)?);
        }
        Ok(ScannedStatement::DynamicPartial {
            name: name.clone(),
            names,
            blocks,
        })
    }

    fn scan_component(
        &mut self,
        tag: &ArcStr,
        attrs: &[Statement],
        args: &Hash,
        block: &SerializedBlock,
        table: TableId,
        out: &mut Vec<ScannedStatement>,
    ) -> Result<(), CompileError> {
        let Some(layout) = self.ctx.layout_for(tag) else {
            return self.scan_plain_element(tag, attrs, args, block, table, out);
        };

        let mut hash = Hash::default();
        for (name, value) in args.names.iter().zip(&args.values) {
            hash.names.push(strip_arg_sigil(name));
            hash.values.push(value.clone());
        }
        let mut shadow = vec![];
        for attr in attrs {
            match attr {
                Statement::StaticArg { name, value } | Statement::DynamicArg { name, value } => {
                    hash.names.push(strip_arg_sigil(name));
                    hash.values.push(value.clone());
                }
                other => shadow.push(other.clone()),
            }
        }
        let shadow = if shadow.is_empty() {
            None
        } else {
            let shadow_block = SerializedBlock {
                statements: shadow,
                locals: vec![],
            };
            Some(self.child_block(&shadow_block, table)?)
        };
        let default = if block.statements.is_empty() {
            None
        } else {
            Some(self.child_block(block, table)?)
        };
        out.push(ScannedStatement::Component {
            name: tag.clone(),
            layout,
            params: vec![],
            hash,
            shadow,
            default,
            inverse: None,
        });
        Ok(())
    }

    fn scan_plain_element(
        &mut self,
        tag: &ArcStr,
        attrs: &[Statement],
        args: &Hash,
        block: &SerializedBlock,
        table: TableId,
        out: &mut Vec<ScannedStatement>,
    ) -> Result<(), CompileError> {
        if !args.is_empty() {
            warn!(%tag, "arguments passed to an element that is not a component are ignored");
        }
        out.push(ScannedStatement::OpenElement(tag.clone()));
        for attr in attrs {
            match attr {
                Statement::StaticArg { name, .. } | Statement::DynamicArg { name, .. } => {
                    warn!(%tag, %name, "argument passed to an element that is not a component is ignored");
                }
                other => self.scan_statement(other, table, out)?,
            }
        }
        out.push(ScannedStatement::FlushElement);
        for statement in &block.statements {
            self.scan_statement(statement, table, out)?;
        }
        out.push(ScannedStatement::CloseElement);
        Ok(())
    }
}

fn is_named(path: &Path, name: &str) -> bool {
    single_name(path).is_some_and(|n| n.as_str() == name)
}

fn strip_arg_sigil(name: &ArcStr) -> ArcStr {
    match name.strip_prefix('@') {
        Some(stripped) => ArcStr::from(stripped),
        None => name.clone(),
    }
}

fn specialize_attr(
    name: &ArcStr,
    value: &Expression,
    namespace: &Option<ArcStr>,
    trusting: bool,
) -> ScannedStatement {
    match value {
        Expression::Value(v) if !trusting => ScannedStatement::StaticAttr {
            name: name.clone(),
            value: ArcStr::from(v.to_content_string()),
            namespace: namespace.clone(),
        },
        _ => ScannedStatement::DynamicAttr {
            name: name.clone(),
            value: value.clone(),
            namespace: namespace.clone(),
            trusting,
        },
    }
}
