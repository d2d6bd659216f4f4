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

// Core modules
mod builder;
mod constants;
mod labels;
mod scanner;
mod statements;
mod symbol_table;
mod wire;


pub use crate::builder::{CompiledBlock, OpcodeBuilder};
pub use crate::constants::{BlockSource, Constants, Function, TestKind};
pub use crate::labels::{LabelName, Labels};
pub use crate::scanner::{ScannedBlock, ScannedStatement};
pub use crate::symbol_table::{ATTRS_BLOCK, SymbolTable, SymbolTables, TableId, TableKind};
pub use crate::wire::{
    BlockRef, Expression, Hash, Path, SerializedBlock, SerializedTemplate, Statement,
    parse_expression, parse_statement,
};

use crate::scanner::Scanner;
use ahash::AHashMap;
use arcstr::ArcStr;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use trellis_common::model::CompileError;
use trellis_var::program::{Op, Program};

/// What the compiler needs to know about the names a template refers to.
pub trait Resolver {
    fn has_helper(&self, name: &str) -> bool;
    fn has_modifier(&self, name: &str) -> bool;
    /// The layout of the component registered under `name`, if any.
    fn component_layout(&self, name: &str) -> Option<Arc<SerializedTemplate>>;
    fn lookup_partial(&self, name: &str) -> Option<Arc<SerializedTemplate>>;
    /// Every partial name, for partials whose name is only known at render time.
    fn partial_names(&self) -> Vec<ArcStr>;
}

/// Mutable state shared by every block of one compilation.
pub(crate) struct CompileContext {
    pub(crate) program: Program,
    pub(crate) constants: Constants,
    pub(crate) tables: SymbolTables,
    pub(crate) resolver: Rc<dyn Resolver>,
    pending: VecDeque<u32>,
    layouts: AHashMap<ArcStr, Option<u32>>,
    partials: AHashMap<(ArcStr, TableId), u32>,
}

impl CompileContext {
    pub(crate) fn new(resolver: Rc<dyn Resolver>) -> Self {
        Self {
            program: Program::new(),
            constants: Constants::new(),
            tables: SymbolTables::new(),
            resolver,
            pending: VecDeque::new(),
            layouts: AHashMap::new(),
            partials: AHashMap::new(),
        }
    }

    /// Register a block and queue it for code generation.
    pub(crate) fn enqueue(&mut self, source: BlockSource) -> u32 {
        let handle = self.constants.block(source);
        self.pending.push_back(handle);
        handle
    }

    /// The layout block of a component, compiled once per component name.
    pub(crate) fn layout_for(&mut self, name: &str) -> Option<u32> {
        if let Some(cached) = self.layouts.get(name) {
            return *cached;
        }
        let handle = self.resolver.component_layout(name).map(|template| {
            self.enqueue(BlockSource::Layout {
                name: ArcStr::from(name),
                template,
            })
        });
        self.layouts.insert(ArcStr::from(name), handle);
        handle
    }

    /// A partial compiled against the symbol table of its call site.
    pub(crate) fn partial_for(&mut self, name: &str, table: TableId) -> Result<u32, CompileError> {
        let key = (ArcStr::from(name), table);
        if let Some(handle) = self.partials.get(&key) {
            return Ok(*handle);
        }
        let template = self
            .resolver
            .lookup_partial(name)
            .ok_or_else(|| CompileError::UnknownPartial(name.to_string()))?;
        let handle = self.enqueue(BlockSource::Partial {
            name: key.0.clone(),
            template,
            table,
        });
        self.partials.insert(key, handle);
        Ok(handle)
    }

    fn compile_source(&mut self, source: BlockSource) -> Result<CompiledBlock, CompileError> {
        match source {
            BlockSource::Entry(template) => {
                let entry = self.tables.entry_point();
                let table = if template.block.locals.is_empty() {
                    entry
                } else {
                    self.tables.block(entry, &template.block.locals)
                };
                let mut scanner = Scanner::new(self, &template);
                let prelude = match &template.prelude {
                    Some(prelude) => Some(scanner.scan_statements(prelude, table)?),
                    None => None,
                };
                let body = scanner.scan_block(&template.block, table)?;
                debug!(module = template.module_name(), "compiling entry point");

                let mut b = OpcodeBuilder::new(self, table);
                b.bind_params(&body.params);
                if let Some(prelude) = &prelude {
                    b.statements(prelude)?;
                    b.push0(Op::FlushElement);
                }
                b.statements(&body.statements)?;
                if prelude.is_some() {
                    b.push0(Op::CloseElement);
                }
                Ok(b.to_slice(body.params))
            }
            BlockSource::Inline(scanned) => {
                let mut b = OpcodeBuilder::new(self, scanned.table);
                b.bind_params(&scanned.params);
                b.statements(&scanned.statements)?;
                Ok(b.to_slice(scanned.params))
            }
            BlockSource::Layout { name, template } => {
                debug!(%name, "compiling component layout");
                let table =
                    self.tables
                        .layout(&template.named, &template.yields, template.has_partials);
                let mut scanner = Scanner::new(self, &template);
                let prelude = match &template.prelude {
                    Some(prelude) => Some(scanner.scan_statements(prelude, table)?),
                    None => None,
                };
                let body = scanner.scan_statements(&template.block.statements, table)?;

                let mut b = OpcodeBuilder::new(self, table);
                b.layout(prelude.as_deref(), &body)?;
                Ok(b.to_slice(vec![]))
            }
            BlockSource::Partial {
                name,
                template,
                table,
            } => {
                debug!(%name, "compiling partial");
                let body =
                    Scanner::new(self, &template).scan_statements(&template.block.statements, table)?;
                let mut b = OpcodeBuilder::new(self, table);
                b.statements(&body)?;
                Ok(b.to_slice(vec![]))
            }
        }
    }

    /// Generate code for every queued block, including those queued along the way.
    fn drain(&mut self) -> Result<(), CompileError> {
        while let Some(handle) = self.pending.pop_front() {
            let Some(source) = self.constants.take_block_source(handle) else {
                continue;
            };
            let compiled = self.compile_source(source)?;
            self.constants.set_compiled(handle, compiled);
        }
        Ok(())
    }
}

/// A finished compilation: the program, its constant pool and its symbol tables.
///
/// Immutable once built; any number of renders may execute it.
#[derive(Debug)]
pub struct CompiledProgram {
    pub program: Program,
    pub constants: Constants,
    pub tables: SymbolTables,
    entries: Vec<u32>,
}

impl CompiledProgram {
    /// The block handle of the first entry point. Panics when nothing was added with
    /// [`Compiler::add_entry_point`].
    pub fn entry(&self) -> u32 {
        *self
            .entries
            .first()
            .unwrap_or_else(|| panic!("bug: program finished without an entry point"))
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn block(&self, handle: u32) -> &CompiledBlock {
        self.constants.get_block(handle)
    }
}

/// Compiles templates into one shared program.
///
/// A compiler that returned an error has a partially written program and should be discarded.
pub struct Compiler {
    ctx: CompileContext,
    entries: Vec<u32>,
}

impl Compiler {
    pub fn new(resolver: Rc<dyn Resolver>) -> Self {
        Self {
            ctx: CompileContext::new(resolver),
            entries: vec![],
        }
    }

    /// Compile a template and everything it reaches (blocks, layouts, partials). Returns the
    /// entry point's block handle.
    pub fn add_entry_point(
        &mut self,
        template: Arc<SerializedTemplate>,
    ) -> Result<u32, CompileError> {
        let handle = self.ctx.enqueue(BlockSource::Entry(template));
        self.ctx.drain()?;
        self.entries.push(handle);
        Ok(handle)
    }

    pub fn finish(self) -> CompiledProgram {
        debug!(
            opcodes = self.ctx.program.len(),
            blocks = self.ctx.constants.block_count(),
            "compilation finished"
        );
        CompiledProgram {
            program: self.ctx.program,
            constants: self.ctx.constants,
            tables: self.ctx.tables,
            entries: self.entries,
        }
    }
}

/// Compile a single template.
pub fn compile_template(
    template: Arc<SerializedTemplate>,
    resolver: Rc<dyn Resolver>,
) -> Result<CompiledProgram, CompileError> {
    let mut compiler = Compiler::new(resolver);
    compiler.add_entry_point(template)?;
    Ok(compiler.finish())
}
