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

//! Compile-time name to slot mappings. Tables live in an arena; block tables point at their
//! lexical parent and allocate their slots out of the program table (entry point or layout)
//! they are nested in, so every symbol of one program is a distinct scope slot.

use ahash::AHashMap;
use arcstr::ArcStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableId(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TableKind {
    EntryPoint,
    Layout,
    Block,
}

#[derive(Debug)]
pub struct SymbolTable {
    kind: TableKind,
    parent: Option<TableId>,
    program: TableId,
    /// Block parameters, in declaration order.
    locals: Vec<(ArcStr, u32)>,
    named: AHashMap<ArcStr, u32>,
    yields: AHashMap<ArcStr, u32>,
    partial_args: Option<u32>,
    has_partials: bool,
    size: u32,
}

impl SymbolTable {
    fn new(kind: TableKind, parent: Option<TableId>, program: TableId) -> Self {
        Self {
            kind,
            parent,
            program,
            locals: vec![],
            named: AHashMap::new(),
            yields: AHashMap::new(),
            partial_args: None,
            has_partials: false,
            size: 0,
        }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn parent(&self) -> Option<TableId> {
        self.parent
    }
}

/// The yield every layout declares for the attributes of its invocation.
pub const ATTRS_BLOCK: &str = "%attrs%";

/// `else` names the same block as `inverse`.
fn canonical_yield(name: &str) -> &str {
    if name == "else" { "inverse" } else { name }
}

#[derive(Debug, Default)]
pub struct SymbolTables {
    tables: Vec<SymbolTable>,
}

impl SymbolTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, table: SymbolTable) -> TableId {
        self.tables.push(table);
        TableId((self.tables.len() - 1) as u32)
    }

    fn next_id(&self) -> TableId {
        TableId(self.tables.len() as u32)
    }

    pub fn table(&self, id: TableId) -> &SymbolTable {
        &self.tables[id.0 as usize]
    }

    fn table_mut(&mut self, id: TableId) -> &mut SymbolTable {
        &mut self.tables[id.0 as usize]
    }

    fn allocate(&mut self, program: TableId) -> u32 {
        let table = self.table_mut(program);
        let symbol = table.size;
        table.size += 1;
        symbol
    }

    pub fn entry_point(&mut self) -> TableId {
        let id = self.next_id();
        self.push(SymbolTable::new(TableKind::EntryPoint, None, id))
    }

    pub fn layout(&mut self, named: &[ArcStr], yields: &[ArcStr], has_partials: bool) -> TableId {
        let id = self.next_id();
        self.push(SymbolTable::new(TableKind::Layout, None, id));
        for name in named {
            let symbol = self.allocate(id);
            self.table_mut(id).named.insert(name.clone(), symbol);
        }
        let attrs = ArcStr::from(ATTRS_BLOCK);
        for name in yields.iter().chain(std::iter::once(&attrs)) {
            let name = ArcStr::from(canonical_yield(name));
            if self.table(id).yields.contains_key(&name) {
                continue;
            }
            let symbol = self.allocate(id);
            self.table_mut(id).yields.insert(name, symbol);
        }
        if has_partials {
            let symbol = self.allocate(id);
            let table = self.table_mut(id);
            table.partial_args = Some(symbol);
            table.has_partials = true;
        }
        id
    }

    pub fn block(&mut self, parent: TableId, locals: &[ArcStr]) -> TableId {
        let program = self.table(parent).program;
        let id = self.push(SymbolTable::new(TableKind::Block, Some(parent), program));
        for name in locals {
            let symbol = self.allocate(program);
            self.table_mut(id).locals.push((name.clone(), symbol));
        }
        id
    }

    /// Resolve a block parameter, walking out through enclosing blocks.
    pub fn get_local(&self, id: TableId, name: &str) -> Option<u32> {
        let mut current = Some(id);
        while let Some(table_id) = current {
            let table = self.table(table_id);
            if let Some((_, symbol)) = table.locals.iter().find(|(n, _)| n.as_str() == name) {
                return Some(*symbol);
            }
            current = table.parent;
        }
        None
    }

    pub fn get_named(&self, id: TableId, name: &str) -> Option<u32> {
        self.program_table(id).named.get(name).copied()
    }

    pub fn get_yield(&self, id: TableId, name: &str) -> Option<u32> {
        self.program_table(id).yields.get(canonical_yield(name)).copied()
    }

    pub fn get_partial_args(&self, id: TableId) -> Option<u32> {
        self.program_table(id).partial_args
    }

    pub fn has_partials(&self, id: TableId) -> bool {
        self.program_table(id).has_partials
    }

    /// Slots needed by the scope of the program the table belongs to.
    pub fn size(&self, id: TableId) -> u32 {
        self.program_table(id).size
    }

    pub fn program_kind(&self, id: TableId) -> TableKind {
        self.program_table(id).kind
    }

    /// The symbols of this table's own block parameters, in order.
    pub fn local_symbols(&self, id: TableId) -> Vec<u32> {
        self.table(id).locals.iter().map(|(_, s)| *s).collect()
    }

    /// Named arguments of a layout, as (name, symbol) sorted by symbol.
    pub fn named_symbols(&self, id: TableId) -> Vec<(ArcStr, u32)> {
        let mut named: Vec<_> = self
            .program_table(id)
            .named
            .iter()
            .map(|(n, s)| (n.clone(), *s))
            .collect();
        named.sort_by_key(|(_, s)| *s);
        named
    }

    /// Yielded block names of a layout, as (name, symbol) sorted by symbol.
    pub fn yield_symbols(&self, id: TableId) -> Vec<(ArcStr, u32)> {
        let mut yields: Vec<_> = self
            .program_table(id)
            .yields
            .iter()
            .map(|(n, s)| (n.clone(), *s))
            .collect();
        yields.sort_by_key(|(_, s)| *s);
        yields
    }

    fn program_table(&self, id: TableId) -> &SymbolTable {
        self.table(self.table(id).program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(n: &[&str]) -> Vec<ArcStr> {
        n.iter().map(|s| ArcStr::from(*s)).collect()
    }

    #[test]
    fn test_block_locals_walk_parents() {
        let mut tables = SymbolTables::new();
        let entry = tables.entry_point();
        let outer = tables.block(entry, &names(&["item", "index"]));
        let inner = tables.block(outer, &names(&["item"]));

        assert_eq!(tables.get_local(outer, "item"), Some(0));
        assert_eq!(tables.get_local(inner, "item"), Some(2));
        assert_eq!(tables.get_local(inner, "index"), Some(1));
        assert_eq!(tables.get_local(entry, "item"), None);
        assert_eq!(tables.size(inner), 3);
        assert_eq!(tables.local_symbols(outer), vec![0, 1]);
    }

    #[test]
    fn test_layout_declares_attrs_and_partial_args() {
        let mut tables = SymbolTables::new();
        let layout = tables.layout(&names(&["@title"]), &names(&["default"]), true);
        assert_eq!(tables.get_named(layout, "@title"), Some(0));
        assert_eq!(tables.get_yield(layout, "default"), Some(1));
        assert_eq!(tables.get_yield(layout, ATTRS_BLOCK), Some(2));
        assert_eq!(tables.get_partial_args(layout), Some(3));

        let block = tables.block(layout, &names(&["x"]));
        assert_eq!(tables.get_named(block, "@title"), Some(0));
        assert_eq!(tables.get_local(block, "x"), Some(4));
        assert_eq!(tables.program_kind(block), TableKind::Layout);
    }

    #[test]
    fn test_else_is_inverse() {
        let mut tables = SymbolTables::new();
        let layout = tables.layout(&[], &names(&["default", "else", "inverse"]), false);
        assert_eq!(tables.get_yield(layout, "inverse"), Some(1));
        assert_eq!(tables.get_yield(layout, "else"), Some(1));
        assert_eq!(tables.get_yield(layout, ATTRS_BLOCK), Some(2));
    }
}
