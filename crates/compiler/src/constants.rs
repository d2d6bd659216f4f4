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

//! The constant pool: everything an opcode operand refers to by handle.
//!
//! Handles are per-kind and 1-based, so operand `0` always means "absent". The pool is filled
//! during compilation and read-only afterwards.

use crate::builder::CompiledBlock;
use crate::scanner::ScannedBlock;
use crate::symbol_table::TableId;
use crate::wire::SerializedTemplate;
use ahash::AHashMap;
use arcstr::ArcStr;
use std::sync::Arc;
use strum::Display;
use trellis_var::Var;
use trellis_var::program::Slice;

/// How `Test` turns the operand into a condition.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum TestKind {
    /// The operand is a literal; the condition is computed once.
    Const,
    /// Plain boolean conversion.
    Simple,
    /// The environment's truthiness policy.
    Environment,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Function {
    Test(TestKind),
}

/// Where a block's code comes from before it is compiled.
#[derive(Debug)]
pub enum BlockSource {
    /// A top-level template, rendered directly.
    Entry(Arc<SerializedTemplate>),
    Inline(ScannedBlock),
    Layout {
        name: ArcStr,
        template: Arc<SerializedTemplate>,
    },
    Partial {
        name: ArcStr,
        template: Arc<SerializedTemplate>,
        table: TableId,
    },
}

#[derive(Debug)]
pub struct BlockEntry {
    source: Option<BlockSource>,
    compiled: Option<CompiledBlock>,
}

#[derive(Debug, Default)]
pub struct Constants {
    strings: Vec<ArcStr>,
    string_handles: AHashMap<ArcStr, u32>,
    arrays: Vec<Vec<u32>>,
    blocks: Vec<BlockEntry>,
    functions: Vec<Function>,
    values: Vec<Var>,
    slices: Vec<Slice>,
}

fn handle(len: usize) -> u32 {
    len as u32
}

fn index(handle: u32, kind: &str) -> usize {
    assert_ne!(handle, 0, "bug: absent {kind} handle dereferenced");
    (handle - 1) as usize
}

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string.
    pub fn string(&mut self, s: &str) -> u32 {
        if let Some(h) = self.string_handles.get(s) {
            return *h;
        }
        let s = ArcStr::from(s);
        self.strings.push(s.clone());
        let h = handle(self.strings.len());
        self.string_handles.insert(s, h);
        h
    }

    /// The handle of an already interned string, or `0`.
    pub fn string_handle(&self, s: &str) -> u32 {
        self.string_handles.get(s).copied().unwrap_or(0)
    }

    pub fn get_string(&self, handle: u32) -> &ArcStr {
        &self.strings[index(handle, "string")]
    }

    pub fn array(&mut self, values: Vec<u32>) -> u32 {
        self.arrays.push(values);
        handle(self.arrays.len())
    }

    pub fn get_array(&self, handle: u32) -> &[u32] {
        &self.arrays[index(handle, "array")]
    }

    /// An array of interned strings.
    pub fn string_array<S: AsRef<str>>(&mut self, strings: &[S]) -> u32 {
        let handles = strings.iter().map(|s| self.string(s.as_ref())).collect();
        self.array(handles)
    }

    pub fn get_string_array(&self, handle: u32) -> Vec<ArcStr> {
        if handle == 0 {
            return vec![];
        }
        self.get_array(handle)
            .iter()
            .map(|h| self.get_string(*h).clone())
            .collect()
    }

    pub fn block(&mut self, source: BlockSource) -> u32 {
        self.blocks.push(BlockEntry {
            source: Some(source),
            compiled: None,
        });
        handle(self.blocks.len())
    }

    pub(crate) fn take_block_source(&mut self, handle: u32) -> Option<BlockSource> {
        self.blocks[index(handle, "block")].source.take()
    }

    pub(crate) fn set_compiled(&mut self, handle: u32, compiled: CompiledBlock) {
        self.blocks[index(handle, "block")].compiled = Some(compiled);
    }

    pub fn is_compiled(&self, handle: u32) -> bool {
        self.blocks[index(handle, "block")].compiled.is_some()
    }

    /// The compiled form of a block. Every block is compiled before the pool is handed to a VM.
    pub fn get_block(&self, handle: u32) -> &CompiledBlock {
        self.blocks[index(handle, "block")]
            .compiled
            .as_ref()
            .unwrap_or_else(|| panic!("bug: block {handle} was never compiled"))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn function(&mut self, function: Function) -> u32 {
        if let Some(i) = self.functions.iter().position(|f| *f == function) {
            return handle(i + 1);
        }
        self.functions.push(function);
        handle(self.functions.len())
    }

    pub fn get_function(&self, handle: u32) -> Function {
        self.functions[index(handle, "function")]
    }

    pub fn value(&mut self, value: Var) -> u32 {
        self.values.push(value);
        handle(self.values.len())
    }

    pub fn get_value(&self, handle: u32) -> &Var {
        &self.values[index(handle, "value")]
    }

    pub fn slice(&mut self, slice: Slice) -> u32 {
        self.slices.push(slice);
        handle(self.slices.len())
    }

    pub fn get_slice(&self, handle: u32) -> Slice {
        self.slices[index(handle, "slice")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_var::v_float;

    #[test]
    fn test_handles_are_one_based_and_interned() {
        let mut constants = Constants::new();
        let a = constants.string("a");
        let b = constants.string("b");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(constants.string("a"), a);
        assert_eq!(constants.get_string(b).as_str(), "b");

        let arr = constants.string_array(&["b", "c"]);
        assert_eq!(
            constants.get_string_array(arr),
            vec![ArcStr::from("b"), ArcStr::from("c")]
        );
        assert!(constants.get_string_array(0).is_empty());

        let v = constants.value(v_float(2.5));
        assert_eq!(constants.get_value(v), &v_float(2.5));
        let s = constants.slice(Slice::new(4, 9));
        assert_eq!(constants.get_slice(s), Slice::new(4, 9));
        let f = constants.function(Function::Test(TestKind::Simple));
        assert_eq!(constants.function(Function::Test(TestKind::Simple)), f);
    }

    #[test]
    #[should_panic(expected = "absent string handle")]
    fn test_absent_handle() {
        Constants::new().get_string(0);
    }
}
