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

//! The template virtual machine.
//!
//! An initial render runs the append VM over a compiled program. Whatever it appends that
//! depends on a reference that can change is recorded as an updating opcode in the region that
//! produced it, and a rerender walks those regions instead of the program.

mod append;
mod args;
mod component;
mod frame;
mod render_result;
mod scope;
mod update;

#[cfg(test)]
mod vm_test;

use crate::environment::Environment;
use scope::ScopeArena;
use std::rc::Rc;
use trellis_compiler::CompiledProgram;

pub use args::{EvaluatedArgs, NamedArgsReference};
pub use component::{BasicComponentManager, Component, ComponentManager, Modifier, ModifierManager};
pub use render_result::{RenderResult, RerenderOptions, render};
pub use scope::DynamicScope;

/// Counters kept across the whole life of a render result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frame_pushes: usize,
    pub frame_pops: usize,
    pub opcodes: usize,
}

/// What every region of one render shares.
pub(crate) struct RenderState {
    pub(crate) env: Rc<Environment>,
    pub(crate) program: Rc<CompiledProgram>,
    pub(crate) scopes: ScopeArena,
    pub(crate) stats: RenderStats,
    /// Re-evaluate every cache group regardless of its tags.
    pub(crate) always_revalidate: bool,
}
