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

use crate::dom::NodeId;
use crate::environment::Environment;
use crate::vm::append::AppendVm;
use crate::vm::frame::CapturedFrame;
use crate::vm::scope::{DynamicScope, ScopeArena};
use crate::vm::update::{CapturedState, TryRegion};
use crate::vm::{RenderState, RenderStats};
use std::rc::Rc;
use tracing::debug;
use trellis_common::model::RenderError;
use trellis_common::reference::ReferenceRc;
use trellis_compiler::CompiledProgram;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RerenderOptions {
    /// Evaluate every component's cache group even when its tags say nothing changed.
    pub always_revalidate: bool,
}

/// Render the block `entry` of `program` into `parent`, in front of `next_sibling`, with
/// `self_ref` as the template's `this`.
///
/// The render runs in its own transaction: lifecycle hooks fire once every node is in place, and
/// a failed render leaves neither nodes nor queued hooks behind.
pub fn render(
    env: Rc<Environment>,
    program: Rc<CompiledProgram>,
    entry: u32,
    self_ref: ReferenceRc,
    parent: NodeId,
    next_sibling: Option<NodeId>,
) -> Result<RenderResult, RenderError> {
    let block = program.block(entry).clone();
    let mut state = RenderState {
        env: env.clone(),
        program: program.clone(),
        scopes: ScopeArena::new(),
        stats: RenderStats::default(),
        always_revalidate: false,
    };
    let scope = state
        .scopes
        .root(program.tables.size(block.table), self_ref);
    let captured = CapturedState {
        frame: CapturedFrame::default(),
        scope,
        dynamic: DynamicScope::new(),
    };

    env.begin()?;
    match AppendVm::resume(&mut state, &captured, block.slice, parent, next_sibling) {
        Ok((bounds, content)) => {
            env.commit()?;
            debug!(
                opcodes = state.stats.opcodes,
                scopes = state.scopes.live(),
                "initial render complete"
            );
            Ok(RenderResult {
                state,
                root: Some(TryRegion {
                    slice: block.slice,
                    state: captured,
                    bounds,
                    content,
                }),
            })
        }
        Err(e) => {
            env.rollback();
            state.scopes.release(scope);
            Err(e)
        }
    }
}

/// A rendered template, kept alive so that it can be brought up to date with its inputs.
pub struct RenderResult {
    state: RenderState,
    root: Option<TryRegion>,
}

impl RenderResult {
    /// Bring the output up to date with every reference that changed since the last render.
    ///
    /// Hooks of the regions that did update are committed even when another region fails; the
    /// failing region keeps its previous output.
    pub fn rerender(&mut self, options: RerenderOptions) -> Result<(), RenderError> {
        let env = self.state.env.clone();
        if self.root.is_none() {
            return Err(RenderError::Destroyed);
        }
        env.begin()?;
        self.state.always_revalidate = options.always_revalidate;
        let result = match self.root.as_mut() {
            Some(root) => root.evaluate(&mut self.state),
            None => Err(RenderError::Destroyed),
        };
        self.state.always_revalidate = false;
        env.commit()?;
        result
    }

    /// Throw away the whole output and render it again from the start, e.g. after the embedder
    /// handled a failure that left some region stale.
    pub fn handle_exception(&mut self) -> Result<(), RenderError> {
        let env = self.state.env.clone();
        if self.root.is_none() {
            return Err(RenderError::Destroyed);
        }
        env.begin()?;
        let result = match self.root.as_mut() {
            Some(root) => root.rerender(&mut self.state),
            None => Err(RenderError::Destroyed),
        };
        env.commit()?;
        result
    }

    /// Remove the output and run every destructor. A destroyed result can not be rendered again.
    pub fn destroy(&mut self) -> Result<(), RenderError> {
        let root = self.root.take().ok_or(RenderError::Destroyed)?;
        let env = self.state.env.clone();
        env.begin()?;
        let scope = root.state.scope;
        let result = root.remove(&mut self.state);
        self.state.scopes.release(scope);
        env.commit()?;
        result
    }

    pub fn is_destroyed(&self) -> bool {
        self.root.is_none()
    }

    pub fn parent_element(&self) -> Option<NodeId> {
        self.root.as_ref().map(|root| root.bounds.parent())
    }

    pub fn first_node(&self) -> Option<NodeId> {
        self.root.as_ref().and_then(|root| root.bounds.first_node())
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.root.as_ref().and_then(|root| root.bounds.last_node())
    }

    /// The updating opcodes, one line each, indented by region nesting.
    pub fn opcodes(&self) -> Vec<String> {
        let mut out = vec![];
        if let Some(root) = &self.root {
            root.content.describe(0, &mut out);
        }
        out
    }

    pub fn stats(&self) -> &RenderStats {
        &self.state.stats
    }

    /// Scopes still allocated. Zero once the result is destroyed.
    pub fn live_scopes(&self) -> usize {
        self.state.scopes.live()
    }

    pub fn environment(&self) -> &Rc<Environment> {
        &self.state.env
    }
}
