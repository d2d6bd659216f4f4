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

//! The frame stack. Each block invocation runs in a frame over its compiled slice; a frame's
//! saved registers can be captured and later restored so a region re-renders from its start.

use crate::dom::BlockBounds;
use crate::environment::ComponentDefinition;
use crate::vm::args::EvaluatedArgs;
use crate::vm::component::Component;
use crate::vm::scope::ScopeId;
use arcstr::ArcStr;
use std::rc::Rc;
use trellis_common::model::RenderError;
use trellis_common::reference::{ReferenceIterator, ReferenceRc};
use trellis_var::program::Slice;

/// Registers that survive a capture.
#[derive(Clone, Debug, Default)]
pub(crate) struct SavedRegisters {
    pub(crate) operand: Option<ReferenceRc>,
    pub(crate) args: Rc<EvaluatedArgs>,
    pub(crate) condition: Option<ReferenceRc>,
}

/// Registers that only live as long as the instructions that use them; never captured.
#[derive(Default)]
pub(crate) struct VolatileRegisters {
    pub(crate) iterator: Option<ReferenceIterator>,
    /// Key of the item `NextIter` advanced to.
    pub(crate) key: Option<ArcStr>,
    /// In a layout frame, the component it renders and the block it renders into.
    pub(crate) component: Option<(Rc<dyn Component>, Rc<BlockBounds>)>,
    /// Set by `PutComponent`: the definition and its layout block.
    pub(crate) definition: Option<(Rc<ComponentDefinition>, u32)>,
    pub(crate) partial: Option<u32>,
    pub(crate) caller_scope: Option<ScopeId>,
}

pub(crate) struct Frame {
    pub(crate) ip: usize,
    pub(crate) slice: Slice,
    pub(crate) saved: SavedRegisters,
    pub(crate) volatile: VolatileRegisters,
    pub(crate) locals: Vec<Option<ReferenceRc>>,
    /// Heights of the VM's scope and dynamic scope stacks below this frame; restored on pop.
    pub(crate) scope_depth: usize,
    pub(crate) dynamic_depth: usize,
}

impl Frame {
    pub(crate) fn new(slice: Slice, saved: SavedRegisters) -> Self {
        Self {
            ip: slice.start,
            slice,
            saved,
            volatile: VolatileRegisters::default(),
            locals: vec![],
            scope_depth: 0,
            dynamic_depth: 0,
        }
    }

    /// Continue at `target`, which must lie in the frame's slice. Its end is allowed and returns
    /// from the frame.
    pub(crate) fn goto(&mut self, target: usize) {
        if target < self.slice.start || target > self.slice.end {
            panic!(
                "bug: goto {target} outside {}..{}",
                self.slice.start, self.slice.end
            );
        }
        self.ip = target;
    }

    pub(crate) fn is_done(&self) -> bool {
        self.ip >= self.slice.end
    }
}

/// What a region needs to run its slice again later.
#[derive(Clone, Debug, Default)]
pub(crate) struct CapturedFrame {
    pub(crate) saved: SavedRegisters,
    pub(crate) locals: Vec<Option<ReferenceRc>>,
}

pub(crate) struct FrameStack {
    frames: Vec<Frame>,
    max_depth: usize,
    pub(crate) pushes: usize,
    pub(crate) pops: usize,
}

impl FrameStack {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            frames: vec![],
            max_depth,
            pushes: 0,
            pops: 0,
        }
    }

    pub(crate) fn push(&mut self, frame: Frame) -> Result<(), RenderError> {
        if self.frames.len() >= self.max_depth {
            return Err(RenderError::StackOverflow {
                depth: self.frames.len(),
            });
        }
        self.frames.push(frame);
        self.pushes += 1;
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        let frame = self.frames.pop()?;
        self.pops += 1;
        Some(frame)
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub(crate) fn current_mut(&mut self) -> &mut Frame {
        self.frames
            .last_mut()
            .unwrap_or_else(|| panic!("bug: no current frame"))
    }

    pub(crate) fn capture(&self) -> CapturedFrame {
        match self.frames.last() {
            Some(frame) => CapturedFrame {
                saved: frame.saved.clone(),
                locals: frame.locals.clone(),
            },
            None => CapturedFrame::default(),
        }
    }
}
