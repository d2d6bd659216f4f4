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

//! Component and modifier managers: the host-side objects the VM drives through their lifecycle.

use crate::dom::{Bounds, DomChanges, NodeId};
use crate::vm::args::{EvaluatedArgs, NamedArgsReference};
use crate::vm::scope::DynamicScope;
use std::rc::Rc;
use trellis_common::model::RenderError;
use trellis_common::reference::{ReferenceRc, Tag};

/// A live component instance.
///
/// `did_create`, `did_update` and `destroy` are deferred to the transaction commit; the other
/// hooks run while the layout renders or re-renders.
pub trait Component {
    /// What `this` (`PushSelf`) resolves to inside the layout.
    fn self_reference(&self) -> ReferenceRc;

    /// Invalidation tag of component state the args do not cover.
    fn tag(&self) -> Tag {
        Tag::Constant
    }

    fn did_create_element(&self, _element: NodeId) {}

    fn did_render_layout(&self, _bounds: &Bounds) {}

    /// Called on re-render when the args or [`Component::tag`] changed.
    fn update(&self, _args: &EvaluatedArgs) -> Result<(), RenderError> {
        Ok(())
    }

    fn did_update_layout(&self, _bounds: &Bounds) {}

    fn did_create(&self) {}

    fn did_update(&self) {}

    fn destroy(&self) {}
}

pub trait ComponentManager {
    fn create(
        &self,
        args: &Rc<EvaluatedArgs>,
        dynamic_scope: &DynamicScope,
        has_default_block: bool,
    ) -> Result<Rc<dyn Component>, RenderError>;
}

/// A component whose `this` is the map of its named args and that has no state of its own.
#[derive(Default)]
pub struct BasicComponentManager;

struct BasicComponent {
    this: ReferenceRc,
}

impl Component for BasicComponent {
    fn self_reference(&self) -> ReferenceRc {
        self.this.clone()
    }
}

impl ComponentManager for BasicComponentManager {
    fn create(
        &self,
        args: &Rc<EvaluatedArgs>,
        _dynamic_scope: &DynamicScope,
        _has_default_block: bool,
    ) -> Result<Rc<dyn Component>, RenderError> {
        Ok(Rc::new(BasicComponent {
            this: Rc::new(NamedArgsReference::new(args.clone())),
        }))
    }
}

/// An element modifier instance.
pub trait Modifier {
    fn install(&self) {}

    fn update(&self) {}

    fn destroy(&self) {}
}

pub trait ModifierManager {
    fn create(
        &self,
        element: NodeId,
        args: Rc<EvaluatedArgs>,
        dom: &Rc<dyn DomChanges>,
    ) -> Result<Rc<dyn Modifier>, RenderError>;
}
