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

//! Runtime binding storage. Scopes live in an arena and refer to each other by index, so the
//! caller back-links of component layouts never form reference cycles.

use crate::vm::args::EvaluatedArgs;
use ahash::AHashMap;
use arcstr::ArcStr;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use trellis_common::model::RenderError;
use trellis_common::reference::{Reference, ReferenceRc, Tag, const_ref};
use trellis_var::{Var, v_undefined};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl Display for ScopeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

/// What a symbol is bound to.
#[derive(Clone, Debug, Default)]
pub enum Slot {
    #[default]
    Unbound,
    Reference(ReferenceRc),
    /// A block handle, `None` when the invocation passed no such block.
    Block(Option<u32>),
    /// Every argument and block of a component invocation, for partials to look into.
    PartialArgs(Rc<EvaluatedArgs>),
}

#[derive(Clone, Debug)]
pub struct Scope {
    slots: Vec<Slot>,
    self_ref: ReferenceRc,
    /// For layouts, the scope of the invocation; yielded blocks run against it.
    caller: Option<ScopeId>,
}

impl Scope {
    pub fn get(&self, symbol: u32) -> Option<&Slot> {
        self.slots.get(symbol as usize)
    }

    /// The reference bound at `symbol`; unbound symbols read as `undefined`.
    pub fn reference(&self, symbol: u32) -> ReferenceRc {
        match self.get(symbol) {
            Some(Slot::Reference(r)) => r.clone(),
            _ => const_ref(v_undefined()),
        }
    }

    pub fn block(&self, symbol: u32) -> Option<u32> {
        match self.get(symbol) {
            Some(Slot::Block(block)) => *block,
            _ => None,
        }
    }

    pub fn partial_args(&self, symbol: u32) -> Option<&Rc<EvaluatedArgs>> {
        match self.get(symbol) {
            Some(Slot::PartialArgs(args)) => Some(args),
            _ => None,
        }
    }

    /// Symbols are allocated per program, so a block compiled after the scope was sized may
    /// bind past its end.
    pub fn bind(&mut self, symbol: u32, slot: Slot) {
        let index = symbol as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Slot::Unbound);
        }
        self.slots[index] = slot;
    }

    pub fn self_ref(&self) -> &ReferenceRc {
        &self.self_ref
    }

    pub fn caller(&self) -> Option<ScopeId> {
        self.caller
    }

    pub fn set_caller(&mut self, caller: ScopeId) {
        self.caller = Some(caller);
    }
}

#[derive(Default)]
pub struct ScopeArena {
    scopes: Vec<Option<Scope>>,
    free: Vec<u32>,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, scope: Scope) -> ScopeId {
        match self.free.pop() {
            Some(index) => {
                self.scopes[index as usize] = Some(scope);
                ScopeId(index)
            }
            None => {
                self.scopes.push(Some(scope));
                ScopeId((self.scopes.len() - 1) as u32)
            }
        }
    }

    pub fn root(&mut self, size: u32, self_ref: ReferenceRc) -> ScopeId {
        self.insert(Scope {
            slots: vec![Slot::Unbound; size as usize],
            self_ref,
            caller: None,
        })
    }

    /// A copy of `parent`: same bindings and caller, independently rebindable.
    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        let scope = self.get(parent).clone();
        self.insert(scope)
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        match self.scopes.get(id.0 as usize) {
            Some(Some(scope)) => scope,
            _ => panic!("bug: {id} was released"),
        }
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        match self.scopes.get_mut(id.0 as usize) {
            Some(Some(scope)) => scope,
            _ => panic!("bug: {id} was released"),
        }
    }

    pub fn release(&mut self, id: ScopeId) {
        if let Some(slot) = self.scopes.get_mut(id.0 as usize)
            && slot.take().is_some()
        {
            self.free.push(id.0);
        }
    }

    /// Scopes currently allocated.
    pub fn live(&self) -> usize {
        self.scopes.len() - self.free.len()
    }
}

/// Variables bound by `-with-dynamic-vars`, visible to everything rendered inside, including
/// component layouts. Copied on write, so a child scope never disturbs its parent.
#[derive(Clone, Debug, Default)]
pub struct DynamicScope {
    vars: Rc<AHashMap<ArcStr, ReferenceRc>>,
}

impl DynamicScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ReferenceRc> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: ArcStr, reference: ReferenceRc) {
        Rc::make_mut(&mut self.vars).insert(name, reference);
    }
}

/// `-get-dynamic-var`: the variable named by `name`, which may itself change.
pub(crate) struct DynamicVarReference {
    scope: DynamicScope,
    name: ReferenceRc,
}

impl DynamicVarReference {
    pub(crate) fn new(scope: DynamicScope, name: ReferenceRc) -> Self {
        Self { scope, name }
    }

    fn target(&self) -> Result<Option<ReferenceRc>, RenderError> {
        let name = self.name.value()?.to_content_string();
        Ok(self.scope.get(&name).cloned())
    }
}

impl Reference for DynamicVarReference {
    fn tag(&self) -> Tag {
        match self.target() {
            Ok(Some(var)) => Tag::combine([self.name.tag(), var.tag()]),
            _ => self.name.tag(),
        }
    }

    fn value(&self) -> Result<Var, RenderError> {
        match self.target()? {
            Some(var) => var.value(),
            None => Ok(v_undefined()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_common::reference::UpdatableReference;
    use trellis_var::{v_int, v_str};

    #[test]
    fn test_child_scope_is_a_copy() {
        let mut arena = ScopeArena::new();
        let root = arena.root(2, const_ref(v_undefined()));
        arena.get_mut(root).bind(0, Slot::Reference(const_ref(v_int(1))));
        let child = arena.child(root);
        arena
            .get_mut(child)
            .bind(0, Slot::Reference(const_ref(v_int(2))));
        arena.get_mut(child).bind(5, Slot::Block(Some(3)));

        assert_eq!(arena.get(root).reference(0).value().unwrap(), v_int(1));
        assert_eq!(arena.get(child).reference(0).value().unwrap(), v_int(2));
        assert_eq!(arena.get(child).block(5), Some(3));
        assert_eq!(arena.get(root).block(5), None);
        assert_eq!(arena.get(root).reference(7).value().unwrap(), v_undefined());
    }

    #[test]
    fn test_released_scopes_are_reused() {
        let mut arena = ScopeArena::new();
        let a = arena.root(0, const_ref(v_undefined()));
        let b = arena.child(a);
        assert_eq!(arena.live(), 2);
        arena.release(b);
        arena.release(b);
        assert_eq!(arena.live(), 1);
        let c = arena.child(a);
        assert_eq!(c, b);
    }

    #[test]
    #[should_panic(expected = "was released")]
    fn test_released_scope_access() {
        let mut arena = ScopeArena::new();
        let a = arena.root(0, const_ref(v_undefined()));
        arena.release(a);
        arena.get(a);
    }

    #[test]
    fn test_dynamic_scope_copy_on_write() {
        let mut outer = DynamicScope::new();
        outer.set("theme".into(), const_ref(v_str("dark")));
        let mut inner = outer.clone();
        inner.set("theme".into(), const_ref(v_str("light")));

        let name = const_ref(v_str("theme"));
        let from_outer = DynamicVarReference::new(outer, name.clone());
        let from_inner = DynamicVarReference::new(inner, name);
        assert_eq!(from_outer.value().unwrap(), v_str("dark"));
        assert_eq!(from_inner.value().unwrap(), v_str("light"));
    }

    #[test]
    fn test_dynamic_var_follows_variable() {
        let color = Rc::new(UpdatableReference::new(v_str("red")));
        let mut scope = DynamicScope::new();
        scope.set("color".into(), color.clone());
        let var = DynamicVarReference::new(scope, const_ref(v_str("color")));
        let snapshot = var.tag().value();
        color.update(v_str("blue"));
        assert!(!var.tag().validate(snapshot));
        assert_eq!(var.value().unwrap(), v_str("blue"));
    }
}
