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

//! The updating VM: the record of what an initial render made dynamic, and the regions that
//! re-render when it changes.
//!
//! Every region keeps a flat list of updating opcodes. Nested regions appear in that list as a
//! single [`UpdatingOp::Try`] or [`UpdatingOp::List`], so one rerender is a depth-first walk in
//! emission order.

use crate::dom::{BlockBounds, Bounds, DomChanges, ListBounds, NodeId, clear, move_before};
use crate::environment::Destroyable;
use crate::vm::append::AppendVm;
use crate::vm::args::EvaluatedArgs;
use crate::vm::component::{Component, Modifier};
use crate::vm::frame::CapturedFrame;
use crate::vm::scope::{DynamicScope, ScopeArena, ScopeId};
use crate::vm::RenderState;
use arcstr::ArcStr;
use indexmap::IndexMap;
use std::rc::Rc;
use strum::IntoStaticStr;
use tracing::{debug, trace, warn};
use trellis_common::model::RenderError;
use trellis_common::reference::{
    IterationArtifacts, IteratorSynchronizer, ListItemRefs, ReferenceCache, ReferenceRc,
    Revision, SyncTarget, Tag, current_revision,
};
use trellis_var::program::Slice;
use trellis_var::{Var, Variant};

/// Everything needed to run a region's slice again: the frame registers and locals, the scope
/// and the dynamic scope it started with.
#[derive(Clone)]
pub(crate) struct CapturedState {
    pub(crate) frame: CapturedFrame,
    pub(crate) scope: ScopeId,
    pub(crate) dynamic: DynamicScope,
}

#[derive(IntoStaticStr)]
pub(crate) enum UpdatingOp {
    UpdateText {
        node: NodeId,
        cache: ReferenceCache,
    },
    UpdateRaw {
        bounds: Rc<BlockBounds>,
        cache: ReferenceCache,
    },
    UpdateAttr {
        element: NodeId,
        name: ArcStr,
        namespace: Option<ArcStr>,
        cache: ReferenceCache,
    },
    /// The condition a branch was taken on. Throws to the enclosing region when it flips.
    Assert {
        cache: ReferenceCache,
    },
    UpdateComponent {
        component: Rc<dyn Component>,
        args: Rc<EvaluatedArgs>,
        last: Revision,
    },
    DidUpdateLayout {
        component: Rc<dyn Component>,
        bounds: Rc<BlockBounds>,
    },
    UpdateModifier {
        modifier: Rc<dyn Modifier>,
        args: Rc<EvaluatedArgs>,
        last: Revision,
    },
    /// The next `len` ops are skipped while none of their tags moved past `last`.
    CacheGroup {
        len: usize,
        last: Revision,
    },
    Try(Box<TryRegion>),
    List(Box<ListRegion>),
}

/// Result of walking a list of updating ops.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// The enclosing region's output no longer matches its inputs and must be rendered again.
    Throw,
}

/// A failure on the way out of a walk. `Raised` came from an op of the region being walked,
/// `Propagated` from a nested region that already had its chance to recover.
#[derive(Debug)]
pub(crate) enum Unwind {
    Raised(RenderError),
    Propagated(RenderError),
}

impl Unwind {
    pub(crate) fn into_error(self) -> RenderError {
        match self {
            Unwind::Raised(e) | Unwind::Propagated(e) => e,
        }
    }
}

fn attr_value(value: &Var) -> Option<String> {
    match value.variant() {
        Variant::Undefined | Variant::Null | Variant::Bool(false) => None,
        Variant::Bool(true) => Some(String::new()),
        _ => Some(value.to_content_string()),
    }
}

/// Set or remove `name` on `element` for an attribute value.
pub(crate) fn apply_attr(
    dom: &dyn DomChanges,
    element: NodeId,
    name: &str,
    namespace: Option<&str>,
    value: &Var,
) {
    match attr_value(value) {
        Some(v) => dom.set_attribute(element, name, &v, namespace),
        None => dom.remove_attribute(element, name, namespace),
    }
}

impl UpdatingOp {
    pub(crate) fn tag(&self) -> Tag {
        match self {
            UpdatingOp::UpdateText { cache, .. }
            | UpdatingOp::UpdateRaw { cache, .. }
            | UpdatingOp::UpdateAttr { cache, .. }
            | UpdatingOp::Assert { cache } => cache.tag(),
            UpdatingOp::UpdateComponent {
                component, args, ..
            } => Tag::combine([args.tag(), component.tag()]),
            UpdatingOp::UpdateModifier { args, .. } => args.tag(),
            UpdatingOp::DidUpdateLayout { .. } | UpdatingOp::CacheGroup { .. } => Tag::Constant,
            UpdatingOp::Try(region) => region.tag(),
            UpdatingOp::List(region) => region.tag(),
        }
    }

    fn evaluate(&mut self, state: &mut RenderState) -> Result<Flow, Unwind> {
        match self {
            UpdatingOp::UpdateText { node, cache } => {
                if let Some(value) = cache.revalidate().map_err(Unwind::Raised)? {
                    state.env.dom().set_text(*node, &value.to_content_string());
                }
            }
            UpdatingOp::UpdateRaw { bounds, cache } => {
                if let Some(value) = cache.revalidate().map_err(Unwind::Raised)? {
                    let dom = state.env.dom();
                    let parent = bounds.parent();
                    let node = dom.create_raw_html(&value.to_content_string());
                    dom.insert_before(parent, node, bounds.first_node());
                    clear(dom.as_ref(), parent, &Bounds::Block(bounds.clone()));
                    let fresh = BlockBounds::new(parent);
                    fresh.did_append(Bounds::Node(node));
                    bounds.replace_with(&fresh);
                }
            }
            UpdatingOp::UpdateAttr {
                element,
                name,
                namespace,
                cache,
            } => {
                if let Some(value) = cache.revalidate().map_err(Unwind::Raised)? {
                    apply_attr(
                        state.env.dom().as_ref(),
                        *element,
                        name,
                        namespace.as_deref(),
                        &value,
                    );
                }
            }
            UpdatingOp::Assert { cache } => {
                if cache.is_stale().map_err(Unwind::Raised)? {
                    return Ok(Flow::Throw);
                }
            }
            UpdatingOp::UpdateComponent {
                component,
                args,
                last,
            } => {
                let tag = Tag::combine([args.tag(), component.tag()]);
                if state.always_revalidate || !tag.validate(*last) {
                    let revision = tag.value();
                    component.update(args).map_err(Unwind::Raised)?;
                    *last = revision;
                }
            }
            UpdatingOp::DidUpdateLayout { component, bounds } => {
                component.did_update_layout(&Bounds::Block(bounds.clone()));
                state
                    .env
                    .did_update(component.clone())
                    .map_err(Unwind::Raised)?;
            }
            UpdatingOp::UpdateModifier {
                modifier,
                args,
                last,
            } => {
                let tag = args.tag();
                if !tag.validate(*last) {
                    *last = tag.value();
                    state
                        .env
                        .schedule_update_modifier(modifier.clone())
                        .map_err(Unwind::Raised)?;
                }
            }
            UpdatingOp::CacheGroup { .. } => {
                panic!("bug: cache group evaluated outside of its list")
            }
            UpdatingOp::Try(region) => {
                region.evaluate(state).map_err(Unwind::Propagated)?;
            }
            UpdatingOp::List(region) => return region.evaluate(state),
        }
        Ok(Flow::Continue)
    }

    fn describe(&self, depth: usize, out: &mut Vec<String>) {
        let name: &'static str = self.into();
        let line = match self {
            UpdatingOp::CacheGroup { len, .. } => format!("{}{name}({len})", "  ".repeat(depth)),
            UpdatingOp::List(list) => {
                format!("{}{name}({})", "  ".repeat(depth), list.items.len())
            }
            _ => format!("{}{name}", "  ".repeat(depth)),
        };
        out.push(line);
        match self {
            UpdatingOp::Try(region) => region.content.describe(depth + 1, out),
            UpdatingOp::List(list) => {
                for item in list.items.values() {
                    item.content.describe(depth + 1, out);
                }
            }
            _ => {}
        }
    }

    fn discard(&mut self, scopes: &mut ScopeArena) {
        match self {
            UpdatingOp::Try(region) => region.content.discard(scopes),
            UpdatingOp::List(list) => {
                for (_, mut item) in list.items.drain(..) {
                    item.content.discard(scopes);
                }
            }
            _ => {}
        }
    }
}

/// Walk `ops` in order, stopping at the first throw.
pub(crate) fn evaluate_ops(
    ops: &mut [UpdatingOp],
    state: &mut RenderState,
) -> Result<Flow, Unwind> {
    let mut i = 0;
    while i < ops.len() {
        let (head, rest) = ops.split_at_mut(i + 1);
        if let UpdatingOp::CacheGroup { len, last } = &mut head[i] {
            let members = &mut rest[..*len];
            i += 1 + *len;
            let tag = Tag::combine(members.iter().map(UpdatingOp::tag));
            if !state.always_revalidate && tag.validate(*last) {
                continue;
            }
            let revision = current_revision();
            if evaluate_ops(members, state)? == Flow::Throw {
                return Ok(Flow::Throw);
            }
            *last = revision;
            continue;
        }
        if head[i].evaluate(state)? == Flow::Throw {
            return Ok(Flow::Throw);
        }
        i += 1;
    }
    Ok(Flow::Continue)
}

/// What a region owns besides its nodes.
#[derive(Default)]
pub(crate) struct RegionContent {
    pub(crate) ops: Vec<UpdatingOp>,
    pub(crate) scopes: Vec<ScopeId>,
    pub(crate) destroyables: Vec<Destroyable>,
}

impl RegionContent {
    fn tag(&self) -> Tag {
        Tag::combine(self.ops.iter().map(UpdatingOp::tag))
    }

    /// Release the scopes of this content and everything nested in it, without running any
    /// destructor. For output that never reached a commit.
    pub(crate) fn discard(&mut self, scopes: &mut ScopeArena) {
        for op in &mut self.ops {
            op.discard(scopes);
        }
        for scope in self.scopes.drain(..) {
            scopes.release(scope);
        }
        self.ops.clear();
        self.destroyables.clear();
    }

    /// Hand every destroyable to the transaction and release every scope, recursively.
    pub(crate) fn teardown(&mut self, state: &mut RenderState) -> Result<(), RenderError> {
        for op in &mut self.ops {
            match op {
                UpdatingOp::Try(region) => region.content.teardown(state)?,
                UpdatingOp::List(list) => {
                    for (_, mut item) in list.items.drain(..) {
                        item.content.teardown(state)?;
                    }
                }
                _ => {}
            }
        }
        for destroyable in self.destroyables.drain(..) {
            state.env.did_destroy(destroyable)?;
        }
        for scope in self.scopes.drain(..) {
            state.scopes.release(scope);
        }
        self.ops.clear();
        Ok(())
    }

    pub(crate) fn describe(&self, depth: usize, out: &mut Vec<String>) {
        for op in &self.ops {
            op.describe(depth, out);
        }
    }
}

/// A block of output that can be rendered again from scratch: the body of a conditional, a
/// list item, a dynamic partial, the root of a render.
pub(crate) struct TryRegion {
    pub(crate) slice: Slice,
    pub(crate) state: CapturedState,
    pub(crate) bounds: Rc<BlockBounds>,
    pub(crate) content: RegionContent,
}

impl TryRegion {
    /// Render `slice` into `parent` in front of `next`. Transaction hooks queued by a failed
    /// render are dropped with it.
    pub(crate) fn render(
        state: &mut RenderState,
        captured: &CapturedState,
        slice: Slice,
        parent: NodeId,
        next: Option<NodeId>,
    ) -> Result<(Rc<BlockBounds>, RegionContent), RenderError> {
        let savepoint = state.env.savepoint()?;
        AppendVm::resume(state, captured, slice, parent, next).inspect_err(|_| {
            state.env.rollback_to(savepoint);
        })
    }

    pub(crate) fn tag(&self) -> Tag {
        self.content.tag()
    }

    pub(crate) fn evaluate(&mut self, state: &mut RenderState) -> Result<(), RenderError> {
        match evaluate_ops(&mut self.content.ops, state) {
            Ok(Flow::Continue) => Ok(()),
            Ok(Flow::Throw) => {
                trace!(slice = ?self.slice, "region inputs changed, re-rendering");
                self.rerender(state)
            }
            Err(Unwind::Raised(e)) if state.env.config().recover_from_exceptions => {
                warn!(slice = ?self.slice, error = %e, "region update failed, re-rendering it");
                self.rerender(state)
            }
            Err(unwind) => Err(unwind.into_error()),
        }
    }

    /// Replace this region's output with a fresh render. The new output is staged in front of
    /// the old, which is only removed once the new one rendered completely.
    pub(crate) fn rerender(&mut self, state: &mut RenderState) -> Result<(), RenderError> {
        let parent = self.bounds.parent();
        let next = self.bounds.first_node();
        let (bounds, content) = Self::render(state, &self.state, self.slice, parent, next)?;

        let dom = state.env.dom().clone();
        clear(dom.as_ref(), parent, &Bounds::Block(self.bounds.clone()));
        let mut old = std::mem::replace(&mut self.content, content);
        old.teardown(state)?;
        self.bounds.replace_with(&bounds);
        Ok(())
    }

    /// Remove the region's nodes and tear down what it owns.
    pub(crate) fn remove(mut self, state: &mut RenderState) -> Result<(), RenderError> {
        let dom = state.env.dom().clone();
        clear(dom.as_ref(), self.bounds.parent(), &Bounds::Block(self.bounds.clone()));
        self.content.teardown(state)
    }
}

/// The output of an `each`: one region per item, keyed.
pub(crate) struct ListRegion {
    pub(crate) item_slice: Slice,
    pub(crate) state: CapturedState,
    pub(crate) artifacts: Rc<IterationArtifacts>,
    pub(crate) last: Revision,
    pub(crate) bounds: Rc<ListBounds>,
    pub(crate) items: IndexMap<ArcStr, TryRegion>,
}

impl ListRegion {
    fn tag(&self) -> Tag {
        Tag::combine(
            std::iter::once(self.artifacts.tag()).chain(self.items.values().map(TryRegion::tag)),
        )
    }

    fn evaluate(&mut self, state: &mut RenderState) -> Result<Flow, Unwind> {
        if state.always_revalidate || !self.artifacts.tag().validate(self.last) {
            let revision = current_revision();
            // An emptied list is the enclosing region's `else`.
            if self.artifacts.is_empty().map_err(Unwind::Raised)? {
                return Ok(Flow::Throw);
            }
            let dom = state.env.dom().clone();
            let anchor = self.bounds.last_node().and_then(|n| dom.next_sibling(n));
            let artifacts = self.artifacts.clone();
            let mut target = ListSync {
                list: &mut *self,
                state: &mut *state,
                anchor,
            };
            let synced = IteratorSynchronizer::new(&artifacts, &mut target)
                .and_then(|synchronizer| synchronizer.sync());
            if synced.is_err() {
                self.sync_bounds();
            }
            synced.map_err(Unwind::Raised)?;
            debug!(items = self.items.len(), "list synchronized");
            self.last = revision;
        }
        for item in self.items.values_mut() {
            item.evaluate(state).map_err(Unwind::Propagated)?;
        }
        Ok(Flow::Continue)
    }

    fn sync_bounds(&self) {
        self.bounds
            .set_items(self.items.values().map(|r| r.bounds.clone()).collect());
    }

    /// Render one item in front of `next`. A key rendered twice replaces the earlier region.
    pub(crate) fn insert_item(
        &mut self,
        state: &mut RenderState,
        item: &ListItemRefs,
        index: usize,
        next: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let mut captured = self.state.clone();
        captured.frame.saved.args = Rc::new(EvaluatedArgs::positional([
            item.value.clone() as ReferenceRc,
            item.memo.clone() as ReferenceRc,
        ]));
        let (bounds, content) =
            TryRegion::render(state, &captured, self.item_slice, self.bounds.parent(), next)?;
        let region = TryRegion {
            slice: self.item_slice,
            state: captured,
            bounds,
            content,
        };
        let index = match self.items.shift_remove_full(&item.key) {
            Some((old_index, _, old)) => {
                old.remove(state)?;
                if old_index < index { index - 1 } else { index }
            }
            None => index,
        };
        self.items.shift_insert(index, item.key.clone(), region);
        Ok(())
    }
}

struct ListSync<'a> {
    list: &'a mut ListRegion,
    state: &'a mut RenderState,
    /// The node after the whole list, where appended items go.
    anchor: Option<NodeId>,
}

impl ListSync<'_> {
    fn position(&self, before: Option<&ArcStr>) -> (usize, Option<NodeId>) {
        match before.and_then(|key| self.list.items.get_full(key)) {
            Some((index, _, region)) => (index, region.bounds.first_node()),
            None => (self.list.items.len(), self.anchor),
        }
    }
}

impl SyncTarget for ListSync<'_> {
    fn retain(&mut self, _item: &ListItemRefs) -> Result<(), RenderError> {
        Ok(())
    }

    fn insert(&mut self, item: &ListItemRefs, before: Option<&ArcStr>) -> Result<(), RenderError> {
        let (index, next) = self.position(before);
        trace!(key = %item.key, "list item inserted");
        self.list.insert_item(self.state, item, index, next)
    }

    fn move_item(
        &mut self,
        item: &ListItemRefs,
        before: Option<&ArcStr>,
    ) -> Result<(), RenderError> {
        let (to, next) = self.position(before);
        let Some((from, _, region)) = self.list.items.get_full(&item.key) else {
            return Ok(());
        };
        trace!(key = %item.key, "list item moved");
        let dom = self.state.env.dom().clone();
        move_before(
            dom.as_ref(),
            self.list.bounds.parent(),
            &Bounds::Block(region.bounds.clone()),
            next,
        );
        let to = if from < to { to - 1 } else { to };
        self.list.items.move_index(from, to);
        Ok(())
    }

    fn delete(&mut self, key: &ArcStr) -> Result<(), RenderError> {
        if let Some(region) = self.list.items.shift_remove(key) {
            trace!(%key, "list item deleted");
            region.remove(self.state)?;
        }
        Ok(())
    }

    fn done(&mut self) -> Result<(), RenderError> {
        self.list.sync_bounds();
        Ok(())
    }
}
