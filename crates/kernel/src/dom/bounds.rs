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

//! Bounds: the first and last node of a piece of rendered output, resolved lazily so that the
//! bounds of a region stay correct while the regions nested in it re-render.

use crate::dom::{DomChanges, NodeId};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Bounds {
    Node(NodeId),
    Block(Rc<BlockBounds>),
    List(Rc<ListBounds>),
}

impl Bounds {
    pub fn first_node(&self) -> Option<NodeId> {
        match self {
            Bounds::Node(n) => Some(*n),
            Bounds::Block(b) => b.first_node(),
            Bounds::List(l) => l.first_node(),
        }
    }

    pub fn last_node(&self) -> Option<NodeId> {
        match self {
            Bounds::Node(n) => Some(*n),
            Bounds::Block(b) => b.last_node(),
            Bounds::List(l) => l.last_node(),
        }
    }
}

/// The output of a block: everything appended at its top level, in order.
#[derive(Debug)]
pub struct BlockBounds {
    parent: NodeId,
    first: RefCell<Option<Bounds>>,
    last: RefCell<Option<Bounds>>,
}

impl BlockBounds {
    pub fn new(parent: NodeId) -> Self {
        Self {
            parent,
            first: RefCell::new(None),
            last: RefCell::new(None),
        }
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    pub fn first_node(&self) -> Option<NodeId> {
        self.first.borrow().as_ref().and_then(Bounds::first_node)
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.last.borrow().as_ref().and_then(Bounds::last_node)
    }

    pub fn is_empty(&self) -> bool {
        self.first.borrow().is_none()
    }

    pub(crate) fn did_append(&self, bounds: Bounds) {
        let mut first = self.first.borrow_mut();
        if first.is_none() {
            *first = Some(bounds.clone());
        }
        *self.last.borrow_mut() = Some(bounds);
    }

    /// Take over the extent of `other`, which rendered the replacement content of this block.
    pub(crate) fn replace_with(&self, other: &BlockBounds) {
        debug_assert_eq!(self.parent, other.parent);
        *self.first.borrow_mut() = other.first.borrow().clone();
        *self.last.borrow_mut() = other.last.borrow().clone();
    }
}

/// The output of a keyed list: one block per item, in display order.
#[derive(Debug)]
pub struct ListBounds {
    parent: NodeId,
    items: RefCell<Vec<Rc<BlockBounds>>>,
}

impl ListBounds {
    pub fn new(parent: NodeId) -> Self {
        Self {
            parent,
            items: RefCell::new(vec![]),
        }
    }

    pub fn parent(&self) -> NodeId {
        self.parent
    }

    /// Items that failed before appending anything have no nodes and are skipped.
    pub fn first_node(&self) -> Option<NodeId> {
        self.items.borrow().iter().find_map(|b| b.first_node())
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.items.borrow().iter().rev().find_map(|b| b.last_node())
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub(crate) fn push_item(&self, item: Rc<BlockBounds>) {
        self.items.borrow_mut().push(item);
    }

    pub(crate) fn set_items(&self, items: Vec<Rc<BlockBounds>>) {
        *self.items.borrow_mut() = items;
    }
}

/// The nodes from `first` to `last`, which must be siblings in that order.
fn span(dom: &dyn DomChanges, first: NodeId, last: NodeId) -> Vec<NodeId> {
    let mut nodes = vec![first];
    let mut node = first;
    while node != last {
        let Some(next) = dom.next_sibling(node) else {
            panic!("bug: bounds {first}..{last} are not a sibling range");
        };
        nodes.push(next);
        node = next;
    }
    nodes
}

/// Detach every node of `bounds`. Returns the node that followed them.
pub(crate) fn clear(dom: &dyn DomChanges, parent: NodeId, bounds: &Bounds) -> Option<NodeId> {
    let (Some(first), Some(last)) = (bounds.first_node(), bounds.last_node()) else {
        return None;
    };
    let next = dom.next_sibling(last);
    for node in span(dom, first, last) {
        dom.remove_child(parent, node);
    }
    next
}

/// Move every node of `bounds` in front of `before` (or to the end of `parent`).
pub(crate) fn move_before(
    dom: &dyn DomChanges,
    parent: NodeId,
    bounds: &Bounds,
    before: Option<NodeId>,
) {
    let (Some(first), Some(last)) = (bounds.first_node(), bounds.last_node()) else {
        return;
    };
    for node in span(dom, first, last) {
        dom.insert_before(parent, node, before);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{SimpleDom, TreeConstruction};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_nested_bounds_resolve_through_children() {
        let dom = SimpleDom::new();
        let root = dom.document();
        let outer = Rc::new(BlockBounds::new(root));
        let inner = Rc::new(BlockBounds::new(root));
        assert_eq!(outer.first_node(), None);

        let a = dom.create_text("a");
        let b = dom.create_text("b");
        dom.insert_before(root, a, None);
        dom.insert_before(root, b, None);
        inner.did_append(Bounds::Node(a));
        inner.did_append(Bounds::Node(b));
        outer.did_append(Bounds::Block(inner.clone()));
        assert_eq!(outer.first_node(), Some(a));
        assert_eq!(outer.last_node(), Some(b));

        let c = dom.create_text("c");
        dom.insert_before(root, c, Some(a));
        let replacement = BlockBounds::new(root);
        replacement.did_append(Bounds::Node(c));
        inner.replace_with(&replacement);
        assert_eq!(outer.first_node(), Some(c));
        assert_eq!(outer.last_node(), Some(c));
    }

    #[test]
    fn test_clear_and_move() {
        let dom = SimpleDom::new();
        let root = dom.document();
        let nodes: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|t| {
                let n = dom.create_text(t);
                dom.insert_before(root, n, None);
                n
            })
            .collect();
        let block = Rc::new(BlockBounds::new(root));
        block.did_append(Bounds::Node(nodes[0]));
        block.did_append(Bounds::Node(nodes[1]));

        move_before(&dom, root, &Bounds::Block(block.clone()), None);
        assert_eq!(dom.inner_html(root), "cdab");

        let next = clear(&dom, root, &Bounds::Block(block));
        assert_eq!(next, None);
        assert_eq!(dom.inner_html(root), "cd");
    }

    #[test]
    fn test_list_bounds_skip_items_without_nodes() {
        let dom = SimpleDom::new();
        let root = dom.document();
        let list = Rc::new(ListBounds::new(root));
        let empty = || Rc::new(BlockBounds::new(root));
        let filled = Rc::new(BlockBounds::new(root));
        let a = dom.create_text("a");
        dom.insert_before(root, a, None);
        filled.did_append(Bounds::Node(a));
        list.set_items(vec![empty(), filled, empty()]);
        assert_eq!(list.first_node(), Some(a));
        assert_eq!(list.last_node(), Some(a));

        clear(&dom, root, &Bounds::List(list));
        assert_eq!(dom.inner_html(root), "");
    }
}
