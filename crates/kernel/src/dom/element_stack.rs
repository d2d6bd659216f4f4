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

//! Where the next node goes: the stack of open elements, the element under construction, and
//! the bounds trackers of the blocks being rendered.

use crate::dom::{BlockBounds, Bounds, DomChanges, ListBounds, NodeId};
use std::rc::Rc;

enum Tracker {
    /// `nesting` counts the elements opened since the block started; only nodes appended at
    /// depth zero extend the block.
    Block {
        bounds: Rc<BlockBounds>,
        nesting: usize,
    },
    List {
        bounds: Rc<ListBounds>,
    },
}

pub(crate) struct ElementStack {
    dom: Rc<dyn DomChanges>,
    elements: Vec<NodeId>,
    next_siblings: Vec<Option<NodeId>>,
    constructing: Option<NodeId>,
    trackers: Vec<Tracker>,
}

impl ElementStack {
    /// Start appending under `parent`, in front of `next_sibling`, into a fresh root block.
    pub(crate) fn new(
        dom: Rc<dyn DomChanges>,
        parent: NodeId,
        next_sibling: Option<NodeId>,
    ) -> Self {
        Self {
            dom,
            elements: vec![parent],
            next_siblings: vec![next_sibling],
            constructing: None,
            trackers: vec![Tracker::Block {
                bounds: Rc::new(BlockBounds::new(parent)),
                nesting: 0,
            }],
        }
    }

    pub(crate) fn element(&self) -> NodeId {
        *self
            .elements
            .last()
            .expect("bug: element stack underflow")
    }

    fn next_sibling(&self) -> Option<NodeId> {
        self.next_siblings.last().copied().flatten()
    }

    pub(crate) fn constructing(&self) -> NodeId {
        self.constructing
            .unwrap_or_else(|| panic!("bug: no element under construction"))
    }

    pub(crate) fn open_element(&mut self, tag: &str) -> NodeId {
        debug_assert!(self.constructing.is_none(), "bug: nested open element");
        let element = self.dom.create_element(tag);
        self.constructing = Some(element);
        element
    }

    pub(crate) fn set_attribute(&self, name: &str, value: &str, namespace: Option<&str>) {
        self.dom
            .set_attribute(self.constructing(), name, value, namespace);
    }

    /// Attach the element under construction and make it the parent of what follows.
    pub(crate) fn flush_element(&mut self) -> NodeId {
        let element = self.constructing();
        self.constructing = None;
        self.insert(element);
        self.elements.push(element);
        self.next_siblings.push(None);
        if let Some(Tracker::Block { nesting, .. }) = self.trackers.last_mut() {
            *nesting += 1;
        }
        element
    }

    pub(crate) fn close_element(&mut self) {
        assert!(self.elements.len() > 1, "bug: closing the root element");
        self.elements.pop();
        self.next_siblings.pop();
        if let Some(Tracker::Block { nesting, .. }) = self.trackers.last_mut() {
            *nesting -= 1;
        }
    }

    pub(crate) fn append_text(&mut self, text: &str) -> NodeId {
        let node = self.dom.create_text(text);
        self.insert(node);
        node
    }

    pub(crate) fn append_comment(&mut self, text: &str) -> NodeId {
        let node = self.dom.create_comment(text);
        self.insert(node);
        node
    }

    pub(crate) fn append_raw(&mut self, html: &str) -> NodeId {
        let node = self.dom.create_raw_html(html);
        self.insert(node);
        node
    }

    fn insert(&mut self, node: NodeId) {
        self.dom
            .insert_before(self.element(), node, self.next_sibling());
        self.did_append(Bounds::Node(node));
    }

    fn did_append(&mut self, appended: Bounds) {
        match self.trackers.last() {
            Some(Tracker::Block { bounds, nesting: 0 }) => bounds.did_append(appended),
            Some(Tracker::Block { .. }) => {}
            Some(Tracker::List { .. }) => panic!("bug: content appended directly into a list"),
            None => panic!("bug: no open block"),
        }
    }

    pub(crate) fn push_simple_block(&mut self) -> Rc<BlockBounds> {
        let bounds = Rc::new(BlockBounds::new(self.element()));
        self.trackers.push(Tracker::Block {
            bounds: bounds.clone(),
            nesting: 0,
        });
        bounds
    }

    pub(crate) fn push_list_block(&mut self) -> Rc<ListBounds> {
        let bounds = Rc::new(ListBounds::new(self.element()));
        self.trackers.push(Tracker::List {
            bounds: bounds.clone(),
        });
        bounds
    }

    /// Close the innermost block and hand its bounds to the enclosing one. An empty block gets a
    /// placeholder comment so that it has a position to re-render at.
    pub(crate) fn pop_block(&mut self) {
        if let Some(Tracker::Block { bounds, .. }) = self.trackers.last()
            && bounds.is_empty()
        {
            self.append_comment("");
        }
        self.pop_tracker();
    }

    fn pop_tracker(&mut self) {
        assert!(self.trackers.len() > 1, "bug: popping the root block");
        let Some(tracker) = self.trackers.pop() else {
            return;
        };
        match (tracker, self.trackers.last()) {
            (Tracker::Block { bounds, .. }, Some(Tracker::List { bounds: list })) => {
                list.push_item(bounds);
            }
            (Tracker::Block { bounds, .. }, _) => {
                if !bounds.is_empty() {
                    self.did_append(Bounds::Block(bounds));
                }
            }
            (Tracker::List { bounds }, _) => {
                if !bounds.is_empty() {
                    self.did_append(Bounds::List(bounds));
                }
            }
        }
    }

    /// Close every block still open after a failure, so that the root block covers every node
    /// inserted at the top level.
    pub(crate) fn unwind(mut self) -> Rc<BlockBounds> {
        self.constructing = None;
        while self.trackers.len() > 1 {
            self.pop_tracker();
        }
        self.root()
    }

    /// Close the root block once rendering completed.
    pub(crate) fn finish(mut self) -> Rc<BlockBounds> {
        assert_eq!(self.trackers.len(), 1, "bug: unbalanced block trackers");
        assert_eq!(self.elements.len(), 1, "bug: unclosed elements");
        let root = self.root();
        if root.is_empty() {
            self.append_comment("");
        }
        root
    }

    fn root(&self) -> Rc<BlockBounds> {
        match self.trackers.first() {
            Some(Tracker::Block { bounds, .. }) => bounds.clone(),
            _ => panic!("bug: the root tracker is not a block"),
        }
    }
}
