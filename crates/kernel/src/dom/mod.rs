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

//! The tree the VM builds into. The VM only ever talks to it through these traits; the
//! embedder supplies the implementation.

mod bounds;
mod element_stack;
mod simple;

pub use bounds::{BlockBounds, Bounds, ListBounds};
pub(crate) use bounds::{clear, move_before};
pub(crate) use element_stack::ElementStack;
pub use simple::SimpleDom;

use std::fmt::{Display, Formatter};

/// Identity of a node in the embedder's tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the initial render needs: creating detached nodes and attaching them.
pub trait TreeConstruction {
    fn create_element(&self, tag: &str) -> NodeId;
    fn create_text(&self, text: &str) -> NodeId;
    fn create_comment(&self, text: &str) -> NodeId;
    /// Trusted markup, inserted without escaping.
    fn create_raw_html(&self, html: &str) -> NodeId;
    fn set_attribute(&self, element: NodeId, name: &str, value: &str, namespace: Option<&str>);
    fn remove_attribute(&self, element: NodeId, name: &str, namespace: Option<&str>);
    /// Attach `node` under `parent` in front of `reference`, or last when there is none. A node
    /// that is already attached somewhere is moved.
    fn insert_before(&self, parent: NodeId, node: NodeId, reference: Option<NodeId>);
}

/// What re-rendering additionally needs.
pub trait DomChanges: TreeConstruction {
    fn set_text(&self, node: NodeId, text: &str);
    fn remove_child(&self, parent: NodeId, node: NodeId);
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
}
