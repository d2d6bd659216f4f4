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

use crate::dom::{DomChanges, NodeId, TreeConstruction};
use arcstr::ArcStr;
use std::cell::{Cell, RefCell};

#[derive(Debug)]
enum NodeData {
    Document,
    Element {
        tag: ArcStr,
        attrs: Vec<Attribute>,
    },
    Text(String),
    Comment(String),
    Raw(String),
}

#[derive(Debug)]
struct Attribute {
    name: String,
    value: String,
    namespace: Option<String>,
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An in-memory tree with stable node identities and a count of every change made to nodes
/// while they are attached.
///
/// Node `#0` is the document; everything rendered hangs off it or off an element under it.
#[derive(Debug)]
pub struct SimpleDom {
    nodes: RefCell<Vec<Node>>,
    mutations: Cell<usize>,
}

impl Default for SimpleDom {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleDom {
    pub fn new() -> Self {
        Self {
            nodes: RefCell::new(vec![Node {
                data: NodeData::Document,
                parent: None,
                children: vec![],
            }]),
            mutations: Cell::new(0),
        }
    }

    pub fn document(&self) -> NodeId {
        NodeId(0)
    }

    fn create(&self, data: NodeData) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node {
            data,
            parent: None,
            children: vec![],
        });
        NodeId((nodes.len() - 1) as u32)
    }

    fn mutated(&self) {
        self.mutations.set(self.mutations.get() + 1);
    }

    fn detach(nodes: &mut [Node], node: NodeId) {
        if let Some(parent) = nodes[node.0 as usize].parent.take() {
            nodes[parent.0 as usize].children.retain(|c| *c != node);
        }
    }

    /// Changes made to attached nodes since creation or the last reset.
    pub fn mutations(&self) -> usize {
        self.mutations.get()
    }

    pub fn reset_mutations(&self) {
        self.mutations.set(0);
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes.borrow()[node.0 as usize].children.clone()
    }

    pub fn tag(&self, node: NodeId) -> Option<ArcStr> {
        match &self.nodes.borrow()[node.0 as usize].data {
            NodeData::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    /// The character data of a text, comment or raw node.
    pub fn text(&self, node: NodeId) -> Option<String> {
        match &self.nodes.borrow()[node.0 as usize].data {
            NodeData::Text(t) | NodeData::Comment(t) | NodeData::Raw(t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn attribute(&self, element: NodeId, name: &str) -> Option<String> {
        match &self.nodes.borrow()[element.0 as usize].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.value.clone()),
            _ => None,
        }
    }

    /// Elements with the given tag under `root`, in document order.
    pub fn find_all(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        let mut found = vec![];
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if self.tag(node).is_some_and(|t| t.as_str() == tag) {
                found.push(node);
            }
            stack.extend(self.children(node).into_iter().rev());
        }
        found
    }

    /// The markup of the children of `node`.
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        let nodes = self.nodes.borrow();
        for child in &nodes[node.0 as usize].children {
            Self::serialize(&nodes, *child, &mut out);
        }
        out
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        Self::serialize(&self.nodes.borrow(), node, &mut out);
        out
    }

    fn serialize(nodes: &[Node], node: NodeId, out: &mut String) {
        let n = &nodes[node.0 as usize];
        match &n.data {
            NodeData::Document => {
                for child in &n.children {
                    Self::serialize(nodes, *child, out);
                }
            }
            NodeData::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for attr in attrs {
                    out.push(' ');
                    if let Some(ns) = &attr.namespace {
                        out.push_str(ns);
                        out.push(':');
                    }
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    escape(&attr.value, true, out);
                    out.push('"');
                }
                out.push('>');
                for child in &n.children {
                    Self::serialize(nodes, *child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            NodeData::Text(t) => escape(t, false, out),
            NodeData::Comment(t) => {
                out.push_str("<!--");
                out.push_str(t);
                out.push_str("-->");
            }
            NodeData::Raw(html) => out.push_str(html),
        }
    }
}

fn escape(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

impl TreeConstruction for SimpleDom {
    fn create_element(&self, tag: &str) -> NodeId {
        self.create(NodeData::Element {
            tag: ArcStr::from(tag),
            attrs: vec![],
        })
    }

    fn create_text(&self, text: &str) -> NodeId {
        self.create(NodeData::Text(text.to_string()))
    }

    fn create_comment(&self, text: &str) -> NodeId {
        self.create(NodeData::Comment(text.to_string()))
    }

    fn create_raw_html(&self, html: &str) -> NodeId {
        self.create(NodeData::Raw(html.to_string()))
    }

    fn set_attribute(&self, element: NodeId, name: &str, value: &str, namespace: Option<&str>) {
        let mut nodes = self.nodes.borrow_mut();
        let node = &mut nodes[element.0 as usize];
        let attached = node.parent.is_some();
        let NodeData::Element { attrs, .. } = &mut node.data else {
            panic!("bug: setting attribute {name} on non-element {element}");
        };
        match attrs
            .iter_mut()
            .find(|a| a.name == name && a.namespace.as_deref() == namespace)
        {
            Some(attr) => attr.value = value.to_string(),
            None => attrs.push(Attribute {
                name: name.to_string(),
                value: value.to_string(),
                namespace: namespace.map(str::to_string),
            }),
        }
        drop(nodes);
        if attached {
            self.mutated();
        }
    }

    fn remove_attribute(&self, element: NodeId, name: &str, namespace: Option<&str>) {
        let mut nodes = self.nodes.borrow_mut();
        let node = &mut nodes[element.0 as usize];
        let attached = node.parent.is_some();
        if let NodeData::Element { attrs, .. } = &mut node.data {
            attrs.retain(|a| !(a.name == name && a.namespace.as_deref() == namespace));
        }
        drop(nodes);
        if attached {
            self.mutated();
        }
    }

    fn insert_before(&self, parent: NodeId, node: NodeId, reference: Option<NodeId>) {
        let mut nodes = self.nodes.borrow_mut();
        Self::detach(&mut nodes, node);
        let children = &mut nodes[parent.0 as usize].children;
        let at = reference
            .and_then(|r| children.iter().position(|c| *c == r))
            .unwrap_or(children.len());
        children.insert(at, node);
        nodes[node.0 as usize].parent = Some(parent);
        drop(nodes);
        self.mutated();
    }
}

impl DomChanges for SimpleDom {
    fn set_text(&self, node: NodeId, text: &str) {
        let mut nodes = self.nodes.borrow_mut();
        match &mut nodes[node.0 as usize].data {
            NodeData::Text(t) | NodeData::Comment(t) | NodeData::Raw(t) => *t = text.to_string(),
            _ => panic!("bug: setting text on element {node}"),
        }
        drop(nodes);
        self.mutated();
    }

    fn remove_child(&self, parent: NodeId, node: NodeId) {
        let mut nodes = self.nodes.borrow_mut();
        debug_assert_eq!(nodes[node.0 as usize].parent, Some(parent));
        Self::detach(&mut nodes, node);
        drop(nodes);
        self.mutated();
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let nodes = self.nodes.borrow();
        let parent = nodes[node.0 as usize].parent?;
        let siblings = &nodes[parent.0 as usize].children;
        let at = siblings.iter().position(|c| *c == node)?;
        siblings.get(at + 1).copied()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.borrow()[node.0 as usize].parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("a & b", false, "a &amp; b"; "ampersand")]
    #[test_case("<b>", false, "&lt;b&gt;"; "angle brackets")]
    #[test_case("say \"hi\"", false, "say \"hi\""; "quotes in text")]
    #[test_case("say \"hi\"", true, "say &quot;hi&quot;"; "quotes in attribute")]
    fn test_escape(text: &str, attribute: bool, expected: &str) {
        let mut out = String::new();
        escape(text, attribute, &mut out);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_build_and_serialize() {
        let dom = SimpleDom::new();
        let p = dom.create_element("p");
        dom.set_attribute(p, "title", "a \"quote\"", None);
        let text = dom.create_text("1 < 2");
        dom.insert_before(p, text, None);
        dom.insert_before(dom.document(), p, None);
        assert_eq!(
            dom.inner_html(dom.document()),
            r#"<p title="a &quot;quote&quot;">1 &lt; 2</p>"#
        );
        assert_eq!(dom.mutations(), 2);
    }

    #[test]
    fn test_insert_before_moves_attached_nodes() {
        let dom = SimpleDom::new();
        let root = dom.document();
        let a = dom.create_text("a");
        let b = dom.create_text("b");
        dom.insert_before(root, a, None);
        dom.insert_before(root, b, None);
        dom.insert_before(root, b, Some(a));
        assert_eq!(dom.children(root), vec![b, a]);
        assert_eq!(dom.next_sibling(b), Some(a));
        assert_eq!(dom.next_sibling(a), None);

        dom.remove_child(root, b);
        assert_eq!(dom.children(root), vec![a]);
        assert_eq!(dom.parent(b), None);
    }
}
