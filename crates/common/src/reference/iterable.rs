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

//! Keyed iteration: the artifacts remembered from one pass over a list, and the synchronizer
//! that diffs the next pass against them into retain/insert/move/delete edits.

use crate::model::RenderError;
use crate::reference::reference::{Reference, ReferenceRc, UpdatableReference};
use crate::reference::tag::Tag;
use ahash::AHashMap;
use arcstr::ArcStr;
use std::cell::RefCell;
use std::rc::Rc;
use trellis_var::{Var, Variant, v_bool, v_int, v_str};

/// One item produced by a pass over an iterable.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationItem {
    pub key: ArcStr,
    pub value: Var,
    pub memo: Var,
}

pub trait OpaqueIterator {
    fn is_empty(&self) -> bool;
    fn next(&mut self) -> Option<IterationItem>;
}

pub trait OpaqueIterable {
    fn tag(&self) -> Tag;
    fn iterate(&self) -> Result<Box<dyn OpaqueIterator>, RenderError>;
}

/// How an item's key is derived from its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyFor {
    Index,
    Identity,
    Property(ArcStr),
}

impl KeyFor {
    pub fn parse(key: &str) -> KeyFor {
        match key {
            "@index" => KeyFor::Index,
            "" | "@identity" | "@primitive" => KeyFor::Identity,
            property => KeyFor::Property(ArcStr::from(property)),
        }
    }

    fn key(&self, position: usize, value: &Var) -> ArcStr {
        match self {
            KeyFor::Index => ArcStr::from(position.to_string()),
            KeyFor::Identity => value.identity(),
            KeyFor::Property(p) => value.get_key(p).identity(),
        }
    }
}

/// Iterates the list (or map values) a reference currently holds. Missing or false values
/// iterate as empty.
pub struct ListIterable {
    reference: ReferenceRc,
    key_for: KeyFor,
}

impl ListIterable {
    pub fn new(reference: ReferenceRc, key_for: KeyFor) -> Self {
        Self { reference, key_for }
    }
}

impl OpaqueIterable for ListIterable {
    fn tag(&self) -> Tag {
        self.reference.tag()
    }

    fn iterate(&self) -> Result<Box<dyn OpaqueIterator>, RenderError> {
        let value = self.reference.value()?;
        let items = match value.variant() {
            Variant::List(l) => l
                .iter()
                .enumerate()
                .map(|(i, v)| (v.clone(), v_int(i as i64)))
                .collect(),
            Variant::Map(m) => m.iter().map(|(k, v)| (v.clone(), v_str(k))).collect(),
            Variant::Undefined | Variant::Null | Variant::Bool(false) => vec![],
            _ => return Err(RenderError::NotIterable(format!("{value:?}"))),
        };
        Ok(Box::new(ListIterator {
            items,
            position: 0,
            key_for: self.key_for.clone(),
        }))
    }
}

struct ListIterator {
    items: Vec<(Var, Var)>,
    position: usize,
    key_for: KeyFor,
}

impl OpaqueIterator for ListIterator {
    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn next(&mut self) -> Option<IterationItem> {
        let (value, memo) = self.items.get(self.position)?.clone();
        let key = self.key_for.key(self.position, &value);
        self.position += 1;
        Some(IterationItem { key, value, memo })
    }
}

/// Handle to a node in the artifacts' item list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ItemId(usize);

/// The references a rendered item reads; updated in place when the item is retained or moved.
#[derive(Clone)]
pub struct ListItemRefs {
    pub key: ArcStr,
    pub value: Rc<UpdatableReference>,
    pub memo: Rc<UpdatableReference>,
}

struct ListNode {
    refs: ListItemRefs,
    retained: bool,
    seen: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Default)]
struct ArtifactsState {
    iterator: Option<Box<dyn OpaqueIterator>>,
    nodes: Vec<Option<ListNode>>,
    free: Vec<usize>,
    map: AHashMap<ArcStr, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl ArtifactsState {
    fn node(&self, id: usize) -> &ListNode {
        self.nodes[id]
            .as_ref()
            .unwrap_or_else(|| panic!("bug: list item {id} was removed"))
    }

    fn node_mut(&mut self, id: usize) -> &mut ListNode {
        self.nodes[id]
            .as_mut()
            .unwrap_or_else(|| panic!("bug: list item {id} was removed"))
    }

    fn alloc(&mut self, item: &IterationItem) -> usize {
        let node = ListNode {
            refs: ListItemRefs {
                key: item.key.clone(),
                value: Rc::new(UpdatableReference::new(item.value.clone())),
                memo: Rc::new(UpdatableReference::new(item.memo.clone())),
            },
            retained: false,
            seen: false,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        // Duplicate keys replace the mapping; the older node stays in the list.
        self.map.insert(item.key.clone(), id);
        id
    }

    fn link_before(&mut self, id: usize, reference: Option<usize>) {
        let prev = match reference {
            Some(r) => self.node(r).prev,
            None => self.tail,
        };
        {
            let node = self.node_mut(id);
            node.prev = prev;
            node.next = reference;
        }
        match prev {
            Some(p) => self.node_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        match reference {
            Some(r) => self.node_mut(r).prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    fn unlink(&mut self, id: usize) {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(id);
        node.prev = None;
        node.next = None;
    }
}

/// What one pass over an iterable left behind: its items in rendered order, by key.
pub struct IterationArtifacts {
    iterable: Rc<dyn OpaqueIterable>,
    state: RefCell<ArtifactsState>,
}

impl IterationArtifacts {
    pub fn new(iterable: Rc<dyn OpaqueIterable>) -> Self {
        Self {
            iterable,
            state: RefCell::new(ArtifactsState::default()),
        }
    }

    pub fn tag(&self) -> Tag {
        self.iterable.tag()
    }

    /// Starts a pass to answer the question; the pass is reused by the next `iterate`.
    pub fn is_empty(&self) -> Result<bool, RenderError> {
        let iterator = self.iterable.iterate()?;
        let empty = iterator.is_empty();
        self.state.borrow_mut().iterator = Some(iterator);
        Ok(empty)
    }

    pub fn iterate(&self) -> Result<Box<dyn OpaqueIterator>, RenderError> {
        match self.state.borrow_mut().iterator.take() {
            Some(iterator) => Ok(iterator),
            None => self.iterable.iterate(),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.state.borrow().map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<ItemId> {
        self.state.borrow().map.get(key).copied().map(ItemId)
    }

    pub fn was_seen(&self, key: &str) -> bool {
        let state = self.state.borrow();
        state
            .map
            .get(key)
            .is_some_and(|id| state.node(*id).seen)
    }

    pub fn head(&self) -> Option<ItemId> {
        self.state.borrow().head.map(ItemId)
    }

    pub fn next_node(&self, item: ItemId) -> Option<ItemId> {
        self.state.borrow().node(item.0).next.map(ItemId)
    }

    pub fn key(&self, item: ItemId) -> ArcStr {
        self.state.borrow().node(item.0).refs.key.clone()
    }

    pub fn refs(&self, item: ItemId) -> ListItemRefs {
        self.state.borrow().node(item.0).refs.clone()
    }

    pub fn len(&self) -> usize {
        let state = self.state.borrow();
        state.nodes.len() - state.free.len()
    }

    /// Record an item of the first pass at the end of the list.
    pub fn append(&self, item: &IterationItem) -> ListItemRefs {
        let mut state = self.state.borrow_mut();
        let id = state.alloc(item);
        state.link_before(id, None);
        state.node(id).refs.clone()
    }

    pub fn insert_before(&self, item: &IterationItem, reference: Option<ItemId>) -> ItemId {
        let mut state = self.state.borrow_mut();
        let id = state.alloc(item);
        state.node_mut(id).retained = true;
        state.link_before(id, reference.map(|r| r.0));
        ItemId(id)
    }

    pub fn move_before(&self, item: ItemId, reference: Option<ItemId>) {
        if Some(item) == reference {
            return;
        }
        let mut state = self.state.borrow_mut();
        state.unlink(item.0);
        state.link_before(item.0, reference.map(|r| r.0));
    }

    pub fn remove(&self, item: ItemId) {
        let mut state = self.state.borrow_mut();
        state.unlink(item.0);
        let key = state.node(item.0).refs.key.clone();
        if state.map.get(&key) == Some(&item.0) {
            state.map.remove(&key);
        }
        state.nodes[item.0] = None;
        state.free.push(item.0);
    }

    /// Mark the item as present in the current pass and push the pass's values into it.
    pub fn update(&self, item: ItemId, with: &IterationItem) {
        let refs = {
            let mut state = self.state.borrow_mut();
            let node = state.node_mut(item.0);
            node.retained = true;
            node.refs.clone()
        };
        refs.value.update(with.value.clone());
        refs.memo.update(with.memo.clone());
    }

    fn mark_seen(&self, item: ItemId) {
        self.state.borrow_mut().node_mut(item.0).seen = true;
    }

    fn should_remove(&self, item: ItemId) -> bool {
        !self.state.borrow().node(item.0).retained
    }

    /// Drop the marks an interrupted pass left on the items it visited.
    fn clear_marks(&self) {
        let mut state = self.state.borrow_mut();
        for node in state.nodes.iter_mut().flatten() {
            node.retained = false;
            node.seen = false;
        }
    }

    fn reset(&self, item: ItemId) {
        let mut state = self.state.borrow_mut();
        let node = state.node_mut(item.0);
        node.retained = false;
        node.seen = false;
    }
}

/// Walks the first pass over an iterable, recording each item into the artifacts.
pub struct ReferenceIterator {
    artifacts: Rc<IterationArtifacts>,
    iterator: Option<Box<dyn OpaqueIterator>>,
}

impl ReferenceIterator {
    pub fn new(iterable: Rc<dyn OpaqueIterable>) -> Self {
        Self {
            artifacts: Rc::new(IterationArtifacts::new(iterable)),
            iterator: None,
        }
    }

    pub fn artifacts(&self) -> &Rc<IterationArtifacts> {
        &self.artifacts
    }

    pub fn next(&mut self) -> Result<Option<ListItemRefs>, RenderError> {
        if self.iterator.is_none() {
            self.iterator = Some(self.artifacts.iterate()?);
        }
        let Some(iterator) = self.iterator.as_mut() else {
            return Ok(None);
        };
        Ok(iterator.next().map(|item| self.artifacts.append(&item)))
    }
}

/// Whether the iterable currently has any items.
pub struct IterablePresenceReference {
    artifacts: Rc<IterationArtifacts>,
}

impl IterablePresenceReference {
    pub fn new(artifacts: Rc<IterationArtifacts>) -> Self {
        Self { artifacts }
    }
}

impl Reference for IterablePresenceReference {
    fn tag(&self) -> Tag {
        self.artifacts.tag()
    }

    fn value(&self) -> Result<Var, RenderError> {
        Ok(v_bool(!self.artifacts.is_empty()?))
    }
}

/// Receives the edit script computed by [`IteratorSynchronizer`]. `before` names the item the
/// edited one must end up in front of; `None` means the end of the list.
pub trait SyncTarget {
    fn retain(&mut self, item: &ListItemRefs) -> Result<(), RenderError>;
    fn insert(&mut self, item: &ListItemRefs, before: Option<&ArcStr>) -> Result<(), RenderError>;
    fn move_item(&mut self, item: &ListItemRefs, before: Option<&ArcStr>)
    -> Result<(), RenderError>;
    fn delete(&mut self, key: &ArcStr) -> Result<(), RenderError>;
    fn done(&mut self) -> Result<(), RenderError>;
}

enum Phase {
    Append,
    Prune,
    Done,
}

/// Diffs a new pass over an iterable against the artifacts of the previous one.
pub struct IteratorSynchronizer<'a, T: SyncTarget> {
    artifacts: &'a IterationArtifacts,
    target: &'a mut T,
    iterator: Box<dyn OpaqueIterator>,
    current: Option<ItemId>,
}

impl<'a, T: SyncTarget> IteratorSynchronizer<'a, T> {
    pub fn new(artifacts: &'a IterationArtifacts, target: &'a mut T) -> Result<Self, RenderError> {
        let iterator = artifacts.iterate()?;
        let current = artifacts.head();
        Ok(Self {
            artifacts,
            target,
            iterator,
            current,
        })
    }

    /// Run the edit script to completion. If the target fails part way, the artifacts keep
    /// only the items the target holds, so a later pass retries the rest.
    pub fn sync(mut self) -> Result<(), RenderError> {
        let result = self.run();
        if result.is_err() {
            self.artifacts.clear_marks();
        }
        result
    }

    fn run(&mut self) -> Result<(), RenderError> {
        let mut phase = Phase::Append;
        loop {
            phase = match phase {
                Phase::Append => self.next_append()?,
                Phase::Prune => self.next_prune()?,
                Phase::Done => return self.target.done(),
            };
        }
    }

    fn current_key(&self) -> Option<ArcStr> {
        self.current.map(|c| self.artifacts.key(c))
    }

    fn advance_to_key(&mut self, key: &str) {
        let mut seek = self.current;
        while let Some(node) = seek {
            if self.artifacts.key(node).as_str() == key {
                break;
            }
            self.artifacts.mark_seen(node);
            seek = self.artifacts.next_node(node);
        }
        self.current = seek.and_then(|node| self.artifacts.next_node(node));
    }

    fn next_append(&mut self) -> Result<Phase, RenderError> {
        let Some(item) = self.iterator.next() else {
            self.current = self.artifacts.head();
            return Ok(Phase::Prune);
        };

        if self.current_key().as_deref() == Some(item.key.as_str()) {
            self.next_retain(&item)?;
        } else if self.artifacts.has(&item.key) {
            self.next_move(&item)?;
        } else {
            self.next_insert(&item)?;
        }
        Ok(Phase::Append)
    }

    fn next_retain(&mut self, item: &IterationItem) -> Result<(), RenderError> {
        let Some(current) = self.current else {
            return Ok(());
        };
        self.artifacts.update(current, item);
        self.current = self.artifacts.next_node(current);
        self.target.retain(&self.artifacts.refs(current))
    }

    fn next_move(&mut self, item: &IterationItem) -> Result<(), RenderError> {
        let Some(found) = self.artifacts.get(&item.key) else {
            return self.next_insert(item);
        };
        self.artifacts.update(found, item);

        if self.artifacts.was_seen(&item.key) {
            self.artifacts.move_before(found, self.current);
            let before = self.current_key();
            self.target
                .move_item(&self.artifacts.refs(found), before.as_ref())
        } else {
            self.advance_to_key(&item.key);
            Ok(())
        }
    }

    fn next_insert(&mut self, item: &IterationItem) -> Result<(), RenderError> {
        let artifacts = self.artifacts;
        let node = artifacts.insert_before(item, self.current);
        let before = self.current_key();
        self.target
            .insert(&artifacts.refs(node), before.as_ref())
            .inspect_err(|_| artifacts.remove(node))
    }

    fn next_prune(&mut self) -> Result<Phase, RenderError> {
        let Some(node) = self.current else {
            return Ok(Phase::Done);
        };
        self.current = self.artifacts.next_node(node);
        if self.artifacts.should_remove(node) {
            let key = self.artifacts.key(node);
            self.artifacts.remove(node);
            self.target.delete(&key)?;
        } else {
            self.artifacts.reset(node);
        }
        Ok(Phase::Prune)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;
    use trellis_var::{v_empty_list, v_list, v_map};

    #[test_case("@index", KeyFor::Index; "index")]
    #[test_case("@identity", KeyFor::Identity; "identity")]
    #[test_case("@primitive", KeyFor::Identity; "primitive")]
    #[test_case("", KeyFor::Identity; "empty")]
    #[test_case("id", KeyFor::Property(ArcStr::from("id")); "property")]
    fn test_key_for_parse(key: &str, expected: KeyFor) {
        assert_eq!(KeyFor::parse(key), expected);
    }

    /// Applies the edit script to a plain list of keys, the way a list region applies it to nodes.
    #[derive(Default)]
    struct KeyList {
        keys: Vec<String>,
        edits: Vec<String>,
        /// Refuse to insert this key once.
        reject: Option<String>,
    }

    impl KeyList {
        fn position(&self, before: Option<&ArcStr>) -> usize {
            before
                .and_then(|b| self.keys.iter().position(|k| k == b.as_str()))
                .unwrap_or(self.keys.len())
        }
    }

    impl SyncTarget for KeyList {
        fn retain(&mut self, _item: &ListItemRefs) -> Result<(), RenderError> {
            Ok(())
        }

        fn insert(
            &mut self,
            item: &ListItemRefs,
            before: Option<&ArcStr>,
        ) -> Result<(), RenderError> {
            if self.reject.as_deref() == Some(item.key.as_str()) {
                self.reject = None;
                return Err(RenderError::HelperFailed {
                    name: "insert".into(),
                    message: item.key.to_string(),
                });
            }
            let at = self.position(before);
            self.keys.insert(at, item.key.to_string());
            self.edits.push(format!("insert {}", item.key));
            Ok(())
        }

        fn move_item(
            &mut self,
            item: &ListItemRefs,
            before: Option<&ArcStr>,
        ) -> Result<(), RenderError> {
            self.keys.retain(|k| k != item.key.as_str());
            let at = self.position(before);
            self.keys.insert(at, item.key.to_string());
            self.edits.push(format!("move {}", item.key));
            Ok(())
        }

        fn delete(&mut self, key: &ArcStr) -> Result<(), RenderError> {
            self.keys.retain(|k| k != key.as_str());
            self.edits.push(format!("delete {key}"));
            Ok(())
        }

        fn done(&mut self) -> Result<(), RenderError> {
            self.edits.push("done".into());
            Ok(())
        }
    }

    fn items(ids: &[i64]) -> Var {
        v_list(
            &ids.iter()
                .map(|id| v_map(&[("id", v_int(*id))]))
                .collect::<Vec<_>>(),
        )
    }

    fn first_pass(root: &Rc<UpdatableReference>) -> (Rc<IterationArtifacts>, KeyList) {
        let iterable = Rc::new(ListIterable::new(root.clone(), KeyFor::parse("id")));
        let mut iterator = ReferenceIterator::new(iterable);
        let mut target = KeyList::default();
        while let Some(item) = iterator.next().unwrap() {
            target.keys.push(item.key.to_string());
        }
        (iterator.artifacts().clone(), target)
    }

    fn resync(root: &Rc<UpdatableReference>, ids: &[i64]) -> KeyList {
        let (artifacts, mut target) = first_pass(root);
        root.update(items(ids));
        IteratorSynchronizer::new(&artifacts, &mut target)
            .unwrap()
            .sync()
            .unwrap();
        let expected: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        assert_eq!(target.keys, expected);
        assert_eq!(artifacts.len(), ids.len());
        target
    }

    #[test]
    fn test_reverse_moves_without_recreating() {
        let root = Rc::new(UpdatableReference::new(items(&[1, 2, 3])));
        let target = resync(&root, &[3, 2, 1]);
        assert_eq!(target.edits, vec!["move 2", "move 1", "done"]);
    }

    #[test]
    fn test_insert_and_delete() {
        let root = Rc::new(UpdatableReference::new(items(&[1, 2, 3])));
        let target = resync(&root, &[1, 4, 3]);
        assert_eq!(target.edits, vec!["insert 4", "delete 2", "done"]);
    }

    #[test]
    fn test_failed_insert_is_retried_by_the_next_pass() {
        let root = Rc::new(UpdatableReference::new(items(&[1, 2, 3])));
        let (artifacts, mut target) = first_pass(&root);
        target.reject = Some("4".into());
        root.update(items(&[3, 4, 2]));
        let failed = IteratorSynchronizer::new(&artifacts, &mut target)
            .unwrap()
            .sync();
        assert!(matches!(failed, Err(RenderError::HelperFailed { .. })));
        assert!(!artifacts.has("4"));
        assert_eq!(target.keys, vec!["1", "2", "3"]);

        IteratorSynchronizer::new(&artifacts, &mut target)
            .unwrap()
            .sync()
            .unwrap();
        assert_eq!(target.keys, vec!["3", "4", "2"]);
        assert_eq!(artifacts.len(), 3);
    }

    #[test]
    fn test_mixed_reorder() {
        let root = Rc::new(UpdatableReference::new(items(&[1, 2, 3, 4, 5])));
        resync(&root, &[5, 1, 6, 3, 2]);
    }

    #[test]
    fn test_retained_item_sees_new_value() {
        let root = Rc::new(UpdatableReference::new(v_list(&[
            v_map(&[("id", v_int(1)), ("name", v_str("A"))]),
        ])));
        let (artifacts, mut target) = first_pass(&root);
        let refs = artifacts.refs(artifacts.head().unwrap());
        root.update(v_list(&[v_map(&[("id", v_int(1)), ("name", v_str("B"))])]));
        IteratorSynchronizer::new(&artifacts, &mut target)
            .unwrap()
            .sync()
            .unwrap();
        assert_eq!(refs.value.get().get_key("name"), v_str("B"));
        assert_eq!(target.edits, vec!["done"]);
    }

    #[test]
    fn test_duplicate_keys_do_not_panic() {
        let root = Rc::new(UpdatableReference::new(items(&[1, 1, 2])));
        let (artifacts, mut target) = first_pass(&root);
        root.update(items(&[2, 1, 1, 1]));
        IteratorSynchronizer::new(&artifacts, &mut target)
            .unwrap()
            .sync()
            .unwrap();
    }

    #[test]
    fn test_presence_and_key_modes() {
        let root = Rc::new(UpdatableReference::new(v_empty_list()));
        let iterable = Rc::new(ListIterable::new(root.clone(), KeyFor::Index));
        let artifacts = Rc::new(IterationArtifacts::new(iterable));
        let presence = IterablePresenceReference::new(artifacts.clone());
        assert_eq!(presence.value().unwrap(), v_bool(false));
        root.update(v_list(&[v_str("x"), v_str("x")]));
        assert_eq!(presence.value().unwrap(), v_bool(true));
        let mut iterator = artifacts.iterate().unwrap();
        let keys: Vec<_> = std::iter::from_fn(|| iterator.next().map(|i| i.key)).collect();
        assert_eq!(keys, vec![ArcStr::from("0"), ArcStr::from("1")]);
    }

    #[test]
    fn test_scalar_is_not_iterable() {
        let iterable = ListIterable::new(
            Rc::new(UpdatableReference::new(v_int(3))),
            KeyFor::Identity,
        );
        assert!(matches!(
            iterable.iterate().err(),
            Some(RenderError::NotIterable(_))
        ));
    }
}
