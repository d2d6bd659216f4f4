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

use crate::model::RenderError;
use crate::reference::tag::{DirtyableTag, Revision, Tag};
use arcstr::ArcStr;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use trellis_var::{Var, v_bool, v_string};

/// A readable value plus the tag that witnesses when it may have changed.
pub trait Reference {
    fn tag(&self) -> Tag;
    fn value(&self) -> Result<Var, RenderError>;
}

pub type ReferenceRc = Rc<dyn Reference>;

impl Debug for dyn Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Ok(v) => write!(f, "Reference({v:?})"),
            Err(e) => write!(f, "Reference(<{e}>)"),
        }
    }
}

pub struct ConstReference(Var);

impl ConstReference {
    pub fn new(value: Var) -> Self {
        Self(value)
    }
}

impl Reference for ConstReference {
    fn tag(&self) -> Tag {
        Tag::Constant
    }

    fn value(&self) -> Result<Var, RenderError> {
        Ok(self.0.clone())
    }
}

pub fn const_ref(value: Var) -> ReferenceRc {
    Rc::new(ConstReference(value))
}

/// A root value the embedder (or a list item) replaces over time.
pub struct UpdatableReference {
    value: RefCell<Var>,
    dirty: Rc<DirtyableTag>,
    tag: Tag,
}

impl UpdatableReference {
    pub fn new(value: Var) -> Self {
        let (tag, dirty) = Tag::dirtyable();
        Self {
            value: RefCell::new(value),
            dirty,
            tag,
        }
    }

    /// Replace the value, dirtying the tag only when it actually differs. Returns whether it did.
    pub fn update(&self, value: Var) -> bool {
        if *self.value.borrow() == value {
            return false;
        }
        self.value.replace(value);
        self.dirty.dirty();
        true
    }

    pub fn get(&self) -> Var {
        self.value.borrow().clone()
    }
}

impl Reference for UpdatableReference {
    fn tag(&self) -> Tag {
        self.tag.clone()
    }

    fn value(&self) -> Result<Var, RenderError> {
        Ok(self.get())
    }
}

/// `parent.key`. Shares its parent's tag.
pub struct PropertyReference {
    parent: ReferenceRc,
    key: ArcStr,
}

impl PropertyReference {
    pub fn new(parent: ReferenceRc, key: ArcStr) -> Self {
        Self { parent, key }
    }
}

impl Reference for PropertyReference {
    fn tag(&self) -> Tag {
        self.parent.tag()
    }

    fn value(&self) -> Result<Var, RenderError> {
        Ok(self.parent.value()?.get_key(&self.key))
    }
}

pub struct ConcatReference {
    parts: Vec<ReferenceRc>,
}

impl ConcatReference {
    pub fn new(parts: Vec<ReferenceRc>) -> Self {
        Self { parts }
    }
}

impl Reference for ConcatReference {
    fn tag(&self) -> Tag {
        Tag::combine(self.parts.iter().map(|p| p.tag()))
    }

    fn value(&self) -> Result<Var, RenderError> {
        let mut out = String::new();
        for part in &self.parts {
            out.push_str(&part.value()?.to_content_string());
        }
        Ok(v_string(out))
    }
}

/// How a value converts to a condition.
pub trait Truthiness {
    fn to_bool(&self, value: &Var) -> bool;
}

/// Plain boolean conversion, independent of any host policy.
pub struct SimpleTruthiness;

impl Truthiness for SimpleTruthiness {
    fn to_bool(&self, value: &Var) -> bool {
        value.is_truthy()
    }
}

/// A boolean view over another reference, converted through a truthiness policy.
pub struct ConditionalReference {
    inner: ReferenceRc,
    policy: Rc<dyn Truthiness>,
}

impl ConditionalReference {
    pub fn new(inner: ReferenceRc, policy: Rc<dyn Truthiness>) -> Self {
        Self { inner, policy }
    }
}

impl Reference for ConditionalReference {
    fn tag(&self) -> Tag {
        self.inner.tag()
    }

    fn value(&self) -> Result<Var, RenderError> {
        let value = self.inner.value()?;
        Ok(v_bool(self.policy.to_bool(&value)))
    }
}

/// The last value read from a reference, and the revision it was read at.
pub struct ReferenceCache {
    reference: ReferenceRc,
    last_value: Var,
    last_revision: Revision,
}

impl ReferenceCache {
    pub fn new(reference: ReferenceRc) -> Result<Self, RenderError> {
        let last_revision = reference.tag().value();
        let last_value = reference.value()?;
        Ok(Self {
            reference,
            last_value,
            last_revision,
        })
    }

    pub fn peek(&self) -> &Var {
        &self.last_value
    }

    pub fn tag(&self) -> Tag {
        self.reference.tag()
    }

    pub fn reference(&self) -> &ReferenceRc {
        &self.reference
    }

    /// The new value if the reference's tag moved and its value differs from the cached one.
    /// A failed read leaves the cache as it was.
    pub fn revalidate(&mut self) -> Result<Option<Var>, RenderError> {
        let tag = self.reference.tag();
        if tag.validate(self.last_revision) {
            return Ok(None);
        }
        let revision = tag.value();
        let value = self.reference.value()?;
        self.last_revision = revision;
        if value == self.last_value {
            return Ok(None);
        }
        self.last_value = value.clone();
        Ok(Some(value))
    }

    /// Whether the reference now holds a different value than the cached one. The cache only
    /// advances when it does not, so a caller that fails to act on a stale value sees it again.
    pub fn is_stale(&mut self) -> Result<bool, RenderError> {
        let tag = self.reference.tag();
        if tag.validate(self.last_revision) {
            return Ok(false);
        }
        let revision = tag.value();
        if self.reference.value()? != self.last_value {
            return Ok(true);
        }
        self.last_revision = revision;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_var::{v_int, v_map, v_str};

    #[test]
    fn test_property_reference_follows_root() {
        let root = Rc::new(UpdatableReference::new(v_map(&[("name", v_str("Tom"))])));
        let name = PropertyReference::new(root.clone(), "name".into());
        assert_eq!(name.value().unwrap(), v_str("Tom"));

        let snapshot = name.tag().value();
        assert!(!root.update(v_map(&[("name", v_str("Tom"))])));
        assert!(name.tag().validate(snapshot));

        assert!(root.update(v_map(&[("name", v_str("Jerry"))])));
        assert!(!name.tag().validate(snapshot));
        assert_eq!(name.value().unwrap(), v_str("Jerry"));
    }

    #[test]
    fn test_concat_tag_is_max_of_parts() {
        let a = Rc::new(UpdatableReference::new(v_str("a")));
        let b = Rc::new(UpdatableReference::new(v_int(1)));
        let concat = ConcatReference::new(vec![a.clone(), b.clone(), const_ref(v_str("!"))]);
        assert_eq!(concat.value().unwrap(), v_str("a1!"));
        assert_eq!(concat.tag().value(), a.tag().value().max(b.tag().value()));

        let before = concat.tag().value();
        b.update(v_int(2));
        assert!(concat.tag().value() > before);
        assert_eq!(concat.tag().value(), a.tag().value().max(b.tag().value()));
    }

    #[test]
    fn test_cache_reports_only_real_changes() {
        let root = Rc::new(UpdatableReference::new(v_int(0)));
        let cond: ReferenceRc = Rc::new(ConditionalReference::new(
            root.clone(),
            Rc::new(SimpleTruthiness),
        ));
        let mut cache = ReferenceCache::new(cond).unwrap();
        assert_eq!(cache.peek(), &v_bool(false));
        assert_eq!(cache.revalidate().unwrap(), None);

        root.update(v_str(""));
        assert_eq!(cache.revalidate().unwrap(), None);

        root.update(v_int(3));
        assert_eq!(cache.revalidate().unwrap(), Some(v_bool(true)));
        assert_eq!(cache.revalidate().unwrap(), None);
    }

    #[test]
    fn test_stale_check_does_not_advance_on_change() {
        let root = Rc::new(UpdatableReference::new(v_int(1)));
        let mut cache = ReferenceCache::new(root.clone()).unwrap();
        assert!(!cache.is_stale().unwrap());

        root.update(v_int(2));
        assert!(cache.is_stale().unwrap());
        assert!(cache.is_stale().unwrap());

        root.update(v_int(1));
        assert!(!cache.is_stale().unwrap());
    }
}
