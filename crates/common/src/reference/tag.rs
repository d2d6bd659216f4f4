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

//! Revision tags: the invalidation witness every reference carries.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type Revision = u64;

/// Tags that never change report this revision.
pub const CONSTANT: Revision = 0;
/// The revision the clock starts at.
pub const INITIAL: Revision = 1;
/// Reported by volatile tags. Never validates.
pub const VOLATILE: Revision = u64::MAX;

static REVISION: AtomicU64 = AtomicU64::new(INITIAL);

/// The current value of the global revision clock.
pub fn current_revision() -> Revision {
    REVISION.load(Ordering::Acquire)
}

fn bump_revision() -> Revision {
    REVISION.fetch_add(1, Ordering::AcqRel) + 1
}

/// A tag that advances to a fresh revision whenever it is dirtied.
#[derive(Debug)]
pub struct DirtyableTag {
    revision: Cell<Revision>,
}

impl DirtyableTag {
    pub fn new() -> Self {
        Self {
            revision: Cell::new(current_revision()),
        }
    }

    pub fn dirty(&self) {
        self.revision.set(bump_revision());
    }

    pub fn value(&self) -> Revision {
        self.revision.get()
    }
}

impl Default for DirtyableTag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub enum Tag {
    Constant,
    Volatile,
    Dirtyable(Rc<DirtyableTag>),
    /// Changes whenever any of its members does.
    Combinator(Rc<[Tag]>),
}

impl Tag {
    pub fn dirtyable() -> (Tag, Rc<DirtyableTag>) {
        let tag = Rc::new(DirtyableTag::new());
        (Tag::Dirtyable(tag.clone()), tag)
    }

    /// Combine tags into one whose revision is the maximum of theirs. Constant members are
    /// dropped, and a single remaining member is returned as is.
    pub fn combine<I: IntoIterator<Item = Tag>>(tags: I) -> Tag {
        let mut members = vec![];
        for tag in tags {
            match tag {
                Tag::Constant => {}
                Tag::Volatile => return Tag::Volatile,
                other => members.push(other),
            }
        }
        match members.len() {
            0 => Tag::Constant,
            1 => members.pop().unwrap_or(Tag::Constant),
            _ => Tag::Combinator(members.into()),
        }
    }

    pub fn value(&self) -> Revision {
        match self {
            Tag::Constant => CONSTANT,
            Tag::Volatile => VOLATILE,
            Tag::Dirtyable(t) => t.value(),
            Tag::Combinator(members) => members.iter().map(Tag::value).max().unwrap_or(CONSTANT),
        }
    }

    /// True when nothing behind this tag changed since `snapshot` was taken from it.
    pub fn validate(&self, snapshot: Revision) -> bool {
        match self {
            Tag::Constant => true,
            Tag::Volatile => false,
            _ => {
                let value = self.value();
                value != VOLATILE && value <= snapshot
            }
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Tag::Constant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_tag_is_max_of_members() {
        let (a, a_dirty) = Tag::dirtyable();
        let (b, b_dirty) = Tag::dirtyable();
        let combined = Tag::combine([a.clone(), b.clone(), Tag::Constant]);
        assert_eq!(combined.value(), a.value().max(b.value()));

        let before = combined.value();
        a_dirty.dirty();
        assert!(combined.value() > before);
        assert_eq!(combined.value(), a.value().max(b.value()));

        let snapshot = combined.value();
        assert!(combined.validate(snapshot));
        b_dirty.dirty();
        assert!(!combined.validate(snapshot));
        assert!(combined.value() >= snapshot);
    }

    #[test]
    fn test_constant_and_volatile() {
        assert!(Tag::Constant.validate(CONSTANT));
        assert!(!Tag::Volatile.validate(VOLATILE));
        assert!(Tag::combine([Tag::Constant, Tag::Constant]).is_const());
        let (a, _) = Tag::dirtyable();
        assert!(matches!(Tag::combine([a, Tag::Volatile]), Tag::Volatile));
    }

    #[test]
    fn test_dirtying_never_goes_backwards() {
        let (tag, dirty) = Tag::dirtyable();
        let mut last = tag.value();
        for _ in 0..10 {
            dirty.dirty();
            assert!(tag.value() > last);
            last = tag.value();
        }
    }
}
