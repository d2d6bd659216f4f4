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

//! The reference and tag model the incremental re-render path is built on.

pub mod iterable;
#[allow(clippy::module_inception)]
pub mod reference;
pub mod tag;

pub use iterable::{
    IterablePresenceReference, IterationArtifacts, IterationItem, IteratorSynchronizer, KeyFor,
    ListItemRefs, ListIterable, OpaqueIterable, OpaqueIterator, ReferenceIterator, SyncTarget,
};
pub use reference::{
    ConcatReference, ConditionalReference, ConstReference, PropertyReference, Reference,
    ReferenceCache, ReferenceRc, SimpleTruthiness, Truthiness, UpdatableReference, const_ref,
};
pub use tag::{DirtyableTag, Revision, Tag, current_revision};
