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

use crate::var::Var;
use arcstr::ArcStr;
use indexmap::IndexMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Property maps keep their insertion order, so iteration over a map is stable across renders.
pub type VarMap = IndexMap<ArcStr, Var, ahash::RandomState>;

/// Our series of types
#[derive(Clone)]
pub enum Variant {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(ArcStr),
    List(Arc<Vec<Var>>),
    Map(Arc<VarMap>),
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Undefined, Variant::Undefined) => true,
            (Variant::Null, Variant::Null) => true,
            (Variant::Bool(l), Variant::Bool(r)) => l == r,
            (Variant::Int(l), Variant::Int(r)) => l == r,
            (Variant::Float(l), Variant::Float(r)) => l == r,
            (Variant::Int(l), Variant::Float(r)) => (*l as f64) == *r,
            (Variant::Float(l), Variant::Int(r)) => *l == (*r as f64),
            (Variant::Str(l), Variant::Str(r)) => l == r,
            // Shared storage is equal without walking it.
            (Variant::List(l), Variant::List(r)) => Arc::ptr_eq(l, r) || l == r,
            (Variant::Map(l), Variant::Map(r)) => Arc::ptr_eq(l, r) || l == r,
            _ => false,
        }
    }
}

impl Debug for Variant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Undefined => write!(f, "undefined"),
            Variant::Null => write!(f, "null"),
            Variant::Bool(b) => write!(f, "{b}"),
            Variant::Int(i) => write!(f, "{i}"),
            Variant::Float(fl) => write!(f, "{fl:?}"),
            Variant::Str(s) => write!(f, "{s:?}"),
            Variant::List(l) => f.debug_list().entries(l.iter()).finish(),
            Variant::Map(m) => f.debug_map().entries(m.iter()).finish(),
        }
    }
}
