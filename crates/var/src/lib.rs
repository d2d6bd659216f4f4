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

//! Values flowing through compiled templates, and the bytecode those templates compile to.

pub mod program;
#[allow(clippy::module_inception)]
mod var;
mod variant;

pub use var::{
    Var, v_bool, v_empty_list, v_float, v_int, v_list, v_list_iter, v_map, v_null, v_str,
    v_string, v_undefined,
};
pub use variant::{VarMap, Variant};
