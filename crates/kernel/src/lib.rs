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

//! The template kernel: renders compiled programs into a tree, and keeps what it rendered up to
//! date as the references it read from change.

pub mod config;
pub mod dom;
pub mod environment;
pub mod testing;
pub mod vm;

pub use config::RenderConfig;
pub use environment::{
    ComponentDefinition, DefaultHost, Destroyable, Environment, HelperFn, Host, Registry,
};
pub use vm::{
    BasicComponentManager, Component, ComponentManager, DynamicScope, EvaluatedArgs, Modifier,
    ModifierManager, NamedArgsReference, RenderResult, RenderStats, RerenderOptions, render,
};
