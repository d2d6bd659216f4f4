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

//! A harness for driving whole renders from wire-format JSON: compile against a registry, render
//! into a `SimpleDom`, then change the context and re-render.

use crate::config::RenderConfig;
use crate::dom::{NodeId, SimpleDom, TreeConstruction};
use crate::environment::{DefaultHost, Environment, Host, Registry};
use crate::vm::{RenderResult, RerenderOptions, render};
use serde_json::Value;
use std::rc::Rc;
use std::sync::Arc;
use trellis_common::model::{CompileError, RenderError};
use trellis_common::reference::UpdatableReference;
use trellis_common::tracing::init_test_tracing;
use trellis_compiler::{SerializedTemplate, compile_template};
use trellis_var::Var;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HarnessError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct TestHarness {
    registry: Registry,
    config: RenderConfig,
    host: Rc<dyn Host>,
    dom: Rc<SimpleDom>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::with_config(RenderConfig::default())
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RenderConfig) -> Self {
        init_test_tracing();
        Self {
            registry: Registry::new(),
            config,
            host: Rc::new(DefaultHost),
            dom: Rc::new(SimpleDom::new()),
        }
    }

    pub fn with_host(mut self, host: Rc<dyn Host>) -> Self {
        self.host = host;
        self
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn dom(&self) -> &Rc<SimpleDom> {
        &self.dom
    }

    /// Compile `template` and render it into a fresh `<div>` with `context` as `this`.
    pub fn render(self, template: Value, context: Var) -> Result<Rendered, HarnessError> {
        let registry = Rc::new(self.registry);
        let template = Arc::new(SerializedTemplate::from_value(template)?);
        let program = Rc::new(compile_template(template, registry.clone())?);
        let env = Rc::new(Environment::new(
            registry,
            self.host,
            self.dom.clone(),
            self.config,
        ));

        let root = self.dom.create_element("div");
        self.dom.insert_before(self.dom.document(), root, None);
        let context = Rc::new(UpdatableReference::new(context));
        let result = render(
            env.clone(),
            program.clone(),
            program.entry(),
            context.clone(),
            root,
            None,
        )?;
        Ok(Rendered {
            dom: self.dom,
            env,
            root,
            context,
            result,
        })
    }
}

/// A render under way, with its context held open for updates.
pub struct Rendered {
    pub dom: Rc<SimpleDom>,
    pub env: Rc<Environment>,
    pub root: NodeId,
    pub context: Rc<UpdatableReference>,
    pub result: RenderResult,
}

impl Rendered {
    pub fn html(&self) -> String {
        self.dom.inner_html(self.root)
    }

    /// Replace the context. Nothing changes on screen until the next rerender.
    pub fn update(&self, context: Var) {
        self.context.update(context);
    }

    pub fn rerender(&mut self) -> Result<(), RenderError> {
        self.result.rerender(RerenderOptions::default())
    }

    /// Update the context and rerender, returning how many tree mutations it took.
    pub fn rerender_with(&mut self, context: Var) -> Result<usize, RenderError> {
        self.update(context);
        self.dom.reset_mutations();
        self.rerender()?;
        Ok(self.dom.mutations())
    }
}
