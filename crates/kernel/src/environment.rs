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

//! The render environment: name registry, host policies, tree construction and the transaction
//! that defers lifecycle hooks to the end of a render pass.

use crate::config::RenderConfig;
use crate::dom::DomChanges;
use crate::vm::{Component, ComponentManager, EvaluatedArgs, Modifier, ModifierManager};
use ahash::AHashMap;
use arcstr::ArcStr;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;
use trellis_common::model::RenderError;
use trellis_common::reference::{
    KeyFor, ListIterable, OpaqueIterable, ReferenceRc, Truthiness,
};
use trellis_compiler::{Resolver, SerializedTemplate};
use trellis_var::Var;

pub type HelperFn = Rc<dyn Fn(&EvaluatedArgs) -> Result<Var, RenderError>>;

pub struct ComponentDefinition {
    pub name: ArcStr,
    pub manager: Rc<dyn ComponentManager>,
    pub layout: Arc<SerializedTemplate>,
}

/// Everything a template can refer to by name.
#[derive(Default)]
pub struct Registry {
    helpers: AHashMap<ArcStr, HelperFn>,
    modifiers: AHashMap<ArcStr, Rc<dyn ModifierManager>>,
    components: AHashMap<ArcStr, Rc<ComponentDefinition>>,
    partials: AHashMap<ArcStr, Arc<SerializedTemplate>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_helper<F>(&mut self, name: &str, helper: F)
    where
        F: Fn(&EvaluatedArgs) -> Result<Var, RenderError> + 'static,
    {
        self.helpers.insert(ArcStr::from(name), Rc::new(helper));
    }

    pub fn register_modifier(&mut self, name: &str, manager: Rc<dyn ModifierManager>) {
        self.modifiers.insert(ArcStr::from(name), manager);
    }

    pub fn register_component(
        &mut self,
        name: &str,
        manager: Rc<dyn ComponentManager>,
        layout: Arc<SerializedTemplate>,
    ) {
        let name = ArcStr::from(name);
        let definition = ComponentDefinition {
            name: name.clone(),
            manager,
            layout,
        };
        self.components.insert(name, Rc::new(definition));
    }

    pub fn register_partial(&mut self, name: &str, template: Arc<SerializedTemplate>) {
        self.partials.insert(ArcStr::from(name), template);
    }

    pub fn helper(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name)
    }

    pub fn modifier(&self, name: &str) -> Option<&Rc<dyn ModifierManager>> {
        self.modifiers.get(name)
    }

    pub fn component(&self, name: &str) -> Option<&Rc<ComponentDefinition>> {
        self.components.get(name)
    }
}

impl Resolver for Registry {
    fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    fn has_modifier(&self, name: &str) -> bool {
        self.modifiers.contains_key(name)
    }

    fn component_layout(&self, name: &str) -> Option<Arc<SerializedTemplate>> {
        self.components.get(name).map(|c| c.layout.clone())
    }

    fn lookup_partial(&self, name: &str) -> Option<Arc<SerializedTemplate>> {
        self.partials.get(name).cloned()
    }

    fn partial_names(&self) -> Vec<ArcStr> {
        let mut names: Vec<_> = self.partials.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Policies the embedding application decides: what counts as true, and how a value is
/// iterated by `each`.
pub trait Host: Truthiness {
    fn iterable_for(
        &self,
        list: ReferenceRc,
        key: &str,
    ) -> Result<Rc<dyn OpaqueIterable>, RenderError> {
        Ok(Rc::new(ListIterable::new(list, KeyFor::parse(key))))
    }
}

/// JavaScript-style truthiness, lists and maps iterated the default way.
#[derive(Default)]
pub struct DefaultHost;

impl Truthiness for DefaultHost {
    fn to_bool(&self, value: &Var) -> bool {
        value.is_truthy()
    }
}

impl Host for DefaultHost {}

/// Something a region owns that must be told when the region goes away.
#[derive(Clone)]
pub enum Destroyable {
    Component(Rc<dyn Component>),
    Modifier(Rc<dyn Modifier>),
}

impl Destroyable {
    fn destroy(&self) {
        match self {
            Destroyable::Component(c) => c.destroy(),
            Destroyable::Modifier(m) => m.destroy(),
        }
    }
}

#[derive(Default)]
struct Transaction {
    created: Vec<Rc<dyn Component>>,
    updated: Vec<Rc<dyn Component>>,
    installs: Vec<Rc<dyn Modifier>>,
    updates: Vec<Rc<dyn Modifier>>,
    destructors: Vec<Destroyable>,
}

/// The queue lengths of the open transaction at some point of the pass.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Savepoint {
    created: usize,
    updated: usize,
    installs: usize,
    updates: usize,
    destructors: usize,
}

pub struct Environment {
    registry: Rc<Registry>,
    host: Rc<dyn Host>,
    dom: Rc<dyn DomChanges>,
    config: RenderConfig,
    transaction: RefCell<Option<Transaction>>,
}

impl Environment {
    pub fn new(
        registry: Rc<Registry>,
        host: Rc<dyn Host>,
        dom: Rc<dyn DomChanges>,
        config: RenderConfig,
    ) -> Self {
        Self {
            registry,
            host,
            dom,
            config,
            transaction: RefCell::new(None),
        }
    }

    pub fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    pub fn host(&self) -> &Rc<dyn Host> {
        &self.host
    }

    pub fn dom(&self) -> &Rc<dyn DomChanges> {
        &self.dom
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.borrow().is_some()
    }

    pub fn begin(&self) -> Result<(), RenderError> {
        let mut transaction = self.transaction.borrow_mut();
        if transaction.is_some() {
            return Err(RenderError::TransactionInProgress);
        }
        *transaction = Some(Transaction::default());
        Ok(())
    }

    fn with_transaction<F>(&self, f: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut Transaction),
    {
        match self.transaction.borrow_mut().as_mut() {
            Some(transaction) => {
                f(transaction);
                Ok(())
            }
            None => Err(RenderError::NoTransaction),
        }
    }

    pub fn did_create(&self, component: Rc<dyn Component>) -> Result<(), RenderError> {
        self.with_transaction(|t| t.created.push(component))
    }

    pub fn did_update(&self, component: Rc<dyn Component>) -> Result<(), RenderError> {
        self.with_transaction(|t| t.updated.push(component))
    }

    pub fn schedule_install_modifier(&self, modifier: Rc<dyn Modifier>) -> Result<(), RenderError> {
        self.with_transaction(|t| t.installs.push(modifier))
    }

    pub fn schedule_update_modifier(&self, modifier: Rc<dyn Modifier>) -> Result<(), RenderError> {
        self.with_transaction(|t| t.updates.push(modifier))
    }

    pub fn did_destroy(&self, destroyable: Destroyable) -> Result<(), RenderError> {
        self.with_transaction(|t| t.destructors.push(destroyable))
    }

    pub(crate) fn savepoint(&self) -> Result<Savepoint, RenderError> {
        match self.transaction.borrow().as_ref() {
            Some(t) => Ok(Savepoint {
                created: t.created.len(),
                updated: t.updated.len(),
                installs: t.installs.len(),
                updates: t.updates.len(),
                destructors: t.destructors.len(),
            }),
            None => Err(RenderError::NoTransaction),
        }
    }

    /// Forget every hook queued since `savepoint`; the work that queued them was unwound.
    pub(crate) fn rollback_to(&self, savepoint: Savepoint) {
        if let Some(t) = self.transaction.borrow_mut().as_mut() {
            t.created.truncate(savepoint.created);
            t.updated.truncate(savepoint.updated);
            t.installs.truncate(savepoint.installs);
            t.updates.truncate(savepoint.updates);
            t.destructors.truncate(savepoint.destructors);
        }
    }

    /// Close the transaction and run its deferred hooks.
    pub fn commit(&self) -> Result<(), RenderError> {
        // Taken out first: hooks may start reading the environment.
        let Some(t) = self.transaction.borrow_mut().take() else {
            return Err(RenderError::NoTransaction);
        };
        debug!(
            created = t.created.len(),
            updated = t.updated.len(),
            installs = t.installs.len(),
            updates = t.updates.len(),
            destructors = t.destructors.len(),
            "committing render transaction"
        );
        for component in &t.created {
            component.did_create();
        }
        for component in &t.updated {
            component.did_update();
        }
        for modifier in &t.installs {
            modifier.install();
        }
        for modifier in &t.updates {
            modifier.update();
        }
        for destroyable in &t.destructors {
            destroyable.destroy();
        }
        Ok(())
    }

    /// Drop the transaction without running anything it queued.
    pub fn rollback(&self) {
        if self.transaction.borrow_mut().take().is_some() {
            debug!("render transaction rolled back");
        }
    }
}
