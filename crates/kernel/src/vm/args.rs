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

//! Arguments as a component, helper, modifier or block receives them.

use crate::environment::HelperFn;
use arcstr::ArcStr;
use smallvec::SmallVec;
use std::rc::Rc;
use trellis_common::model::RenderError;
use trellis_common::reference::{Reference, ReferenceRc, Tag};
use trellis_var::{Var, v_undefined};

/// Positional and named references, plus the blocks passed along with them. Blocks are
/// compiled block handles; `None` means the invocation did not supply that block.
#[derive(Clone, Debug, Default)]
pub struct EvaluatedArgs {
    pub positional: SmallVec<[ReferenceRc; 4]>,
    pub named: Vec<(ArcStr, ReferenceRc)>,
    pub blocks: Vec<(ArcStr, Option<u32>)>,
}

impl EvaluatedArgs {
    pub fn positional<I: IntoIterator<Item = ReferenceRc>>(refs: I) -> Self {
        Self {
            positional: refs.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn tag(&self) -> Tag {
        Tag::combine(
            self.positional
                .iter()
                .chain(self.named.iter().map(|(_, r)| r))
                .map(|r| r.tag()),
        )
    }

    pub fn at(&self, index: usize) -> Option<&ReferenceRc> {
        self.positional.get(index)
    }

    pub fn named(&self, name: &str) -> Option<&ReferenceRc> {
        self.named
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, r)| r)
    }

    pub fn block(&self, name: &str) -> Option<u32> {
        self.blocks
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .and_then(|(_, b)| *b)
    }

    pub fn positional_values(&self) -> Result<Vec<Var>, RenderError> {
        self.positional.iter().map(|r| r.value()).collect()
    }

    /// The value of a named argument, `undefined` when it was not passed.
    pub fn named_value(&self, name: &str) -> Result<Var, RenderError> {
        match self.named(name) {
            Some(r) => r.value(),
            None => Ok(v_undefined()),
        }
    }
}

/// The named arguments as one map value. The `self` of a basic component.
pub struct NamedArgsReference {
    args: Rc<EvaluatedArgs>,
}

impl NamedArgsReference {
    pub fn new(args: Rc<EvaluatedArgs>) -> Self {
        Self { args }
    }
}

impl Reference for NamedArgsReference {
    fn tag(&self) -> Tag {
        Tag::combine(self.args.named.iter().map(|(_, r)| r.tag()))
    }

    fn value(&self) -> Result<Var, RenderError> {
        let mut pairs = Vec::with_capacity(self.args.named.len());
        for (name, r) in &self.args.named {
            pairs.push((name.clone(), r.value()?));
        }
        Ok(Var::mk_map_iter(pairs))
    }
}

/// A helper call. Re-invoked on every read; changes when any argument does.
pub(crate) struct HelperReference {
    helper: HelperFn,
    args: Rc<EvaluatedArgs>,
}

impl HelperReference {
    pub(crate) fn new(helper: HelperFn, args: Rc<EvaluatedArgs>) -> Self {
        Self { helper, args }
    }
}

impl Reference for HelperReference {
    fn tag(&self) -> Tag {
        self.args.tag()
    }

    fn value(&self) -> Result<Var, RenderError> {
        (self.helper)(&self.args)
    }
}
