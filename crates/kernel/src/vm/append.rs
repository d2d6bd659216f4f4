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

//! The append VM: executes a program slice against the DOM and records, region by region,
//! what has to be re-evaluated when its inputs change.

use crate::dom::{BlockBounds, Bounds, ElementStack, NodeId, clear};
use crate::environment::{Destroyable, Environment};
use crate::vm::RenderState;
use crate::vm::args::{EvaluatedArgs, HelperReference};
use crate::vm::frame::{Frame, FrameStack, SavedRegisters};
use crate::vm::scope::{DynamicScope, DynamicVarReference, Scope, ScopeArena, ScopeId, Slot};
use crate::vm::update::{
    CapturedState, ListRegion, RegionContent, TryRegion, UpdatingOp, apply_attr,
};
use arcstr::ArcStr;
use indexmap::IndexMap;
use std::rc::Rc;
use tracing::{trace, warn};
use trellis_common::model::RenderError;
use trellis_common::reference::{
    ConcatReference, ConditionalReference, IterablePresenceReference, PropertyReference,
    ReferenceCache, ReferenceIterator, ReferenceRc, SimpleTruthiness, Tag, Truthiness, const_ref,
    current_revision,
};
use trellis_compiler::{ATTRS_BLOCK, CompiledProgram, Function, TestKind};
use trellis_var::program::{Op, Opcode, Primitive, Slice};
use trellis_var::{v_bool, v_int, v_null, v_str, v_undefined};

#[derive(Debug)]
enum Operand {
    Reference(ReferenceRc),
    Args(Rc<EvaluatedArgs>),
    Block(Option<u32>),
}

/// A region whose output is still being appended.
enum RegionBuilder {
    Root(RegionContent),
    Try {
        slice: Slice,
        captured: CapturedState,
        bounds: Rc<BlockBounds>,
        /// Set for list items.
        key: Option<ArcStr>,
        content: RegionContent,
    },
    List(ListRegion),
}

impl RegionBuilder {
    fn discard(self, scopes: &mut ScopeArena) {
        match self {
            RegionBuilder::Root(mut content) | RegionBuilder::Try { mut content, .. } => {
                content.discard(scopes)
            }
            RegionBuilder::List(mut list) => {
                for (_, mut item) in list.items.drain(..) {
                    item.content.discard(scopes);
                }
            }
        }
    }
}

pub(crate) struct AppendVm<'s> {
    state: &'s mut RenderState,
    env: Rc<Environment>,
    program: Rc<CompiledProgram>,
    frames: FrameStack,
    stack: Vec<Operand>,
    scopes: Vec<ScopeId>,
    dynamic: Vec<DynamicScope>,
    elements: ElementStack,
    regions: Vec<RegionBuilder>,
    /// Open component cache groups: the region depth and op index of each placeholder.
    groups: Vec<(usize, usize)>,
    trace: bool,
}

impl<'s> AppendVm<'s> {
    /// Run `slice` from its start with the registers, scope and dynamic scope of `captured`,
    /// appending into `parent` in front of `next_sibling`.
    ///
    /// On failure every node this run inserted is removed again and every scope it allocated is
    /// released; the caller owns rolling back the transaction.
    pub(crate) fn resume(
        state: &'s mut RenderState,
        captured: &CapturedState,
        slice: Slice,
        parent: NodeId,
        next_sibling: Option<NodeId>,
    ) -> Result<(Rc<BlockBounds>, RegionContent), RenderError> {
        let env = state.env.clone();
        let program = state.program.clone();
        let mut frames = FrameStack::new(env.config().max_frame_depth);
        let mut frame = Frame::new(slice, captured.frame.saved.clone());
        frame.locals = captured.frame.locals.clone();
        frames.push(frame)?;

        let mut vm = AppendVm {
            state,
            elements: ElementStack::new(env.dom().clone(), parent, next_sibling),
            trace: env.config().trace_opcodes,
            env,
            program,
            frames,
            stack: vec![],
            scopes: vec![captured.scope],
            dynamic: vec![captured.dynamic.clone()],
            regions: vec![RegionBuilder::Root(RegionContent::default())],
            groups: vec![],
        };
        let result = vm.execute();
        vm.complete(result)
    }

    fn complete(
        self,
        result: Result<(), RenderError>,
    ) -> Result<(Rc<BlockBounds>, RegionContent), RenderError> {
        let AppendVm {
            state,
            env,
            mut frames,
            elements,
            mut regions,
            ..
        } = self;
        if let Err(e) = result {
            while frames.pop().is_some() {}
            state.stats.frame_pushes += frames.pushes;
            state.stats.frame_pops += frames.pops;
            let bounds = elements.unwind();
            clear(env.dom().as_ref(), bounds.parent(), &Bounds::Block(bounds));
            while let Some(builder) = regions.pop() {
                builder.discard(&mut state.scopes);
            }
            return Err(e);
        }
        state.stats.frame_pushes += frames.pushes;
        state.stats.frame_pops += frames.pops;
        assert_eq!(regions.len(), 1, "bug: unbalanced regions");
        let bounds = elements.finish();
        match regions.pop() {
            Some(RegionBuilder::Root(content)) => Ok((bounds, content)),
            _ => panic!("bug: the outermost region is not the root"),
        }
    }

    fn execute(&mut self) -> Result<(), RenderError> {
        loop {
            let Some(frame) = self.frames.current() else {
                return Ok(());
            };
            if frame.is_done() {
                self.pop_frame();
                continue;
            }
            let ip = frame.ip;
            let opcode = *self.program.program.opcode(ip);
            self.frames.current_mut().ip = ip + 1;
            self.state.stats.opcodes += 1;
            if self.trace {
                trace!(
                    ip,
                    op = %opcode.op,
                    op1 = opcode.op1,
                    op2 = opcode.op2,
                    op3 = opcode.op3,
                    depth = self.frames.depth(),
                    "execute"
                );
            }
            self.step(opcode)?;
        }
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.current_mut()
    }

    fn push_frame(
        &mut self,
        slice: Slice,
        args: Rc<EvaluatedArgs>,
        scope: ScopeId,
        dynamic: Option<DynamicScope>,
    ) -> Result<&mut Frame, RenderError> {
        let mut frame = Frame::new(
            slice,
            SavedRegisters {
                args,
                ..Default::default()
            },
        );
        frame.scope_depth = self.scopes.len();
        frame.dynamic_depth = self.dynamic.len();
        self.frames.push(frame)?;
        self.scopes.push(scope);
        if let Some(dynamic) = dynamic {
            self.dynamic.push(dynamic);
        }
        Ok(self.frames.current_mut())
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.scopes.truncate(frame.scope_depth);
            self.dynamic.truncate(frame.dynamic_depth);
        }
    }

    fn scope_id(&self) -> ScopeId {
        *self
            .scopes
            .last()
            .unwrap_or_else(|| panic!("bug: no current scope"))
    }

    fn scope(&self) -> &Scope {
        self.state.scopes.get(self.scope_id())
    }

    fn scope_mut(&mut self) -> &mut Scope {
        let id = self.scope_id();
        self.state.scopes.get_mut(id)
    }

    fn dynamic_scope(&self) -> &DynamicScope {
        self.dynamic
            .last()
            .unwrap_or_else(|| panic!("bug: no current dynamic scope"))
    }

    fn capture(&self) -> CapturedState {
        CapturedState {
            frame: self.frames.capture(),
            scope: self.scope_id(),
            dynamic: self.dynamic_scope().clone(),
        }
    }

    fn content(&mut self) -> &mut RegionContent {
        match self.regions.last_mut() {
            Some(RegionBuilder::Root(content)) | Some(RegionBuilder::Try { content, .. }) => content,
            Some(RegionBuilder::List(_)) => panic!("bug: output recorded directly into a list"),
            None => panic!("bug: no open region"),
        }
    }

    fn record(&mut self, op: UpdatingOp) {
        self.content().ops.push(op);
    }

    /// A scope allocated here lives as long as the region being rendered.
    fn child_scope(&mut self, parent: ScopeId) -> ScopeId {
        let child = self.state.scopes.child(parent);
        self.content().scopes.push(child);
        child
    }

    fn push(&mut self, reference: ReferenceRc) {
        self.stack.push(Operand::Reference(reference));
    }

    fn pop_reference(&mut self) -> ReferenceRc {
        match self.stack.pop() {
            Some(Operand::Reference(r)) => r,
            other => panic!("bug: expected a reference on the stack, found {other:?}"),
        }
    }

    fn pop_references(&mut self, count: usize) -> Vec<ReferenceRc> {
        let Some(at) = self.stack.len().checked_sub(count) else {
            panic!("bug: stack underflow popping {count} references");
        };
        self.stack
            .drain(at..)
            .map(|operand| match operand {
                Operand::Reference(r) => r,
                other => panic!("bug: expected a reference on the stack, found {other:?}"),
            })
            .collect()
    }

    fn pop_args(&mut self) -> Rc<EvaluatedArgs> {
        match self.stack.pop() {
            Some(Operand::Args(args)) => args,
            other => panic!("bug: expected args on the stack, found {other:?}"),
        }
    }

    fn pop_block(&mut self) -> Option<u32> {
        match self.stack.pop() {
            Some(Operand::Block(block)) => block,
            other => panic!("bug: expected a block on the stack, found {other:?}"),
        }
    }

    /// Positional references followed by one reference per name of the `names` array.
    fn collect_args(&mut self, positional: u32, names: u32) -> EvaluatedArgs {
        let names = self.program.constants.get_string_array(names);
        let named = self.pop_references(names.len());
        let positional = self.pop_references(positional as usize);
        EvaluatedArgs {
            positional: positional.into_iter().collect(),
            named: names.into_iter().zip(named).collect(),
            blocks: vec![],
        }
    }

    /// The block bound at `symbol`, or when `name` is set, the block of that name in the
    /// partial args bag at `symbol`.
    fn lookup_block(&self, symbol: u32, name: u32) -> Option<u32> {
        if name == 0 {
            return self.scope().block(symbol);
        }
        let name = self.program.constants.get_string(name);
        self.scope()
            .partial_args(symbol)
            .and_then(|args| args.block(name))
    }

    fn step(&mut self, o: Opcode) -> Result<(), RenderError> {
        let program = self.program.clone();
        let constants = &program.constants;
        match o.op {
            Op::Text => {
                self.elements.append_text(constants.get_string(o.op1));
            }
            Op::Comment => {
                self.elements.append_comment(constants.get_string(o.op1));
            }
            Op::OpenElement => {
                self.elements.open_element(constants.get_string(o.op1));
            }
            Op::FlushElement => {
                self.elements.flush_element();
            }
            Op::CloseElement => self.elements.close_element(),
            Op::StaticAttr => {
                let namespace = (o.op3 != 0).then(|| constants.get_string(o.op3).as_str());
                self.elements.set_attribute(
                    constants.get_string(o.op1),
                    constants.get_string(o.op2),
                    namespace,
                );
            }
            Op::DynamicAttr => {
                let cache = ReferenceCache::new(self.pop_reference())?;
                let element = self.elements.constructing();
                let name = constants.get_string(o.op1).clone();
                let namespace = (o.op2 != 0).then(|| constants.get_string(o.op2).clone());
                apply_attr(
                    self.env.dom().as_ref(),
                    element,
                    &name,
                    namespace.as_deref(),
                    cache.peek(),
                );
                if !cache.tag().is_const() {
                    self.record(UpdatingOp::UpdateAttr {
                        element,
                        name,
                        namespace,
                        cache,
                    });
                }
            }
            Op::Modifier => {
                let args = self.pop_args();
                let name = constants.get_string(o.op1);
                let Some(manager) = self.env.registry().modifier(name).cloned() else {
                    return Err(RenderError::UnknownModifier(name.to_string()));
                };
                let modifier = manager.create(self.elements.constructing(), args.clone(), self.env.dom())?;
                self.env.schedule_install_modifier(modifier.clone())?;
                self.content()
                    .destroyables
                    .push(Destroyable::Modifier(modifier.clone()));
                if !args.tag().is_const() {
                    let last = args.tag().value();
                    self.record(UpdatingOp::UpdateModifier {
                        modifier,
                        args,
                        last,
                    });
                }
            }
            Op::DynamicContent => {
                let cache = ReferenceCache::new(self.pop_reference())?;
                let content = cache.peek().to_content_string();
                let dynamic = !cache.tag().is_const();
                if o.op1 != 0 {
                    let bounds = self.elements.push_simple_block();
                    self.elements.append_raw(&content);
                    self.elements.pop_block();
                    if dynamic {
                        self.record(UpdatingOp::UpdateRaw { bounds, cache });
                    }
                } else {
                    let node = self.elements.append_text(&content);
                    if dynamic {
                        self.record(UpdatingOp::UpdateText { node, cache });
                    }
                }
            }

            Op::PushSelf => {
                let this = self.scope().self_ref().clone();
                self.push(this);
            }
            Op::PushSymbol => {
                let reference = self.scope().reference(o.op1);
                self.push(reference);
            }
            Op::GetKey => {
                let parent = self.pop_reference();
                let key = constants.get_string(o.op1).clone();
                self.push(Rc::new(PropertyReference::new(parent, key)));
            }
            Op::PushPrimitive => {
                let value = match Primitive::decode(o.op1) {
                    Primitive::Number(n) => v_int(n as i64),
                    Primitive::String(handle) => v_str(constants.get_string(handle)),
                    Primitive::Bool(b) => v_bool(b),
                    Primitive::Null => v_null(),
                    Primitive::Undefined => v_undefined(),
                };
                self.push(const_ref(value));
            }
            Op::PushImmediate => {
                self.push(const_ref(constants.get_value(o.op1).clone()));
            }
            Op::Concat => {
                let parts = self.pop_references(o.op1 as usize);
                self.push(Rc::new(ConcatReference::new(parts)));
            }
            Op::Helper => {
                let args = self.pop_args();
                let name = constants.get_string(o.op1);
                let Some(helper) = self.env.registry().helper(name).cloned() else {
                    return Err(RenderError::UnknownHelper(name.to_string()));
                };
                self.push(Rc::new(HelperReference::new(helper, args)));
            }
            Op::PushArgs => {
                let args = self.collect_args(o.op1, o.op2);
                self.stack.push(Operand::Args(Rc::new(args)));
            }
            Op::HasBlock => {
                let block = self.lookup_block(o.op1, o.op2);
                self.push(const_ref(v_bool(block.is_some())));
            }
            Op::HasBlockParams => {
                let block = self.lookup_block(o.op1, o.op2);
                let has_params = block.is_some_and(|b| program.block(b).has_params());
                self.push(const_ref(v_bool(has_params)));
            }
            Op::GetBlock => {
                let block = self.scope().block(o.op1);
                self.stack.push(Operand::Block(block));
            }
            Op::GetEvalBlock => {
                let block = self.lookup_block(o.op1, o.op2);
                self.stack.push(Operand::Block(block));
            }
            Op::GetDynamicVar => {
                let name = self.pop_reference();
                let scope = self.dynamic_scope().clone();
                self.push(Rc::new(DynamicVarReference::new(scope, name)));
            }

            Op::PushDynamicScope => {
                let child = self.dynamic_scope().clone();
                self.dynamic.push(child);
            }
            Op::PopDynamicScope => {
                self.dynamic.pop();
            }
            Op::BindDynamicScope => {
                let args = self.frame().saved.args.clone();
                let Some(scope) = self.dynamic.last_mut() else {
                    panic!("bug: no current dynamic scope");
                };
                for name in constants.get_string_array(o.op1) {
                    if let Some(reference) = args.named(&name) {
                        scope.set(name, reference.clone());
                    }
                }
            }
            Op::ReserveLocals => {
                self.frame().locals = vec![None; o.op1 as usize];
            }
            Op::ReleaseLocals => {
                self.frame().locals.clear();
            }
            Op::PutLocal => {
                let reference = self.pop_reference();
                let locals = &mut self.frame().locals;
                let index = o.op1 as usize;
                if locals.len() <= index {
                    locals.resize(index + 1, None);
                }
                locals[index] = Some(reference);
            }
            Op::PushLocal => {
                let Some(Some(reference)) = self.frame().locals.get(o.op1 as usize).cloned()
                else {
                    panic!("bug: local {} read before it was written", o.op1);
                };
                self.push(reference);
            }
            Op::BindPositionalArgs => {
                let args = self.frame().saved.args.clone();
                let scope = self.scope_mut();
                for (i, symbol) in constants.get_array(o.op1).iter().enumerate() {
                    let reference = args
                        .at(i)
                        .cloned()
                        .unwrap_or_else(|| const_ref(v_undefined()));
                    scope.bind(*symbol, Slot::Reference(reference));
                }
            }
            Op::BindNamedArgs => {
                let args = self.frame().saved.args.clone();
                let names = constants.get_string_array(o.op1);
                let symbols = constants.get_array(o.op2);
                let scope = self.scope_mut();
                for (name, symbol) in names.iter().zip(symbols) {
                    let reference = args
                        .named(name)
                        .cloned()
                        .unwrap_or_else(|| const_ref(v_undefined()));
                    scope.bind(*symbol, Slot::Reference(reference));
                }
            }
            Op::BindBlocks => {
                let args = self.frame().saved.args.clone();
                let names = constants.get_string_array(o.op1);
                let symbols = constants.get_array(o.op2);
                let scope = self.scope_mut();
                for (name, symbol) in names.iter().zip(symbols) {
                    scope.bind(*symbol, Slot::Block(args.block(name)));
                }
            }
            Op::BindPartialArgs => {
                let args = self.frame().saved.args.clone();
                self.scope_mut().bind(o.op1, Slot::PartialArgs(args));
            }
            Op::BindCallerScope => {
                if let Some(caller) = self.frame().volatile.caller_scope {
                    self.scope_mut().set_caller(caller);
                }
            }

            Op::Enter => {
                let slice = constants.get_slice(o.op1);
                self.enter(slice, None);
            }
            Op::Exit => self.exit()?,
            Op::Evaluate => {
                let block = program.block(o.op1);
                let args = self.frame().saved.args.clone();
                let scope = if block.has_params() {
                    self.child_scope(self.scope_id())
                } else {
                    self.scope_id()
                };
                self.push_frame(block.slice, args, scope, None)?;
            }
            Op::Jump => self.frame().goto(o.op1 as usize),
            Op::JumpIf | Op::JumpUnless => {
                let Some(condition) = self.frame().saved.condition.clone() else {
                    panic!("bug: {} without a condition", o.op);
                };
                let cache = ReferenceCache::new(condition)?;
                let value = cache.peek().is_truthy();
                if !cache.tag().is_const() {
                    self.record(UpdatingOp::Assert { cache });
                }
                if value == (o.op == Op::JumpIf) {
                    self.frame().goto(o.op1 as usize);
                }
            }
            Op::Test => {
                let operand = self
                    .frame()
                    .saved
                    .operand
                    .clone()
                    .unwrap_or_else(|| const_ref(v_undefined()));
                let condition: ReferenceRc = match constants.get_function(o.op1) {
                    Function::Test(TestKind::Const) => {
                        const_ref(v_bool(self.env.host().to_bool(&operand.value()?)))
                    }
                    Function::Test(TestKind::Simple) => Rc::new(ConditionalReference::new(
                        operand,
                        Rc::new(SimpleTruthiness),
                    )),
                    Function::Test(TestKind::Environment) => {
                        let policy: Rc<dyn Truthiness> = self.env.host().clone();
                        Rc::new(ConditionalReference::new(operand, policy))
                    }
                };
                self.frame().saved.condition = Some(condition);
            }
            Op::PutArgs => {
                let args = Rc::new(self.collect_args(o.op1, o.op2));
                let frame = self.frame();
                frame.saved.operand = args.at(0).cloned();
                frame.saved.args = args;
            }
            Op::OpenBlock => {
                let block = self.pop_block();
                let params = self.pop_references(o.op1 as usize);
                let Some(block) = block else {
                    return Ok(());
                };
                let compiled = program.block(block);
                let current = self.scope_id();
                let caller = self.state.scopes.get(current).caller().unwrap_or(current);
                let scope = if compiled.has_params() {
                    self.child_scope(caller)
                } else {
                    caller
                };
                let args = Rc::new(EvaluatedArgs::positional(params));
                self.push_frame(compiled.slice, args, scope, None)?;
            }
            Op::CloseBlock | Op::Noop => {}

            Op::PutIterator => {
                let args = self.frame().saved.args.clone();
                let list = args
                    .at(0)
                    .cloned()
                    .unwrap_or_else(|| const_ref(v_undefined()));
                let key = match args.named("key") {
                    Some(key) => key.value()?.to_content_string(),
                    None => String::new(),
                };
                let iterator = ReferenceIterator::new(self.env.host().iterable_for(list, &key)?);
                let condition: ReferenceRc =
                    Rc::new(IterablePresenceReference::new(iterator.artifacts().clone()));
                let frame = self.frame();
                frame.saved.condition = Some(condition);
                frame.volatile.iterator = Some(iterator);
            }
            Op::EnterList => {
                let item_slice = constants.get_slice(o.op1);
                let Some(artifacts) = self
                    .frame()
                    .volatile
                    .iterator
                    .as_ref()
                    .map(|iterator| iterator.artifacts().clone())
                else {
                    panic!("bug: list entered without an iterator");
                };
                let state = self.capture();
                let bounds = self.elements.push_list_block();
                self.regions.push(RegionBuilder::List(ListRegion {
                    item_slice,
                    state,
                    artifacts,
                    last: current_revision(),
                    bounds,
                    items: IndexMap::new(),
                }));
            }
            Op::ExitList => {
                let Some(RegionBuilder::List(list)) = self.regions.pop() else {
                    panic!("bug: ExitList outside of a list");
                };
                list.bounds
                    .set_items(list.items.values().map(|item| item.bounds.clone()).collect());
                self.elements.pop_block();
                self.record(UpdatingOp::List(Box::new(list)));
            }
            Op::EnterWithKey => {
                let slice = constants.get_slice(o.op1);
                let Some(key) = self.frame().volatile.key.take() else {
                    panic!("bug: EnterWithKey without an item");
                };
                self.enter(slice, Some(key));
            }
            Op::NextIter => {
                let frame = self.frame();
                let Some(iterator) = frame.volatile.iterator.as_mut() else {
                    panic!("bug: NextIter without an iterator");
                };
                match iterator.next()? {
                    Some(item) => {
                        frame.saved.args = Rc::new(EvaluatedArgs::positional([
                            item.value as ReferenceRc,
                            item.memo as ReferenceRc,
                        ]));
                        frame.volatile.key = Some(item.key);
                    }
                    None => frame.goto(o.op1 as usize),
                }
            }

            Op::PutPartial => {
                self.frame().volatile.partial = Some(o.op1);
            }
            Op::PutDynamicPartial => {
                let cache = ReferenceCache::new(self.pop_reference())?;
                let name = cache.peek().to_content_string();
                let names = constants.get_string_array(o.op1);
                let blocks = constants.get_array(o.op2);
                let Some(block) = names
                    .iter()
                    .position(|n| n.as_str() == name)
                    .and_then(|i| blocks.get(i).copied())
                else {
                    return Err(RenderError::UnknownPartial(name));
                };
                if !cache.tag().is_const() {
                    self.record(UpdatingOp::Assert { cache });
                }
                self.frame().volatile.partial = Some(block);
            }
            Op::EvaluatePartial => {
                let Some(block) = self.frame().volatile.partial.take() else {
                    panic!("bug: EvaluatePartial without a partial");
                };
                let compiled = program.block(block);
                let args = self.frame().saved.args.clone();
                let scope = self.scope_id();
                self.push_frame(compiled.slice, args, scope, None)?;
            }

            Op::PutComponent => {
                let name = constants.get_string(o.op1);
                let Some(definition) = self.env.registry().component(name).cloned() else {
                    return Err(RenderError::UnknownComponent(name.to_string()));
                };
                self.frame().volatile.definition = Some((definition, o.op2));
            }
            Op::OpenComponent => self.open_component(o)?,
            Op::DidCreateElement => {
                let Some((component, _)) = self.frame().volatile.component.clone() else {
                    panic!("bug: DidCreateElement outside of a layout");
                };
                component.did_create_element(self.elements.constructing());
            }
            Op::DidRenderLayout => {
                let Some((component, bounds)) = self.frame().volatile.component.clone() else {
                    panic!("bug: DidRenderLayout outside of a layout");
                };
                component.did_render_layout(&Bounds::Block(bounds.clone()));
                self.env.did_create(component.clone())?;
                self.record(UpdatingOp::DidUpdateLayout { component, bounds });
            }
            Op::CloseComponent => {
                self.elements.pop_block();
                let Some((depth, index)) = self.groups.pop() else {
                    panic!("bug: CloseComponent without an open component");
                };
                assert_eq!(
                    depth,
                    self.regions.len(),
                    "bug: component closed in another region"
                );
                let ops = &mut self.content().ops;
                let len = ops.len() - index - 1;
                ops[index] = UpdatingOp::CacheGroup {
                    len,
                    last: current_revision(),
                };
            }
        }
        Ok(())
    }

    fn enter(&mut self, slice: Slice, key: Option<ArcStr>) {
        let captured = self.capture();
        let bounds = self.elements.push_simple_block();
        self.regions.push(RegionBuilder::Try {
            slice,
            captured,
            bounds,
            key,
            content: RegionContent::default(),
        });
    }

    fn exit(&mut self) -> Result<(), RenderError> {
        let Some(RegionBuilder::Try {
            slice,
            captured,
            bounds,
            key,
            content,
        }) = self.regions.pop()
        else {
            panic!("bug: Exit outside of a region");
        };
        self.elements.pop_block();
        let region = TryRegion {
            slice,
            state: captured,
            bounds,
            content,
        };
        let Some(key) = key else {
            self.record(UpdatingOp::Try(Box::new(region)));
            return Ok(());
        };
        let Some(RegionBuilder::List(list)) = self.regions.last_mut() else {
            panic!("bug: keyed region outside of a list");
        };
        // Duplicate keys are the caller's mistake; the later item wins.
        if let Some(earlier) = list.items.shift_remove(&key) {
            warn!(%key, "duplicate key in list");
            earlier.remove(self.state)?;
        }
        list.items.insert(key, region);
        Ok(())
    }

    fn open_component(&mut self, o: Opcode) -> Result<(), RenderError> {
        let program = self.program.clone();
        let Some((definition, layout)) = self.frame().volatile.definition.take() else {
            panic!("bug: OpenComponent without PutComponent");
        };
        let block = |handle: u32| (handle != 0).then_some(handle);
        let mut args = (*self.pop_args()).clone();
        args.blocks = vec![
            (ArcStr::from("default"), block(o.op2)),
            (ArcStr::from("inverse"), block(o.op3)),
            (ArcStr::from("else"), block(o.op3)),
            (ArcStr::from(ATTRS_BLOCK), block(o.op1)),
        ];
        let args = Rc::new(args);
        let dynamic = self.dynamic_scope().clone();
        let component = definition.manager.create(&args, &dynamic, o.op2 != 0)?;
        trace!(component = %definition.name, "component created");

        // Placeholder, replaced by the group once the layout has been rendered.
        let index = self.content().ops.len();
        self.record(UpdatingOp::CacheGroup { len: 0, last: 0 });
        self.groups.push((self.regions.len(), index));
        let last = Tag::combine([args.tag(), component.tag()]).value();
        self.record(UpdatingOp::UpdateComponent {
            component: component.clone(),
            args: args.clone(),
            last,
        });
        self.content()
            .destroyables
            .push(Destroyable::Component(component.clone()));

        let bounds = self.elements.push_simple_block();
        let layout = program.block(layout);
        let scope = self.state.scopes.root(
            program.tables.size(layout.table),
            component.self_reference(),
        );
        self.content().scopes.push(scope);
        let caller = self.scope_id();

        let frame = self.push_frame(layout.slice, args, scope, Some(dynamic))?;
        frame.volatile.component = Some((component, bounds));
        frame.volatile.caller_scope = Some(caller);
        Ok(())
    }
}
