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

use strum::{Display, EnumIter, FromRepr};

/// The closed instruction set shared by the compiler and the virtual machine.
///
/// Operands are plain `u32`s. String, array, block, slice, function and value operands are
/// handles into the constant pool, where `0` means "absent". Symbols are scope slot indices;
/// jump targets are absolute program positions.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromRepr, Display, EnumIter)]
pub enum Op {
    // DOM construction.
    /// `op1`: text string.
    Text,
    /// `op1`: comment string.
    Comment,
    /// `op1`: tag name string.
    OpenElement,
    FlushElement,
    CloseElement,
    /// `op1`: name, `op2`: value, `op3`: namespace (or 0).
    StaticAttr,
    /// Pops the value reference. `op1`: name, `op2`: namespace (or 0), `op3`: 1 when trusting.
    DynamicAttr,
    /// Pops evaluated args. `op1`: modifier name.
    Modifier,
    /// Pops a reference and appends it as content. `op1`: 1 when trusting.
    DynamicContent,

    // Expressions.
    PushSelf,
    /// `op1`: symbol.
    PushSymbol,
    /// Pops a reference, pushes its `op1` property.
    GetKey,
    /// `op1`: an encoded [`Primitive`].
    PushPrimitive,
    /// `op1`: value handle.
    PushImmediate,
    /// Pops `op1` references, pushes their concatenation.
    Concat,
    /// Pops evaluated args. `op1`: helper name.
    Helper,
    /// Pops `op1` positional references followed by one reference per name in the `op2` array,
    /// and pushes them as evaluated args.
    PushArgs,
    /// `op1`: block symbol. When `op2` names a block, `op1` holds a partial args bag and the
    /// block is looked up in it by that name.
    HasBlock,
    /// Operands as for [`Op::HasBlock`].
    HasBlockParams,
    /// Pushes the block bound at symbol `op1`.
    GetBlock,
    /// Pushes block `op2` (a name) out of the partial args bag at symbol `op1`.
    GetEvalBlock,
    /// Pops a name reference and pushes the dynamic variable it names.
    GetDynamicVar,

    // Scopes and bindings.
    PushDynamicScope,
    PopDynamicScope,
    /// Binds the current args' named values listed in the `op1` array into the dynamic scope.
    BindDynamicScope,
    /// Reserves `op1` frame locals.
    ReserveLocals,
    ReleaseLocals,
    /// Pops a reference into local `op1`.
    PutLocal,
    /// Pushes local `op1`.
    PushLocal,
    /// `op1`: array of symbols for the current args' positional values.
    BindPositionalArgs,
    /// `op1`: array of arg names, `op2`: array of symbols.
    BindNamedArgs,
    /// `op1`: array of block names, `op2`: array of symbols.
    BindBlocks,
    /// `op1`: partial args symbol.
    BindPartialArgs,
    BindCallerScope,

    // Control flow.
    /// Opens an updatable region over slice `op1`.
    Enter,
    Exit,
    /// Invokes block `op1` with the current args.
    Evaluate,
    /// `op1`: target.
    Jump,
    /// `op1`: target, taken when the condition is true.
    JumpIf,
    /// `op1`: target, taken when the condition is false.
    JumpUnless,
    /// Derives the condition from the operand with test function `op1`.
    Test,
    /// Like [`Op::PushArgs`], but stores the args (and their first positional as the operand)
    /// in the frame.
    PutArgs,
    /// Pops a block and `op1` positional references, and invokes the block in its caller's
    /// scope.
    OpenBlock,
    CloseBlock,
    Noop,

    // Lists.
    PutIterator,
    /// Opens a keyed list region; `op1` is the slice of one item.
    EnterList,
    ExitList,
    /// Opens the region of the current item; `op1` is the item slice.
    EnterWithKey,
    /// Advances the iterator, or jumps to `op1` when it is exhausted.
    NextIter,

    // Partials.
    /// `op1`: block handle of a resolved partial.
    PutPartial,
    /// Pops a name reference and selects among blocks `op2` by names `op1`.
    PutDynamicPartial,
    EvaluatePartial,

    // Components.
    /// `op1`: component name, `op2`: layout block.
    PutComponent,
    /// Pops evaluated args. `op1`: shadow block, `op2`: default block, `op3`: inverse block.
    OpenComponent,
    DidCreateElement,
    DidRenderLayout,
    CloseComponent,
}

/// One fixed-width instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Opcode {
    pub op: Op,
    pub op1: u32,
    pub op2: u32,
    pub op3: u32,
}

impl Default for Opcode {
    fn default() -> Self {
        Self::placeholder()
    }
}

impl Opcode {
    pub fn new(op: Op, op1: u32, op2: u32, op3: u32) -> Self {
        Self { op, op1, op2, op3 }
    }

    /// The record written where a jump or range will be patched in later.
    pub fn placeholder() -> Self {
        Self::new(Op::Noop, 0, 0, 0)
    }
}

const FLAG_SHIFT: u32 = 30;
const VALUE_MASK: u32 = (1 << FLAG_SHIFT) - 1;

/// Literal operands small enough to be encoded directly into `PushPrimitive`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Primitive {
    Number(u32),
    String(u32),
    Bool(bool),
    Null,
    Undefined,
}

impl Primitive {
    /// Largest number that fits inline; anything else goes through the value pool.
    pub const MAX_NUMBER: u32 = VALUE_MASK;

    pub fn encode(self) -> u32 {
        match self {
            Primitive::Number(n) => {
                debug_assert!(n <= VALUE_MASK);
                n
            }
            Primitive::String(handle) => (1 << FLAG_SHIFT) | handle,
            Primitive::Bool(false) => 2 << FLAG_SHIFT,
            Primitive::Bool(true) => (2 << FLAG_SHIFT) | 1,
            Primitive::Null => (2 << FLAG_SHIFT) | 2,
            Primitive::Undefined => (2 << FLAG_SHIFT) | 3,
        }
    }

    pub fn decode(operand: u32) -> Primitive {
        let value = operand & VALUE_MASK;
        match operand >> FLAG_SHIFT {
            0 => Primitive::Number(value),
            1 => Primitive::String(value),
            2 => match value {
                0 => Primitive::Bool(false),
                1 => Primitive::Bool(true),
                2 => Primitive::Null,
                3 => Primitive::Undefined,
                _ => panic!("bug: invalid primitive operand {operand:#x}"),
            },
            _ => panic!("bug: invalid primitive operand {operand:#x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;
    use test_case::test_case;

    #[test_case(Primitive::Number(0))]
    #[test_case(Primitive::Number(Primitive::MAX_NUMBER))]
    #[test_case(Primitive::String(17))]
    #[test_case(Primitive::Bool(true))]
    #[test_case(Primitive::Bool(false))]
    #[test_case(Primitive::Null)]
    #[test_case(Primitive::Undefined)]
    fn test_primitive_operand(p: Primitive) {
        assert_eq!(Primitive::decode(p.encode()), p);
    }

    #[test]
    fn test_op_repr_is_dense() {
        for (i, op) in Op::iter().enumerate() {
            assert_eq!(Op::from_repr(i as u8), Some(op));
        }
    }

    #[test]
    #[should_panic(expected = "invalid primitive operand")]
    fn test_bad_primitive_flag() {
        Primitive::decode(3 << 30);
    }
}
