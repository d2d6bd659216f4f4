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

use serde::Serialize;
use thiserror::Error;

/// Failures raised while turning wire-format templates into a program. Template-author errors
/// name the offending construct; [`CompileError::UndefinedLabel`] is a compiler bug.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum CompileError {
    #[error("Compile Error: {0} is not a helper")]
    UnknownHelper(String),
    #[error("Compile Error: {0} is not a modifier")]
    UnknownModifier(String),
    #[error("Compile Error: {0} is not a block")]
    UnknownBlock(String),
    #[error("Compile Error: {0} is not a partial")]
    UnknownPartial(String),
    #[error("Compile Error: {0} is not a valid block name")]
    InvalidBlockName(String),
    #[error("Compile Error: unresolved symbol {0}")]
    UnresolvedSymbol(String),
    #[error("Compile Error: malformed primitive {0}")]
    MalformedPrimitive(String),
    #[error("Malformed wire format in {context}: {message}")]
    MalformedWireFormat { context: String, message: String },
    #[error("Compile Error: argument {0} used outside of a component layout")]
    ArgumentOutsideComponent(String),
    #[error("bug: jump or range to undefined label {label}")]
    UndefinedLabel { label: String },
    #[error("Failure to parse template: {0}")]
    Json(String),
}

impl CompileError {
    /// Internal invariant violations, as opposed to errors in the template being compiled.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CompileError::UndefinedLabel { .. })
    }

    pub fn malformed(context: &str, message: impl Into<String>) -> Self {
        CompileError::MalformedWireFormat {
            context: context.to_string(),
            message: message.into(),
        }
    }
}

/// Failures raised while rendering or re-rendering.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
pub enum RenderError {
    #[error("Host error: {0}")]
    Host(String),
    #[error("Helper {name} failed: {message}")]
    HelperFailed { name: String, message: String },
    #[error("{0} is not a partial")]
    UnknownPartial(String),
    #[error("{0} is not a helper")]
    UnknownHelper(String),
    #[error("{0} is not a component")]
    UnknownComponent(String),
    #[error("{0} is not a modifier")]
    UnknownModifier(String),
    #[error("Value is not iterable: {0}")]
    NotIterable(String),
    #[error("Frame stack overflow at depth {depth}")]
    StackOverflow { depth: usize },
    #[error("A transaction is already in progress")]
    TransactionInProgress,
    #[error("No transaction in progress")]
    NoTransaction,
    #[error("Render result was already destroyed")]
    Destroyed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(
            CompileError::UndefinedLabel {
                label: "END".into()
            }
            .is_fatal()
        );
        assert!(!CompileError::UnknownPartial("missing".into()).is_fatal());
        assert_eq!(
            CompileError::InvalidBlockName("else".into()).to_string(),
            "Compile Error: else is not a valid block name"
        );
    }
}
