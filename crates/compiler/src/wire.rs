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

//! The wire format: already-parsed, already-resolved statement trees handed to the compiler as
//! JSON tuples (`["append", expr, trusted]`, `["block", path, params, hash, template, inverse]`,
//! ...).

use arcstr::ArcStr;
use serde::Deserialize;
use serde_json::Value;
use trellis_common::model::CompileError;
use trellis_var::Var;

pub type Path = Vec<ArcStr>;

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// `{{foo}}`: a helper if one is registered under that name, otherwise `this.foo`.
    Unknown(Path),
    Arg(Path),
    /// A block parameter, followed by property lookups.
    Get(Path),
    SelfGet(Path),
    Concat(Vec<Expression>),
    HasBlock(ArcStr),
    HasBlockParams(ArcStr),
    Helper {
        path: Path,
        params: Vec<Expression>,
        hash: Hash,
    },
    Undefined,
    /// A string, number, boolean or null literal.
    Value(Var),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hash {
    pub names: Vec<ArcStr>,
    pub values: Vec<Expression>,
}

impl Hash {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Expression> {
        self.names
            .iter()
            .position(|n| n.as_str() == name)
            .map(|i| &self.values[i])
    }
}

/// A nested block, either inline or as an index into the template's `blocks`.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockRef {
    Index(usize),
    Inline(SerializedBlock),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Text(ArcStr),
    Comment(ArcStr),
    Append {
        value: Expression,
        trusted: bool,
    },
    Modifier {
        path: Path,
        params: Vec<Expression>,
        hash: Hash,
    },
    Block {
        path: Path,
        params: Vec<Expression>,
        hash: Hash,
        template: Option<BlockRef>,
        inverse: Option<BlockRef>,
    },
    /// An angle-bracket invocation that may or may not name a component.
    Component {
        tag: ArcStr,
        attrs: Vec<Statement>,
        args: Hash,
        block: SerializedBlock,
    },
    OpenElement {
        tag: ArcStr,
        block_params: Vec<ArcStr>,
    },
    FlushElement,
    CloseElement,
    StaticAttr {
        name: ArcStr,
        value: ArcStr,
        namespace: Option<ArcStr>,
    },
    DynamicAttr {
        name: ArcStr,
        value: Expression,
        namespace: Option<ArcStr>,
        trusting: bool,
    },
    StaticArg {
        name: ArcStr,
        value: Expression,
    },
    DynamicArg {
        name: ArcStr,
        value: Expression,
    },
    Yield {
        to: ArcStr,
        params: Vec<Expression>,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SerializedBlock {
    pub statements: Vec<Statement>,
    pub locals: Vec<ArcStr>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SerializedTemplate {
    pub block: SerializedBlock,
    /// The root element of a layout: its `open-element` and attributes.
    pub prelude: Option<Vec<Statement>>,
    pub named: Vec<ArcStr>,
    pub yields: Vec<ArcStr>,
    pub has_partials: bool,
    pub blocks: Vec<SerializedBlock>,
    pub meta: Value,
}

#[derive(Deserialize)]
struct RawBlock {
    #[serde(default)]
    statements: Vec<Value>,
    #[serde(default)]
    locals: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTemplate {
    #[serde(default)]
    statements: Vec<Value>,
    #[serde(default)]
    locals: Vec<String>,
    #[serde(default)]
    named: Vec<String>,
    #[serde(default)]
    yields: Vec<String>,
    #[serde(default)]
    has_partials: bool,
    #[serde(default)]
    blocks: Vec<RawBlock>,
    #[serde(default)]
    prelude: Option<Vec<Value>>,
    #[serde(default)]
    meta: Value,
}

impl SerializedTemplate {
    pub fn from_json(json: &str) -> Result<Self, CompileError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| CompileError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, CompileError> {
        let raw: RawTemplate =
            serde_json::from_value(value).map_err(|e| CompileError::Json(e.to_string()))?;
        let prelude = match &raw.prelude {
            Some(statements) => Some(parse_statements(statements)?),
            None => None,
        };
        Ok(Self {
            block: SerializedBlock {
                statements: parse_statements(&raw.statements)?,
                locals: interned(raw.locals),
            },
            prelude,
            named: interned(raw.named),
            yields: interned(raw.yields),
            has_partials: raw.has_partials,
            blocks: raw
                .blocks
                .into_iter()
                .map(|b| {
                    Ok(SerializedBlock {
                        statements: parse_statements(&b.statements)?,
                        locals: interned(b.locals),
                    })
                })
                .collect::<Result<_, CompileError>>()?,
            meta: raw.meta,
        })
    }

    /// Resolve a nested block reference against this template.
    pub fn block_ref<'a>(&'a self, r: &'a BlockRef) -> Result<&'a SerializedBlock, CompileError> {
        match r {
            BlockRef::Inline(block) => Ok(block),
            BlockRef::Index(i) => self.blocks.get(*i).ok_or_else(|| {
                CompileError::malformed("block", format!("no block at index {i}"))
            }),
        }
    }

    pub fn module_name(&self) -> Option<&str> {
        self.meta.get("moduleName").and_then(Value::as_str)
    }
}

fn interned(names: Vec<String>) -> Vec<ArcStr> {
    names.into_iter().map(ArcStr::from).collect()
}

fn parse_statements(values: &[Value]) -> Result<Vec<Statement>, CompileError> {
    values.iter().map(parse_statement).collect()
}

fn tuple<'a>(value: &'a Value, context: &str) -> Result<&'a [Value], CompileError> {
    match value {
        Value::Array(items) if !items.is_empty() => Ok(items.as_slice()),
        _ => Err(CompileError::malformed(
            context,
            format!("expected a tagged tuple, got {value}"),
        )),
    }
}

fn at<'a>(items: &'a [Value], i: usize, context: &str) -> Result<&'a Value, CompileError> {
    items
        .get(i)
        .ok_or_else(|| CompileError::malformed(context, format!("missing element {i}")))
}

fn string_at(items: &[Value], i: usize, context: &str) -> Result<ArcStr, CompileError> {
    match at(items, i, context)? {
        Value::String(s) => Ok(ArcStr::from(s.as_str())),
        other => Err(CompileError::malformed(
            context,
            format!("expected a string at {i}, got {other}"),
        )),
    }
}

fn optional_string_at(
    items: &[Value],
    i: usize,
    context: &str,
) -> Result<Option<ArcStr>, CompileError> {
    match items.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(ArcStr::from(s.as_str()))),
        Some(other) => Err(CompileError::malformed(
            context,
            format!("expected a string or null at {i}, got {other}"),
        )),
    }
}

fn strings(value: &Value, context: &str) -> Result<Vec<ArcStr>, CompileError> {
    match value {
        Value::Null => Ok(vec![]),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(ArcStr::from(s.as_str())),
                other => Err(CompileError::malformed(
                    context,
                    format!("expected a string, got {other}"),
                )),
            })
            .collect(),
        other => Err(CompileError::malformed(
            context,
            format!("expected a list of strings, got {other}"),
        )),
    }
}

fn path_at(items: &[Value], i: usize, context: &str) -> Result<Path, CompileError> {
    let path = strings(at(items, i, context)?, context)?;
    if path.is_empty() {
        return Err(CompileError::malformed(context, "empty path"));
    }
    Ok(path)
}

fn params(value: Option<&Value>, context: &str) -> Result<Vec<Expression>, CompileError> {
    match value {
        None | Some(Value::Null) => Ok(vec![]),
        Some(Value::Array(items)) => items.iter().map(parse_expression).collect(),
        Some(other) => Err(CompileError::malformed(
            context,
            format!("expected params, got {other}"),
        )),
    }
}

fn hash(value: Option<&Value>, context: &str) -> Result<Hash, CompileError> {
    match value {
        None | Some(Value::Null) => Ok(Hash::default()),
        Some(Value::Array(pair)) if pair.len() == 2 => {
            let names = strings(&pair[0], context)?;
            let values = params(Some(&pair[1]), context)?;
            if names.len() != values.len() {
                return Err(CompileError::malformed(
                    context,
                    "hash names and values differ in length",
                ));
            }
            Ok(Hash { names, values })
        }
        Some(other) => Err(CompileError::malformed(
            context,
            format!("expected a [names, values] hash, got {other}"),
        )),
    }
}

fn block_ref(value: Option<&Value>) -> Result<Option<BlockRef>, CompileError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|i| Some(BlockRef::Index(i as usize)))
            .ok_or_else(|| CompileError::malformed("block", format!("bad block index {n}"))),
        Some(Value::Object(_)) => Ok(Some(BlockRef::Inline(parse_block(value)?))),
        Some(other) => Err(CompileError::malformed(
            "block",
            format!("expected a block reference, got {other}"),
        )),
    }
}

fn parse_block(value: Option<&Value>) -> Result<SerializedBlock, CompileError> {
    let Some(Value::Object(o)) = value else {
        return Ok(SerializedBlock::default());
    };
    let statements = match o.get("statements") {
        Some(Value::Array(s)) => parse_statements(s)?,
        _ => vec![],
    };
    let locals = match o.get("locals") {
        Some(l) => strings(l, "locals")?,
        None => vec![],
    };
    Ok(SerializedBlock { statements, locals })
}

fn flag_at(items: &[Value], i: usize) -> bool {
    items.get(i).and_then(Value::as_bool).unwrap_or(false)
}

pub fn parse_statement(value: &Value) -> Result<Statement, CompileError> {
    let items = tuple(value, "statement")?;
    let tag = string_at(items, 0, "statement")?;
    let context = tag.as_str();
    let statement = match context {
        "text" => Statement::Text(string_at(items, 1, context)?),
        "comment" => Statement::Comment(string_at(items, 1, context)?),
        "append" => Statement::Append {
            value: parse_expression(at(items, 1, context)?)?,
            trusted: flag_at(items, 2),
        },
        "modifier" => Statement::Modifier {
            path: path_at(items, 1, context)?,
            params: params(items.get(2), context)?,
            hash: hash(items.get(3), context)?,
        },
        "block" => Statement::Block {
            path: path_at(items, 1, context)?,
            params: params(items.get(2), context)?,
            hash: hash(items.get(3), context)?,
            template: block_ref(items.get(4))?,
            inverse: block_ref(items.get(5))?,
        },
        "component" => {
            let Value::Object(o) = at(items, 2, context)? else {
                return Err(CompileError::malformed(context, "expected a component body"));
            };
            let attrs = match o.get("attrs") {
                Some(Value::Array(a)) => parse_statements(a)?,
                _ => vec![],
            };
            Statement::Component {
                tag: string_at(items, 1, context)?,
                attrs,
                args: hash(o.get("args"), context)?,
                block: parse_block(items.get(2))?,
            }
        }
        "open-element" => Statement::OpenElement {
            tag: string_at(items, 1, context)?,
            block_params: match items.get(2) {
                Some(v) => strings(v, context)?,
                None => vec![],
            },
        },
        "flush-element" => Statement::FlushElement,
        "close-element" => Statement::CloseElement,
        "static-attr" => {
            let value = match parse_expression(at(items, 2, context)?)? {
                Expression::Value(v) => ArcStr::from(v.to_content_string()),
                other => {
                    return Err(CompileError::malformed(
                        context,
                        format!("static attribute value must be a literal, got {other:?}"),
                    ));
                }
            };
            Statement::StaticAttr {
                name: string_at(items, 1, context)?,
                value,
                namespace: optional_string_at(items, 3, context)?,
            }
        }
        "dynamic-attr" | "trusting-attr" => Statement::DynamicAttr {
            name: string_at(items, 1, context)?,
            value: parse_expression(at(items, 2, context)?)?,
            namespace: optional_string_at(items, 3, context)?,
            trusting: context == "trusting-attr",
        },
        "static-arg" => Statement::StaticArg {
            name: string_at(items, 1, context)?,
            value: parse_expression(at(items, 2, context)?)?,
        },
        "dynamic-arg" => Statement::DynamicArg {
            name: string_at(items, 1, context)?,
            value: parse_expression(at(items, 2, context)?)?,
        },
        "yield" => Statement::Yield {
            to: string_at(items, 1, context)?,
            params: params(items.get(2), context)?,
        },
        other => {
            return Err(CompileError::malformed(
                "statement",
                format!("unknown statement {other}"),
            ));
        }
    };
    Ok(statement)
}

pub fn parse_expression(value: &Value) -> Result<Expression, CompileError> {
    let items = match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            return Ok(Expression::Value(Var::from(value)));
        }
        Value::Object(_) => return Err(CompileError::MalformedPrimitive(value.to_string())),
        Value::Array(_) => tuple(value, "expression")?,
    };
    let tag = string_at(items, 0, "expression")?;
    let context = tag.as_str();
    let expression = match context {
        "unknown" => Expression::Unknown(path_at(items, 1, context)?),
        "arg" => Expression::Arg(path_at(items, 1, context)?),
        "get" => Expression::Get(path_at(items, 1, context)?),
        "self-get" => Expression::SelfGet(path_at(items, 1, context)?),
        "concat" => Expression::Concat(params(items.get(1), context)?),
        "has-block" => Expression::HasBlock(string_at(items, 1, context)?),
        "has-block-params" => Expression::HasBlockParams(string_at(items, 1, context)?),
        "helper" => Expression::Helper {
            path: path_at(items, 1, context)?,
            params: params(items.get(2), context)?,
            hash: hash(items.get(3), context)?,
        },
        "undefined" => Expression::Undefined,
        other => {
            return Err(CompileError::malformed(
                "expression",
                format!("unknown expression {other}"),
            ));
        }
    };
    Ok(expression)
}
