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

use crate::variant::{VarMap, Variant};
use arcstr::ArcStr;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// A value flowing through templates: the context object, properties read from it, helper
/// results and literals.
#[derive(Clone, PartialEq)]
pub struct Var(Variant);

impl Debug for Var {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.variant())
    }
}

impl Display for Var {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_content_string())
    }
}

impl Default for Var {
    fn default() -> Self {
        v_undefined()
    }
}

impl Var {
    pub fn from_variant(variant: Variant) -> Self {
        Var(variant)
    }

    pub fn mk_undefined() -> Self {
        Var(Variant::Undefined)
    }

    pub fn mk_null() -> Self {
        Var(Variant::Null)
    }

    pub fn mk_bool(b: bool) -> Self {
        Var(Variant::Bool(b))
    }

    pub fn mk_integer(i: i64) -> Self {
        Var(Variant::Int(i))
    }

    pub fn mk_float(f: f64) -> Self {
        Var(Variant::Float(f))
    }

    pub fn mk_str(s: &str) -> Self {
        Var(Variant::Str(ArcStr::from(s)))
    }

    pub fn mk_string(s: String) -> Self {
        Var(Variant::Str(ArcStr::from(s)))
    }

    pub fn mk_list(values: &[Var]) -> Self {
        Var(Variant::List(Arc::new(values.to_vec())))
    }

    pub fn mk_list_iter<IT: IntoIterator<Item = Var>>(values: IT) -> Self {
        Var(Variant::List(Arc::new(values.into_iter().collect())))
    }

    pub fn mk_map_iter<K: Into<ArcStr>, IT: IntoIterator<Item = (K, Var)>>(pairs: IT) -> Self {
        let map: VarMap = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Var(Variant::Map(Arc::new(map)))
    }

    pub fn variant(&self) -> &Variant {
        &self.0
    }

    /// Truthiness as a plain boolean conversion would see it: empty strings, zero, NaN, null and
    /// undefined are false; every list and map is true, empty or not.
    pub fn is_truthy(&self) -> bool {
        match self.variant() {
            Variant::Undefined | Variant::Null => false,
            Variant::Bool(b) => *b,
            Variant::Int(i) => *i != 0,
            Variant::Float(f) => *f != 0.0 && !f.is_nan(),
            Variant::Str(s) => !s.is_empty(),
            Variant::List(_) | Variant::Map(_) => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self.variant(), Variant::Undefined | Variant::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.variant() {
            Variant::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Var]> {
        match self.variant() {
            Variant::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&VarMap> {
        match self.variant() {
            Variant::Map(m) => Some(m.as_ref()),
            _ => None,
        }
    }

    /// Property access as used by path expressions (`item.name`, `list.length`, `list.0`).
    /// Anything that has no such property yields `undefined`.
    pub fn get_key(&self, key: &str) -> Var {
        match self.variant() {
            Variant::Map(m) => m.get(key).cloned().unwrap_or_default(),
            Variant::List(l) => {
                if key == "length" {
                    return v_int(l.len() as i64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|idx| l.get(idx).cloned())
                    .unwrap_or_default()
            }
            Variant::Str(s) if key == "length" => v_int(s.chars().count() as i64),
            _ => v_undefined(),
        }
    }

    /// The text a value renders as when appended to the tree.
    pub fn to_content_string(&self) -> String {
        match self.variant() {
            Variant::Undefined | Variant::Null => String::new(),
            Variant::Bool(b) => b.to_string(),
            Variant::Int(i) => i.to_string(),
            Variant::Float(f) => format_float(*f),
            Variant::Str(s) => s.to_string(),
            Variant::List(l) => l
                .iter()
                .map(|v| v.to_content_string())
                .collect::<Vec<_>>()
                .join(","),
            Variant::Map(_) => "[object Object]".to_string(),
        }
    }

    /// A key identifying this value for `@identity` keyed iteration. Scalars are identified by
    /// their rendered form, lists and maps by their shared storage.
    pub fn identity(&self) -> ArcStr {
        match self.variant() {
            Variant::Undefined => arcstr::literal!("undefined"),
            Variant::Null => arcstr::literal!("null"),
            Variant::Str(s) => s.clone(),
            Variant::List(l) => ArcStr::from(format!("@list:{:p}", Arc::as_ptr(l))),
            Variant::Map(m) => ArcStr::from(format!("@map:{:p}", Arc::as_ptr(m))),
            _ => ArcStr::from(self.to_content_string()),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        return (f as i64).to_string();
    }
    f.to_string()
}

impl From<&serde_json::Value> for Var {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => v_null(),
            serde_json::Value::Bool(b) => v_bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => v_int(i),
                None => v_float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => v_str(s),
            serde_json::Value::Array(a) => Var::mk_list_iter(a.iter().map(Var::from)),
            serde_json::Value::Object(o) => {
                Var::mk_map_iter(o.iter().map(|(k, v)| (k.as_str(), Var::from(v))))
            }
        }
    }
}

impl From<serde_json::Value> for Var {
    fn from(value: serde_json::Value) -> Self {
        Var::from(&value)
    }
}

impl From<&str> for Var {
    fn from(s: &str) -> Self {
        v_str(s)
    }
}

impl From<String> for Var {
    fn from(s: String) -> Self {
        v_string(s)
    }
}

impl From<i64> for Var {
    fn from(i: i64) -> Self {
        v_int(i)
    }
}

impl From<bool> for Var {
    fn from(b: bool) -> Self {
        v_bool(b)
    }
}

pub fn v_undefined() -> Var {
    Var::mk_undefined()
}

pub fn v_null() -> Var {
    Var::mk_null()
}

pub fn v_bool(b: bool) -> Var {
    Var::mk_bool(b)
}

pub fn v_int(i: i64) -> Var {
    Var::mk_integer(i)
}

pub fn v_float(f: f64) -> Var {
    Var::mk_float(f)
}

pub fn v_str(s: &str) -> Var {
    Var::mk_str(s)
}

pub fn v_string(s: String) -> Var {
    Var::mk_string(s)
}

pub fn v_list(values: &[Var]) -> Var {
    Var::mk_list(values)
}

pub fn v_list_iter<IT: IntoIterator<Item = Var>>(values: IT) -> Var {
    Var::mk_list_iter(values)
}

pub fn v_map(pairs: &[(&str, Var)]) -> Var {
    Var::mk_map_iter(pairs.iter().map(|(k, v)| (*k, v.clone())))
}

pub fn v_empty_list() -> Var {
    Var::mk_list(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(v_undefined(), false; "undefined")]
    #[test_case(v_null(), false; "null")]
    #[test_case(v_int(0), false; "zero")]
    #[test_case(v_float(f64::NAN), false; "nan")]
    #[test_case(v_str(""), false; "empty string")]
    #[test_case(v_str("0"), true; "string zero")]
    #[test_case(v_empty_list(), true; "empty list")]
    #[test_case(v_map(&[]), true; "empty map")]
    fn test_truthiness(v: Var, expected: bool) {
        assert_eq!(v.is_truthy(), expected);
    }

    #[test]
    fn test_json_conversion_and_paths() {
        let v = Var::from(json!({"items": [{"id": 1, "name": "A"}], "title": "hi"}));
        let items = v.get_key("items");
        assert_eq!(items.get_key("length"), v_int(1));
        assert_eq!(items.get_key("0").get_key("name"), v_str("A"));
        assert_eq!(v.get_key("missing"), v_undefined());
        assert_eq!(v.get_key("title").get_key("length"), v_int(2));
    }

    #[test_case(v_float(1.0), "1"; "integral float")]
    #[test_case(v_float(1.5), "1.5"; "fractional float")]
    #[test_case(v_null(), ""; "null renders empty")]
    #[test_case(v_list(&[v_int(1), v_str("a")]), "1,a"; "list joins")]
    #[test_case(v_bool(false), "false"; "bool")]
    fn test_content_string(v: Var, expected: &str) {
        assert_eq!(v.to_content_string(), expected);
    }

    #[test]
    fn test_identity_tracks_storage() {
        let list = v_list(&[v_int(1)]);
        let copy = list.clone();
        let other = v_list(&[v_int(1)]);
        assert_eq!(list.identity(), copy.identity());
        assert_ne!(list.identity(), other.identity());
        assert_eq!(list, other);
        assert_eq!(v_int(3).identity().as_str(), "3");
    }
}
