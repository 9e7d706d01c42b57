//! Values in the runtime.
//!
//! This module provides:
//! - [`Value`]: a value in runtime, a closed tagged union
//! - [`ValueType`]: the type of a value, used in error messages
//! - [`FunValue`], [`NativeFun`]: functions in runtime
//! - [`RefValue`]: the shared handle behind Array and Object values

use std::collections::HashSet;
use std::rc::Rc;

use chrono::{DateTime, Duration as TimeDelta, SecondsFormat, Utc};
use indexmap::IndexMap;

use crate::bridge::storage::StoredValue;

use super::err::{RuntimeErr, ValueErr};

mod fun;
mod op_impl;
mod refval;

pub use fun::*;
pub use refval::*;

/// The largest index an array write may grow an array to.
///
/// Writes pad the gap with nulls, so an unchecked index would let one
/// statement allocate without bound.
pub const MAX_LIST_LEN: usize = 100_000;

/// The elements of an Array value.
pub type ListValue = RefValue<Vec<Value>>;
/// The entries of an Object value. Entries keep insertion order.
pub type MapValue = RefValue<IndexMap<String, Value>>;

/// A value in the script runtime.
///
/// Every representation is tagged; exactly one is active. The container
/// variants (`List`, `Map`) are shared handles, so cloning a `Value` never
/// deep-copies script data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `null`
    Null,

    /// `true` / `false`
    Bool(bool),

    /// An IEEE-754 double (`0.3`, `12`)
    Number(f64),

    /// A string (`"abc"`)
    Str(String),

    /// A compiled regular expression (`/ab+/i`)
    Regex(Rc<RegexValue>),

    /// An instant in time. A numeric sub-kind: it wraps an epoch instant and
    /// delegates to the Number method table for anything it does not override.
    Time(DateTime<Utc>),

    /// A span of time. A numeric sub-kind like [`Value::Time`].
    Duration(TimeDelta),

    /// An array of values
    List(ListValue),

    /// A string-keyed object, entries ordered by insertion
    Map(MapValue),

    /// A user-defined function
    Fun(FunValue),

    /// A host-defined function
    Native(NativeFun),
}

/// A compiled regex literal: the written pattern and flags plus the
/// compiled matcher.
#[derive(Debug)]
pub struct RegexValue {
    /// The pattern as written between the slashes.
    pub pattern: String,
    /// The flags as written (`g`, `i`, `m`, `s`).
    pub flags: String,
    /// Whether the `g` flag was set (affects `replace`).
    pub global: bool,
    pub(crate) re: regex::Regex,
}

impl RegexValue {
    /// Compile a pattern with its flag string.
    pub fn compile(pattern: &str, flags: &str) -> Result<Self, RuntimeErr> {
        let mut builder = regex::RegexBuilder::new(pattern);
        let mut global = false;

        for f in flags.chars() {
            match f {
                'g' => global = true,
                'i' => { builder.case_insensitive(true); }
                'm' => { builder.multi_line(true); }
                's' => { builder.dot_matches_new_line(true); }
                other => {
                    return Err(ValueErr::BadRegexFlag(other).into());
                }
            }
        }

        let re = builder.build()
            .map_err(|e| ValueErr::BadRegex(e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
            global,
            re,
        })
    }
}

impl PartialEq for RegexValue {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.flags == other.flags
    }
}

/// The concrete type of a value, used for dispatch and error messages.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ValueType {
    #[allow(missing_docs)] Null,
    #[allow(missing_docs)] Bool,
    #[allow(missing_docs)] Number,
    #[allow(missing_docs)] Str,
    #[allow(missing_docs)] Regex,
    #[allow(missing_docs)] Time,
    #[allow(missing_docs)] Duration,
    #[allow(missing_docs)] List,
    #[allow(missing_docs)] Map,
    #[allow(missing_docs)] Fun,
    #[allow(missing_docs)] Native,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValueType::Null => "Null",
            ValueType::Bool => "Boolean",
            ValueType::Number => "Number",
            ValueType::Str => "String",
            ValueType::Regex => "RegExp",
            ValueType::Time => "Time",
            ValueType::Duration => "Duration",
            ValueType::List => "Array",
            ValueType::Map => "Object",
            ValueType::Fun => "Function",
            ValueType::Native => "NativeFunction",
        })
    }
}

/// Renders values nested in containers, guarding against reference cycles.
struct ContainerRepr {
    seen: HashSet<*const ()>,
}

impl ContainerRepr {
    fn new() -> Self {
        ContainerRepr { seen: HashSet::new() }
    }

    fn repr(&mut self, t: &Value) -> String {
        match t {
            Value::List(l) => {
                if !self.seen.insert(l.as_ptr()) {
                    return String::from("[...]");
                }

                let strs = l.borrow().iter()
                    .map(|v| self.elem_repr(v))
                    .collect::<Vec<_>>();

                self.seen.remove(&l.as_ptr());
                format!("[{}]", strs.join(", "))
            }
            Value::Map(m) => {
                if !self.seen.insert(m.as_ptr()) {
                    return String::from("{...}");
                }

                let strs = m.borrow().iter()
                    .map(|(k, v)| format!("{k}: {}", self.elem_repr(v)))
                    .collect::<Vec<_>>();

                self.seen.remove(&m.as_ptr());
                format!("{{{}}}", strs.join(", "))
            }
            t => t.to_display_string(),
        }
    }

    /// Elements render like the value itself, except strings keep quotes.
    fn elem_repr(&mut self, t: &Value) -> String {
        match t {
            Value::Str(s) => format!("{s:?}"),
            t => self.repr(t),
        }
    }
}

/// Render a number the way scripts see numbers: integral values lose the
/// trailing `.0`.
pub fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl Value {
    /// Truthiness of a value: when it is used as a condition, what truth
    /// value should it have?
    ///
    /// Null is false; numbers are true unless zero or NaN; strings are true
    /// unless empty; everything else is true, including empty containers.
    pub fn truth(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Regex(_)
            | Value::Time(_)
            | Value::Duration(_)
            | Value::List(_)
            | Value::Map(_)
            | Value::Fun(_)
            | Value::Native(_) => true,
        }
    }

    /// Get the concrete type of the current value.
    pub fn ty(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Number(_) => ValueType::Number,
            Value::Str(_) => ValueType::Str,
            Value::Regex(_) => ValueType::Regex,
            Value::Time(_) => ValueType::Time,
            Value::Duration(_) => ValueType::Duration,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
            Value::Fun(_) => ValueType::Fun,
            Value::Native(_) => ValueType::Native,
        }
    }

    /// The numeric reading of the numeric kinds: plain numbers themselves,
    /// times as epoch milliseconds, durations as total milliseconds.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Time(t) => Some(t.timestamp_millis() as f64),
            Value::Duration(d) => Some(d.num_milliseconds() as f64),
            _ => None,
        }
    }

    /// Produce the string representation of this value — its `toString`.
    ///
    /// Every variant renders to something; values with no natural text form
    /// render as a sentinel rather than failing.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::from("null"),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => fmt_number(*n),
            Value::Str(s) => s.clone(),
            Value::Regex(r) => format!("/{}/{}", r.pattern, r.flags),
            Value::Time(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
            Value::Duration(d) => fmt_duration(*d),
            Value::List(_) | Value::Map(_) => ContainerRepr::new().repr(self),
            Value::Fun(f) => match &f.name {
                Some(n) => format!("<function {n}>"),
                None => String::from("<anonymous function>"),
            },
            Value::Native(f) => format!("<native function {}>", f.name),
        }
    }

    /// Create an array value.
    pub fn new_list(l: Vec<Value>) -> Self {
        Value::List(RefValue::new(l))
    }

    /// Create an object value.
    pub fn new_map(m: IndexMap<String, Value>) -> Self {
        Value::Map(RefValue::new(m))
    }

    /// Script equality (`==`). Cross-type comparisons are false, never errors;
    /// containers and functions compare by identity.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ref_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ref_eq(b),
            (Value::Fun(a), Value::Fun(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a == b,
            _ => false,
        }
    }

    /// Read an own property: Object entries, Array elements and lengths,
    /// string characters. Returns `None` when the key names no own data —
    /// the caller then consults the type's method table, and finally
    /// resolves to Null. Property access never fails on non-Null values.
    pub fn get_own(&self, key: &PropKey) -> Option<Value> {
        match self {
            Value::Map(m) => m.borrow().get(&key.as_name()).cloned(),
            Value::List(l) => {
                if key.is_name("length") {
                    return Some(Value::Number(l.borrow().len() as f64));
                }
                let idx = key.as_index()?;
                l.borrow().get(idx).cloned().or(Some(Value::Null))
            }
            Value::Str(s) => {
                if key.is_name("length") {
                    return Some(Value::Number(s.chars().count() as f64));
                }
                let idx = key.as_index()?;
                Some(s.chars().nth(idx).map_or(Value::Null, |c| Value::Str(c.to_string())))
            }
            _ => None,
        }
    }

    /// Write a property through to a mutable container.
    pub fn set_prop(&self, key: &PropKey, v: Value) -> Result<(), RuntimeErr> {
        match self {
            Value::Map(m) => {
                m.try_borrow_mut()?.insert(key.as_name(), v);
                Ok(())
            }
            Value::List(l) => {
                let idx = key.as_index()
                    .ok_or_else(|| ValueErr::BadListIndex(key.as_name()))?;
                if idx > MAX_LIST_LEN {
                    return Err(ValueErr::BadListIndex(key.as_name()).into());
                }
                let mut list = l.try_borrow_mut()?;

                // writing at or past the end grows the array, padding with nulls
                while list.len() < idx {
                    list.push(Value::Null);
                }
                if idx == list.len() {
                    list.push(v);
                } else {
                    list[idx] = v;
                }
                Ok(())
            }
            _ => Err(super::err::TypeErr::CannotSetProp(self.ty()).into()),
        }
    }

    /// Deep copy of the value: containers are duplicated recursively so the
    /// copy shares no identity with the original. Used when values cross the
    /// storage boundary.
    pub fn deep_clone(&self) -> Value {
        match self {
            Value::List(l) => {
                let items = l.borrow().iter().map(Value::deep_clone).collect();
                Value::new_list(items)
            }
            Value::Map(m) => {
                let entries = m.borrow().iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone()))
                    .collect();
                Value::new_map(entries)
            }
            v => v.clone(),
        }
    }
}

/// A property key as written in the script: a member name or a computed
/// index value. A transient handle — it resolves against a container on
/// read and writes through on update, it is never stored.
#[derive(Debug, Clone)]
pub enum PropKey {
    /// A `.name` access.
    Name(String),
    /// A `[expr]` access.
    Computed(Value),
}

impl PropKey {
    /// The key as an object entry name.
    pub fn as_name(&self) -> String {
        match self {
            PropKey::Name(s) => s.clone(),
            PropKey::Computed(v) => v.to_display_string(),
        }
    }

    fn is_name(&self, name: &str) -> bool {
        match self {
            PropKey::Name(s) => s == name,
            PropKey::Computed(Value::Str(s)) => s == name,
            _ => false,
        }
    }

    /// The key as an array index, when it reads as a non-negative integer.
    pub fn as_index(&self) -> Option<usize> {
        let n = match self {
            PropKey::Computed(Value::Number(n)) => *n,
            PropKey::Name(s) => s.parse::<f64>().ok()?,
            PropKey::Computed(Value::Str(s)) => s.parse::<f64>().ok()?,
            _ => return None,
        };

        (n.fract() == 0.0 && n >= 0.0 && n.is_finite()).then(|| n as usize)
    }
}

/// Render a duration the way scripts see durations: `1d 2h 3m 4s`,
/// milliseconds shown only below one second.
pub fn fmt_duration(d: TimeDelta) -> String {
    let mut ms = d.num_milliseconds();
    let sign = if ms < 0 { "-" } else { "" };
    ms = ms.abs();

    let days = ms / 86_400_000;
    let hours = ms / 3_600_000 % 24;
    let mins = ms / 60_000 % 60;
    let secs = ms / 1000 % 60;
    let millis = ms % 1000;

    let mut parts = vec![];
    if days > 0 { parts.push(format!("{days}d")); }
    if hours > 0 { parts.push(format!("{hours}h")); }
    if mins > 0 { parts.push(format!("{mins}m")); }
    if secs > 0 { parts.push(format!("{secs}s")); }
    if parts.is_empty() {
        parts.push(format!("{millis}ms"));
    }

    format!("{sign}{}", parts.join(" "))
}

/// Convert a bridge/snapshot JSON value into a runtime value.
pub fn value_from_json(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::new_list(items.iter().map(value_from_json).collect())
        }
        serde_json::Value::Object(entries) => {
            Value::new_map(entries.iter().map(|(k, v)| (k.clone(), value_from_json(v))).collect())
        }
    }
}

/// Convert a runtime value into JSON for bridge payloads and embeds.
///
/// Functions have no JSON form and become an error; Time/Duration/Regex
/// serialize through their display form.
pub fn value_to_json(v: &Value) -> Result<serde_json::Value, RuntimeErr> {
    use serde_json::Value as Json;

    Ok(match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.clone()),
        Value::Regex(_) | Value::Time(_) | Value::Duration(_) => {
            Json::String(v.to_display_string())
        }
        Value::List(l) => {
            let items = l.borrow().iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>, _>>()?;
            Json::Array(items)
        }
        Value::Map(m) => {
            let mut obj = serde_json::Map::new();
            for (k, val) in m.borrow().iter() {
                obj.insert(k.clone(), value_to_json(val)?);
            }
            Json::Object(obj)
        }
        Value::Fun(_) | Value::Native(_) => {
            return Err(ValueErr::Unserializable(v.ty()).into());
        }
    })
}

impl TryFrom<&Value> for StoredValue {
    type Error = RuntimeErr;

    /// Functions are rejected at storage time; everything else round-trips.
    fn try_from(v: &Value) -> Result<Self, Self::Error> {
        Ok(match v {
            Value::Null => StoredValue::Null,
            Value::Bool(b) => StoredValue::Bool(*b),
            Value::Number(n) => StoredValue::Number(*n),
            Value::Str(s) => StoredValue::Str(s.clone()),
            Value::Regex(r) => StoredValue::Regex {
                pattern: r.pattern.clone(),
                flags: r.flags.clone(),
            },
            Value::Time(t) => StoredValue::Time(t.timestamp_millis()),
            Value::Duration(d) => StoredValue::Duration(d.num_milliseconds()),
            Value::List(l) => {
                let items = l.borrow().iter()
                    .map(StoredValue::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                StoredValue::List(items)
            }
            Value::Map(m) => {
                let entries = m.borrow().iter()
                    .map(|(k, val)| Ok((k.clone(), StoredValue::try_from(val)?)))
                    .collect::<Result<IndexMap<_, _>, RuntimeErr>>()?;
                StoredValue::Map(entries)
            }
            Value::Fun(_) | Value::Native(_) => {
                return Err(ValueErr::Unstorable(v.ty()).into());
            }
        })
    }
}

impl From<&StoredValue> for Value {
    fn from(v: &StoredValue) -> Self {
        match v {
            StoredValue::Null => Value::Null,
            StoredValue::Bool(b) => Value::Bool(*b),
            StoredValue::Number(n) => Value::Number(*n),
            StoredValue::Str(s) => Value::Str(s.clone()),
            StoredValue::Regex { pattern, flags } => {
                // a stored pattern compiled once before; fall back to Null
                // if the pattern no longer compiles
                RegexValue::compile(pattern, flags)
                    .map_or(Value::Null, |r| Value::Regex(Rc::new(r)))
            }
            StoredValue::Time(ms) => {
                DateTime::<Utc>::from_timestamp_millis(*ms)
                    .map_or(Value::Null, Value::Time)
            }
            StoredValue::Duration(ms) => Value::Duration(TimeDelta::milliseconds(*ms)),
            StoredValue::List(items) => {
                Value::new_list(items.iter().map(Value::from).collect())
            }
            StoredValue::Map(entries) => {
                Value::new_map(entries.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect())
            }
        }
    }
}
