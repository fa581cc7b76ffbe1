//! Typed attributes shared by logs, metrics and traces.
//!
//! An [`AttributeDefinition`] names a tag, fixes its value type and decides
//! which signals receive it. Values travel as [`AttrValue`] inside an
//! [`AttrMap`]. Every signal resolves call-scoped values over the values it
//! accumulated on the instance through the same [`merge`] / [`resolve`] pair.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::error::AttrError;

/// Attribute map keyed by attribute name.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Build an [`AttrMap`] from `key => value` pairs.
///
/// ```
/// use insights_core::attr_map;
/// let m = attr_map! { "http.route" => "/v1/foo", "retries" => 3 };
/// assert_eq!(m.len(), 2);
/// ```
#[macro_export]
macro_rules! attr_map {
    () => { $crate::attrs::AttrMap::new() };
    ($($key:expr => $val:expr),+ $(,)?) => {{
        let mut m = $crate::attrs::AttrMap::new();
        $( m.insert(::std::string::String::from($key), $crate::attrs::AttrValue::from($val)); )+
        m
    }};
}

// ---------------------------------------------------------------------------
// Kinds and values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrKind {
    Str,
    I64,
    F64,
    Bool,
}

impl AttrKind {
    /// Parse a type tag. Accepts the short tags and the long aliases.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "str" | "string" => Some(Self::Str),
            "i64" | "int64" => Some(Self::I64),
            "f64" | "float64" => Some(Self::F64),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            Self::Str(_) => AttrKind::Str,
            Self::I64(_) => AttrKind::I64,
            Self::F64(_) => AttrKind::F64,
            Self::Bool(_) => AttrKind::Bool,
        }
    }

    /// String form used for metric labels and indexed tags.
    pub fn to_label(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::I64(v) => v.to_string(),
            Self::F64(v) => format!("{v:.6}"),
            Self::Bool(v) => v.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::from(s.as_str()),
            Self::I64(v) => serde_json::Value::from(*v),
            Self::F64(v) => serde_json::Value::from(*v),
            Self::Bool(v) => serde_json::Value::from(*v),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::I64(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&String> for AttrValue {
    fn from(v: &String) -> Self {
        Self::Str(v.clone())
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        Self::I64(v.into())
    }
}

impl From<u16> for AttrValue {
    fn from(v: u16) -> Self {
        Self::I64(v.into())
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        Self::I64(v.into())
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

// ---------------------------------------------------------------------------
// Precedence
// ---------------------------------------------------------------------------

/// Instance values with call values layered on top.
pub fn merge(instance: &AttrMap, call: Option<&AttrMap>) -> AttrMap {
    let mut out = instance.clone();
    if let Some(call) = call {
        for (k, v) in call {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Value for `name`: the call map first, then the instance map.
pub fn resolve<'a>(
    name: &str,
    call: Option<&'a AttrMap>,
    instance: &'a AttrMap,
) -> Option<&'a AttrValue> {
    call.and_then(|c| c.get(name)).or_else(|| instance.get(name))
}

// ---------------------------------------------------------------------------
// Instance state
// ---------------------------------------------------------------------------

/// Attributes accumulated on one logger, meter, tracer or span.
#[derive(Debug, Default)]
pub struct AttrBag {
    inner: RwLock<AttrMap>,
}

impl AttrBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: AttrMap) -> Self {
        Self {
            inner: RwLock::new(map),
        }
    }

    pub fn set(&self, key: &str, val: AttrValue) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), val);
    }

    pub fn get(&self, key: &str) -> Option<AttrValue> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> AttrMap {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run `f` against the current map without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&AttrMap) -> R) -> R {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn deep_clone(&self) -> Self {
        Self::from_map(self.snapshot())
    }
}

/// Anything that accumulates attributes for later emission.
pub trait Attributable {
    fn set_attr(&self, key: &str, val: AttrValue);

    fn str(&self, key: &str, val: &str) {
        self.set_attr(key, AttrValue::Str(val.to_owned()));
    }

    fn i64(&self, key: &str, val: i64) {
        self.set_attr(key, AttrValue::I64(val));
    }

    fn f64(&self, key: &str, val: f64) {
        self.set_attr(key, AttrValue::F64(val));
    }

    fn bool(&self, key: &str, val: bool) {
        self.set_attr(key, AttrValue::Bool(val));
    }

    fn set_attrs(&self, attrs: &AttrMap) {
        for (k, v) in attrs {
            self.set_attr(k, v.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// A named, typed tag and the signals it is routed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    /// Type tag; empty means `str`.
    #[serde(default)]
    pub attr_type: String,
    #[serde(default = "default_true")]
    pub to_logs: bool,
    #[serde(default = "default_true")]
    pub to_metrics: bool,
    #[serde(default = "default_true")]
    pub to_traces: bool,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            attr_type: kind.as_str().to_owned(),
            to_logs: true,
            to_metrics: true,
            to_traces: true,
        }
    }

    /// A `str` attribute with the default routing.
    pub fn str(name: impl Into<String>) -> Self {
        Self::new(name, AttrKind::Str)
    }

    /// Restrict routing to the given signals.
    pub fn routed(mut self, logs: bool, metrics: bool, traces: bool) -> Self {
        self.to_logs = logs;
        self.to_metrics = metrics;
        self.to_traces = traces;
        self
    }

    /// The parsed type. An empty tag reads as `str`.
    pub fn kind(&self) -> Option<AttrKind> {
        if self.attr_type.is_empty() {
            return Some(AttrKind::Str);
        }
        AttrKind::parse(&self.attr_type)
    }
}

/// Drop invalid and duplicated definitions, collecting one error per drop.
///
/// Kept entries have their type tag normalized (`string` becomes `str`, an
/// empty tag becomes `str`). Processing never stops at the first error.
pub fn clean_up(defs: &[AttributeDefinition]) -> (Vec<AttributeDefinition>, Vec<AttrError>) {
    let mut clean = Vec::with_capacity(defs.len());
    let mut errors = Vec::new();
    let mut seen: AHashMap<&str, usize> = AHashMap::with_capacity(defs.len());

    for (index, def) in defs.iter().enumerate() {
        if def.name.is_empty() {
            errors.push(AttrError::EmptyName { index });
            continue;
        }
        if let Some(&first) = seen.get(def.name.as_str()) {
            errors.push(AttrError::Duplicate {
                index,
                first,
                name: def.name.clone(),
            });
            continue;
        }
        let Some(kind) = def.kind() else {
            errors.push(AttrError::InvalidType {
                index,
                name: def.name.clone(),
                attr_type: def.attr_type.clone(),
            });
            continue;
        };
        seen.insert(def.name.as_str(), index);
        let mut def = def.clone();
        def.attr_type = kind.as_str().to_owned();
        clean.push(def);
    }
    (clean, errors)
}

/// Cleaned attribute definitions indexed by name.
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    defs: Vec<AttributeDefinition>,
    index: AHashMap<String, usize>,
}

impl AttributeSet {
    pub fn new(defs: &[AttributeDefinition]) -> (Self, Vec<AttrError>) {
        let (defs, errors) = clean_up(defs);
        let index = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        (Self { defs, index }, errors)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDefinition> {
        self.index.get(name).map(|&i| &self.defs[i])
    }

    /// Definition for `name` if `value` has its declared kind.
    pub fn check(&self, name: &str, value: &AttrValue) -> Result<&AttributeDefinition, AttrError> {
        let def = self
            .get(name)
            .ok_or_else(|| AttrError::NotFound(name.to_owned()))?;
        let expected = def.kind().unwrap_or(AttrKind::Str);
        if expected != value.kind() {
            return Err(AttrError::KindMismatch {
                name: name.to_owned(),
                expected,
                got: value.kind(),
            });
        }
        Ok(def)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
