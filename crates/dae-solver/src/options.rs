//! Solver configuration.
//!
//! [`Options`] is a string-keyed map of typed values. Which keys are
//! recognised is decided by each backend; the facade only reads `old_api`.
//! Callables (root function, Jacobian) live in dedicated slots because they
//! cannot be expressed in JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{DaeError, Result};
use crate::residual::{JacobianFunction, RootFunction};

/// A single option value.
///
/// Deserialisation is untagged: JSON `true` becomes `Bool`, `3` becomes
/// `Int`, `1e-6` becomes `Float`, `[0, 2]` becomes `IntList` and `[1e-6, 1]`
/// becomes `FloatList`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl OptionValue {
    /// Short name of the value kind, used in validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            OptionValue::Bool(_) => "bool",
            OptionValue::Int(_) => "int",
            OptionValue::Float(_) => "float",
            OptionValue::Text(_) => "string",
            OptionValue::IntList(_) => "int list",
            OptionValue::FloatList(_) => "float list",
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(v as i64)
    }
}

impl From<usize> for OptionValue {
    fn from(v: usize) -> Self {
        OptionValue::Int(v as i64)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Text(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Text(v)
    }
}

impl From<Vec<f64>> for OptionValue {
    fn from(v: Vec<f64>) -> Self {
        OptionValue::FloatList(v)
    }
}

impl From<Vec<i64>> for OptionValue {
    fn from(v: Vec<i64>) -> Self {
        OptionValue::IntList(v)
    }
}

impl From<Vec<usize>> for OptionValue {
    fn from(v: Vec<usize>) -> Self {
        OptionValue::IntList(v.into_iter().map(|i| i as i64).collect())
    }
}

/// Solver options.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Options {
    #[serde(flatten)]
    values: BTreeMap<String, OptionValue>,
    #[serde(skip)]
    rootfn: Option<Arc<dyn RootFunction>>,
    #[serde(skip)]
    jacfn: Option<Arc<dyn JacobianFunction>>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("values", &self.values)
            .field("rootfn", &self.rootfn.is_some())
            .field("jacfn", &self.jacfn.is_some())
            .finish()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn set(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<OptionValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Attach `count` event functions. Also sets `nr_rootfns`.
    pub fn with_rootfn<R: RootFunction + 'static>(mut self, count: usize, rootfn: R) -> Self {
        self.values
            .insert("nr_rootfns".to_string(), OptionValue::from(count));
        self.rootfn = Some(Arc::new(rootfn));
        self
    }

    /// Attach an analytic iteration matrix.
    pub fn with_jacfn<J: JacobianFunction + 'static>(mut self, jacfn: J) -> Self {
        self.jacfn = Some(Arc::new(jacfn));
        self
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn rootfn(&self) -> Option<&Arc<dyn RootFunction>> {
        self.rootfn.as_ref()
    }

    pub fn jacfn(&self) -> Option<&Arc<dyn JacobianFunction>> {
        self.jacfn.as_ref()
    }

    /// Overwrite entries with those of `other`. Callables are replaced only
    /// when `other` carries one.
    pub fn merge(&mut self, other: &Options) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        if other.rootfn.is_some() {
            self.rootfn = other.rootfn.clone();
        }
        if other.jacfn.is_some() {
            self.jacfn = other.jacfn.clone();
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject any key not listed in `allowed`.
    pub fn check_keys(&self, backend: &str, allowed: &[&str]) -> Result<()> {
        match self.keys().find(|key| !allowed.contains(key)) {
            Some(key) => Err(DaeError::invalid_option(
                backend,
                key,
                format!("not recognised (accepted: {})", allowed.join(", ")),
            )),
            None => Ok(()),
        }
    }

    pub fn bool_value(&self, backend: &str, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Bool(v)) => Ok(Some(*v)),
            Some(OptionValue::Int(v)) if *v == 0 || *v == 1 => Ok(Some(*v == 1)),
            Some(other) => Err(type_error(backend, key, "bool", other)),
        }
    }

    pub fn f64_value(&self, backend: &str, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Float(v)) => Ok(Some(*v)),
            Some(OptionValue::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(type_error(backend, key, "float", other)),
        }
    }

    pub fn usize_value(&self, backend: &str, key: &str) -> Result<Option<usize>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Int(v)) if *v >= 0 => Ok(Some(*v as usize)),
            Some(other) => Err(type_error(backend, key, "non-negative int", other)),
        }
    }

    pub fn text_value(&self, backend: &str, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Text(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(type_error(backend, key, "string", other)),
        }
    }

    pub fn int_list(&self, backend: &str, key: &str) -> Result<Option<Vec<i64>>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::IntList(v)) => Ok(Some(v.clone())),
            Some(other) => Err(type_error(backend, key, "int list", other)),
        }
    }

    pub fn f64_list(&self, backend: &str, key: &str) -> Result<Option<Vec<f64>>> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::FloatList(v)) => Ok(Some(v.clone())),
            Some(OptionValue::IntList(v)) => Ok(Some(v.iter().map(|&i| i as f64).collect())),
            Some(other) => Err(type_error(backend, key, "float list", other)),
        }
    }
}

fn type_error(backend: &str, key: &str, expected: &str, found: &OptionValue) -> DaeError {
    DaeError::invalid_option(
        backend,
        key,
        format!("expected {expected}, found {}", found.kind()),
    )
}
