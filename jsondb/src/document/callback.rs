//! Opt-in named callbacks.
//!
//! A document never stores code. It stores a reference of the form
//! `/Callback(<name>)/`, and the application decides what that name means by
//! registering a closure in a [`CallbackRegistry`]. Without a registry the
//! reference is just a string.

use super::Document;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const PREFIX: &str = "/Callback(";
const SUFFIX: &str = ")/";

pub type Callback = Arc<dyn Fn(&Document) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Callback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`, returning any callback it replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, callback: F) -> Option<Callback>
    where
        F: Fn(&Document) -> Value + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Arc::new(callback))
    }

    pub fn remove(&mut self, name: &str) -> Option<Callback> {
        self.callbacks.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Callback> {
        self.callbacks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.callbacks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// The field value that refers to the callback registered as `name`.
pub fn callback_ref(name: &str) -> Value {
    Value::String(format!("{PREFIX}{name}{SUFFIX}"))
}

/// Extract the callback name from a `/Callback(<name>)/` string.
pub fn parse_callback_ref(s: &str) -> Option<&str> {
    let name = s.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
