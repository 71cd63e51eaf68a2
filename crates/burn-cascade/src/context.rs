//! Conditioning context passed to each stage
//!
//! A [`Context`] maps string keys to conditioning signals. Cloning is
//! shallow: burn tensors share their underlying buffers, so a per-stage copy
//! costs one map clone while insertions and removals on the copy never reach
//! the caller's map or a sibling stage's map.

use std::collections::HashMap;

use burn::prelude::*;

/// A single conditioning signal
#[derive(Debug, Clone)]
pub enum ContextValue<B: Backend> {
    /// Image batch `[B, C, H, W]` (e.g. low-resolution conditioning)
    Image(Tensor<B, 4>),
    /// Token sequence embeddings `[B, T, D]`
    Sequence(Tensor<B, 3>),
    /// Pooled features `[B, D]`
    Features(Tensor<B, 2>),
    /// Class labels `[B]`
    Labels(Tensor<B, 1, Int>),
    Scalar(f64),
    Text(String),
}

impl<B: Backend> ContextValue<B> {
    /// Returns the image batch if this value holds one
    pub fn as_image(&self) -> Option<&Tensor<B, 4>> {
        match self {
            ContextValue::Image(t) => Some(t),
            _ => None,
        }
    }

    /// Short variant name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Image(_) => "image",
            ContextValue::Sequence(_) => "sequence",
            ContextValue::Features(_) => "features",
            ContextValue::Labels(_) => "labels",
            ContextValue::Scalar(_) => "scalar",
            ContextValue::Text(_) => "text",
        }
    }
}

impl<B: Backend> From<Tensor<B, 4>> for ContextValue<B> {
    fn from(t: Tensor<B, 4>) -> Self {
        ContextValue::Image(t)
    }
}

impl<B: Backend> From<Tensor<B, 3>> for ContextValue<B> {
    fn from(t: Tensor<B, 3>) -> Self {
        ContextValue::Sequence(t)
    }
}

impl<B: Backend> From<Tensor<B, 2>> for ContextValue<B> {
    fn from(t: Tensor<B, 2>) -> Self {
        ContextValue::Features(t)
    }
}

impl<B: Backend> From<Tensor<B, 1, Int>> for ContextValue<B> {
    fn from(t: Tensor<B, 1, Int>) -> Self {
        ContextValue::Labels(t)
    }
}

impl<B: Backend> From<f64> for ContextValue<B> {
    fn from(v: f64) -> Self {
        ContextValue::Scalar(v)
    }
}

impl<B: Backend> From<String> for ContextValue<B> {
    fn from(v: String) -> Self {
        ContextValue::Text(v)
    }
}

impl<B: Backend> From<&str> for ContextValue<B> {
    fn from(v: &str) -> Self {
        ContextValue::Text(v.to_string())
    }
}

/// Mapping from conditioning keys to signals
#[derive(Debug, Clone)]
pub struct Context<B: Backend> {
    entries: HashMap<String, ContextValue<B>>,
}

impl<B: Backend> Default for Context<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Context<B> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ContextValue<B>>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a value, returning the one it replaced
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ContextValue<B>>,
    ) -> Option<ContextValue<B>> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue<B>> {
        self.entries.get(key)
    }

    /// Image batch stored under `key`
    pub fn image(&self, key: &str) -> Option<&Tensor<B, 4>> {
        self.get(key).and_then(ContextValue::as_image)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue<B>> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue<B>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
