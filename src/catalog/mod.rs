//! Tool descriptor catalog.
//!
//! Built once at startup from the union of every adapter's operations and
//! read-only afterwards. The catalog is what the model sees on every
//! planning step and what the dispatcher resolves tool calls against.
//!
//! # Module Structure
//!
//! - [`schema`]: argument validation against a descriptor's declared parameters

pub mod schema;

pub use schema::{ArgumentError, ArgumentProblem, validate_arguments};

use crate::adapters::Adapter;
use crate::models::ToolDescriptor;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of tool descriptors with catalog-wide unique names.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    /// Descriptors in registration order.
    tools: Vec<ToolDescriptor>,
    /// Name to position in `tools`.
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from every operation the given adapters expose.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateToolName`] if two adapters expose the same name.
    pub fn from_adapters(adapters: &[Arc<dyn Adapter>]) -> Result<Self> {
        let mut catalog = Self::new();
        for adapter in adapters {
            for descriptor in adapter.descriptors() {
                catalog.register(descriptor)?;
            }
        }
        Ok(catalog)
    }

    /// Registers a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateToolName`] if the name is already registered,
    /// regardless of which adapter owns the existing entry.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if self.index.contains_key(&descriptor.name) {
            return Err(Error::DuplicateToolName(descriptor.name));
        }
        tracing::debug!(
            tool = %descriptor.name,
            adapter = %descriptor.adapter,
            "Registered tool"
        );
        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
        Ok(())
    }

    /// Returns every descriptor, in registration order.
    #[must_use]
    pub fn all(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Resolves a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTool`] if no tool has this name.
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor> {
        self.index
            .get(name)
            .and_then(|&idx| self.tools.get(idx))
            .ok_or_else(|| Error::UnknownTool(name.to_string()))
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
