//! Plugin registry
//!
//! A [`Plugin`] contributes node kinds, trait implementations, declared
//! result types and (usually) the interpreter [`Fragment`] for its
//! namespace. A [`PluginSet`] composes plugins once, rejecting duplicate
//! names and overlapping node kinds at composition time, and is then used
//! both to build programs and to assemble an [`Interpreter`].

use std::collections::HashMap;
use std::rc::Rc;

use crate::builder::{Builder, Expr};
use crate::error::{BuildResult, ConfigError};
use crate::graph::{Program, Schema, TypeTag};
use crate::interp::{Fragment, Interpreter};

/// One plugin's implementation of a trait for a semantic type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitImpl {
    /// Trait name, e.g. `eq` or `ord`.
    pub trait_name: &'static str,
    /// Operand type this implementation applies to.
    pub semantic_type: TypeTag,
    /// Operation name to node kind, e.g. `compare` to `num/compare`.
    pub ops: Vec<(&'static str, &'static str)>,
}

impl TraitImpl {
    /// Implementation of `trait_name` for `semantic_type`.
    pub fn new(trait_name: &'static str, semantic_type: TypeTag) -> Self {
        Self {
            trait_name,
            semantic_type,
            ops: Vec::new(),
        }
    }

    /// Map operation `op` to `kind`.
    pub fn op(mut self, op: &'static str, kind: &'static str) -> Self {
        self.ops.push((op, kind));
        self
    }

    /// Node kind implementing `op`.
    pub fn kind_for(&self, op: &str) -> Option<&'static str> {
        self.ops
            .iter()
            .find(|(name, _)| *name == op)
            .map(|(_, kind)| *kind)
    }
}

/// A named bundle of node kinds, traits and an interpreter fragment.
#[derive(Clone)]
pub struct Plugin {
    /// Plugin name; unique within a [`PluginSet`].
    pub name: &'static str,
    /// Node kinds this plugin owns.
    pub kinds: Vec<&'static str>,
    /// Kinds exempt from orphan detection (literals, placeholders, no-ops).
    pub inert: Vec<&'static str>,
    /// Trait implementations.
    pub traits: Vec<TraitImpl>,
    /// Semantic type of the values produced by some of the kinds.
    pub result_types: Vec<(&'static str, TypeTag)>,
    /// Interpreter for the plugin's kinds.
    pub fragment: Option<Rc<dyn Fragment>>,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("kinds", &self.kinds)
            .field("traits", &self.traits)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    /// Plugin owning `kinds`, interpreted by `fragment`.
    pub fn new(name: &'static str, kinds: &[&'static str], fragment: Rc<dyn Fragment>) -> Self {
        Self {
            name,
            kinds: kinds.to_vec(),
            inert: Vec::new(),
            traits: Vec::new(),
            result_types: Vec::new(),
            fragment: Some(fragment),
        }
    }

    /// Exempt `kinds` from orphan detection.
    pub fn inert(mut self, kinds: &[&'static str]) -> Self {
        self.inert.extend_from_slice(kinds);
        self
    }

    /// Add a trait implementation.
    pub fn implements(mut self, imp: TraitImpl) -> Self {
        self.traits.push(imp);
        self
    }

    /// Declare that `kind` produces values of type `tag`.
    pub fn returns(mut self, kind: &'static str, tag: TypeTag) -> Self {
        self.result_types.push((kind, tag));
        self
    }
}

struct Registry {
    plugins: Vec<Plugin>,
    owners: HashMap<&'static str, usize>,
}

/// An immutable, composition-checked set of plugins.
#[derive(Clone)]
pub struct PluginSet {
    inner: Rc<Registry>,
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PluginSet {
    /// Compose `plugins`, failing on a repeated name or node kind.
    pub fn new(plugins: impl IntoIterator<Item = Plugin>) -> Result<Self, ConfigError> {
        let plugins: Vec<Plugin> = plugins.into_iter().collect();
        let mut owners: HashMap<&'static str, usize> = HashMap::new();
        for (index, plugin) in plugins.iter().enumerate() {
            if plugins[..index].iter().any(|p| p.name == plugin.name) {
                return Err(ConfigError::DuplicatePlugin(plugin.name.to_string()));
            }
            for kind in &plugin.kinds {
                if let Some(previous) = owners.insert(*kind, index) {
                    return Err(ConfigError::OverlappingNodeKind {
                        kind: kind.to_string(),
                        first: plugins[previous].name.to_string(),
                        second: plugin.name.to_string(),
                    });
                }
            }
        }
        Ok(Self {
            inner: Rc::new(Registry { plugins, owners }),
        })
    }

    /// Core, scalar, error, fiber and named-effect plugins.
    pub fn standard() -> Result<Self, ConfigError> {
        Self::new(crate::plugins::standard())
    }

    /// A new set with `plugin` added.
    pub fn with(&self, plugin: Plugin) -> Result<Self, ConfigError> {
        Self::new(self.inner.plugins.iter().cloned().chain(std::iter::once(plugin)))
    }

    /// A new set with `plugin` replacing the one of the same name.
    pub fn replace(&self, plugin: Plugin) -> Result<Self, ConfigError> {
        let name = plugin.name;
        let rest = self
            .inner
            .plugins
            .iter()
            .filter(move |p| p.name != name)
            .cloned();
        Self::new(rest.chain(std::iter::once(plugin)))
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.inner.plugins.iter().map(|p| p.name).collect()
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.inner.plugins.iter().find(|p| p.name == name)
    }

    /// Whether `kind` is exempt from orphan detection.
    pub fn is_inert(&self, kind: &str) -> bool {
        self.owner(kind)
            .map(|plugin| plugin.inert.iter().any(|k| *k == kind))
            .unwrap_or(false)
    }

    /// Declared result type of `kind`.
    pub fn result_type(&self, kind: &str) -> Option<TypeTag> {
        self.owner(kind)?
            .result_types
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, tag)| *tag)
    }

    /// Every implementation of `trait_name`, in registration order.
    pub fn trait_impls(&self, trait_name: &str) -> Vec<&TraitImpl> {
        self.inner
            .plugins
            .iter()
            .flat_map(|p| p.traits.iter())
            .filter(|imp| imp.trait_name == trait_name)
            .collect()
    }

    /// Fragments contributed by the plugins.
    pub fn fragments(&self) -> Vec<Rc<dyn Fragment>> {
        self.inner
            .plugins
            .iter()
            .filter_map(|p| p.fragment.clone())
            .collect()
    }

    /// Run `f` once against a fresh [`Builder`] and assemble the program.
    pub fn build<F>(&self, schema: Schema, f: F) -> BuildResult<Program>
    where
        F: for<'b> FnOnce(&'b Builder) -> Expr<'b>,
    {
        let builder = Builder::new(self.clone(), schema);
        let result = f(&builder);
        let result = builder.lift(result).id();
        builder.finish(result)
    }

    /// Interpreter over every fragment in the set.
    pub fn interpreter(&self) -> Result<Interpreter, ConfigError> {
        Interpreter::new(self.fragments())
    }

    fn owner(&self, kind: &str) -> Option<&Plugin> {
        self.inner
            .owners
            .get(kind)
            .and_then(|index| self.inner.plugins.get(*index))
    }
}
