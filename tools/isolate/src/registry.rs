use crate::assertions::{self, AssertFn, LIBRARY_CONTEXT};
use crate::types::{Target, DEFAULT_CALLER};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Default)]
pub struct Namespaces {
    contexts: BTreeMap<String, BTreeMap<String, AssertFn>>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library() -> Self {
        let mut namespaces = Self::new();
        namespaces
            .contexts
            .insert(LIBRARY_CONTEXT.to_string(), assertions::library());
        namespaces
    }

    pub fn define(&mut self, context: &str, name: &str, function: AssertFn) {
        self.contexts
            .entry(context.to_string())
            .or_default()
            .insert(name.to_string(), function);
    }

    pub fn lookup(&self, target: &Target) -> Option<&AssertFn> {
        self.contexts.get(&target.context)?.get(&target.name)
    }

    pub fn exports(&self, context: &str) -> Vec<String> {
        self.contexts
            .get(context)
            .map(|functions| functions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn import(&mut self, from: &str, name: &str, into: &str) -> bool {
        let Some(function) = self.lookup(&Target::new(from, name)).cloned() else {
            return false;
        };
        self.define(into, name, function);
        true
    }

    pub fn import_all(&mut self, from: &str, into: &str) -> usize {
        self.exports(from)
            .iter()
            .filter(|name| self.import(from, name, into))
            .count()
    }
}

#[derive(Clone)]
pub struct Interception {
    pub target: Target,
    pub original: AssertFn,
}

#[derive(Clone, Default)]
pub struct OverrideRegistry {
    namespaces: Namespaces,
    overrides: HashMap<Target, Interception>,
}

impl OverrideRegistry {
    pub fn new(namespaces: Namespaces) -> Self {
        Self {
            namespaces,
            overrides: HashMap::new(),
        }
    }

    /// The built-in library, re-exported into `main` and intercepted in both places.
    pub fn with_library() -> Self {
        let mut namespaces = Namespaces::with_library();
        namespaces.import_all(LIBRARY_CONTEXT, DEFAULT_CALLER);
        let mut registry = Self::new(namespaces);
        registry.install_library(LIBRARY_CONTEXT, &[LIBRARY_CONTEXT, DEFAULT_CALLER]);
        registry
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn namespaces_mut(&mut self) -> &mut Namespaces {
        &mut self.namespaces
    }

    /// Intercepts `context::name`.
    ///
    /// Returns true only when a new interception was installed. A target that
    /// is already intercepted keeps its first original; a context that does
    /// not export `name` is skipped.
    pub fn install_intercept(&mut self, context: &str, name: &str) -> bool {
        let target = Target::new(context, name);
        if self.overrides.contains_key(&target) {
            return false;
        }
        let Some(original) = self.namespaces.lookup(&target).cloned() else {
            return false;
        };
        self.overrides
            .insert(target.clone(), Interception { target, original });
        true
    }

    pub fn install_intercepts<'a, I, N>(&mut self, mapping: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, N)>,
        N: IntoIterator<Item = &'a str>,
    {
        let mut installed = 0;
        for (context, names) in mapping {
            for name in names {
                if self.install_intercept(context, name) {
                    installed += 1;
                }
            }
        }
        installed
    }

    pub fn install_library(&mut self, library: &str, contexts: &[&str]) -> usize {
        let names = self.namespaces.exports(library);
        contexts
            .iter()
            .map(|context| {
                names
                    .iter()
                    .filter(|name| self.install_intercept(context, name))
                    .count()
            })
            .sum()
    }

    /// Aliases `from::name` into `into`; an intercepted source stays intercepted under the alias.
    pub fn import(&mut self, from: &str, name: &str, into: &str) -> bool {
        if !self.namespaces.import(from, name, into) {
            return false;
        }
        if let Some(original) = self.original(&Target::new(from, name)).cloned() {
            let target = Target::new(into, name);
            self.overrides
                .entry(target.clone())
                .or_insert(Interception { target, original });
        }
        true
    }

    pub fn import_all(&mut self, from: &str, into: &str) -> usize {
        self.namespaces
            .exports(from)
            .iter()
            .filter(|name| self.import(from, name, into))
            .count()
    }

    pub fn is_intercepted(&self, target: &Target) -> bool {
        self.overrides.contains_key(target)
    }

    pub fn original(&self, target: &Target) -> Option<&AssertFn> {
        self.overrides
            .get(target)
            .map(|interception| &interception.original)
    }

    pub fn intercepted(&self) -> Vec<Target> {
        let mut targets = self.overrides.keys().cloned().collect::<Vec<_>>();
        targets.sort();
        targets
    }
}
