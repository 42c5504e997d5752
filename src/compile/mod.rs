//! The definition-to-schema compiler.
//!
//! Resources are compiled in dependency order (leaves first) into an
//! accumulating by-URL map, so `resolve` returns the final validator for
//! anything in an earlier stratum. References that cannot be resolved
//! (missing registrations, cycle participants) substitute `Any` and are
//! recorded in the compile log. That substitution is the principal
//! resilience mechanism: cycles are a compile-time warning and a runtime
//! permissiveness, never a crash.

mod code_system;
mod structure;
mod value_set;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::definitions::{CodeSystem, StructureDefinition, ValueSet};
use crate::deps::{canonicalize_type_code, extract_dependencies};
use crate::error::{CompileError, CompileLog};
use crate::hierarchy::HierarchyStore;
use crate::ir::build_tree;
use crate::registry::{ResourceFile, ResourceType, kind_order};
use crate::runtime::Schema;
use crate::toposort::{DependencyOrder, topo_sort_seeded};

/// The frozen output of compilation: immutable schemas shared by URL plus
/// the hierarchy store consulted by filter refinements.
#[derive(Debug, Clone)]
pub struct CompiledSet {
    by_url: HashMap<String, Arc<Schema>>,
    aliases: HashMap<String, String>,
}

impl CompiledSet {
    fn new() -> Self {
        Self {
            by_url: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    fn insert(&mut self, url: impl Into<String>, schema: Arc<Schema>) {
        self.by_url.insert(url.into(), schema);
    }

    fn alias(&mut self, name: impl Into<String>, url: impl Into<String>) {
        let name = name.into();
        if name.is_empty() {
            return;
        }
        self.aliases.entry(name).or_insert_with(|| url.into());
    }

    /// Look up a schema by canonical URL, registered alias, or bare type
    /// code.
    pub fn resolve(&self, key: &str) -> Option<Arc<Schema>> {
        if let Some(schema) = self.by_url.get(key) {
            return Some(schema.clone());
        }
        if let Some(url) = self.aliases.get(key) {
            return self.by_url.get(url).cloned();
        }
        let canonical = canonicalize_type_code(key);
        if canonical != key {
            return self.by_url.get(&canonical).cloned();
        }
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.by_url.keys().map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests() -> Self {
        Self::new()
    }
}

/// Per-resource compile context: read access to everything already
/// compiled, plus a record of the references that failed to resolve.
pub(crate) struct Ctx<'a> {
    set: &'a CompiledSet,
    url: &'a str,
    unresolved: RefCell<BTreeSet<String>>,
}

impl<'a> Ctx<'a> {
    fn new(set: &'a CompiledSet, url: &'a str) -> Self {
        Self {
            set,
            url,
            unresolved: RefCell::new(BTreeSet::new()),
        }
    }

    pub(crate) fn resolve(&self, key: &str) -> Option<Arc<Schema>> {
        let found = self.set.resolve(key);
        if found.is_none() {
            self.unresolved.borrow_mut().insert(key.to_string());
        }
        found
    }

    /// Resolve or substitute `Any`, the cycle-tolerance contract.
    pub(crate) fn resolve_or_any(&self, key: &str) -> Arc<Schema> {
        self.resolve(key).unwrap_or_else(Schema::any)
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(set: &'a CompiledSet, url: &'a str) -> Self {
        Self::new(set, url)
    }

    fn drain_unresolved(self, log: &mut CompileLog) {
        for dependency in self.unresolved.into_inner() {
            log.push(CompileError::UnresolvedDependency {
                url: self.url.to_string(),
                dependency,
            });
        }
    }
}

/// Compiles registered resources into a [`CompiledSet`].
///
/// Single-threaded by design: the compiler is the only writer of the
/// by-URL map, which is frozen and shared read-only afterwards.
pub struct SchemaCompiler {
    set: CompiledSet,
    hierarchies: HierarchyStore,
    log: CompileLog,
}

impl Default for SchemaCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCompiler {
    /// An empty compiler with the built-in catalog preloaded.
    pub fn new() -> Self {
        let mut compiler = Self {
            set: CompiledSet::new(),
            hierarchies: HierarchyStore::new(),
            log: CompileLog::new(),
        };
        for (url, schema) in crate::builtin::catalog() {
            compiler.register_schema(url, schema);
        }
        compiler
    }

    /// Inject an opaque validator ahead of compilation, e.g. a catch-all
    /// for an external vocabulary.
    pub fn register_schema(&mut self, url: impl Into<String>, schema: Arc<Schema>) {
        self.set.insert(url, schema);
    }

    pub fn log(&self) -> &CompileLog {
        &self.log
    }

    pub fn schemas(&self) -> &CompiledSet {
        &self.set
    }

    pub fn recognizes(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    pub fn resolve(&self, key: &str) -> Option<Arc<Schema>> {
        self.set.resolve(key)
    }

    /// Freeze compilation output for sharing with validation engines.
    pub fn freeze(self) -> (CompiledSet, Arc<HierarchyStore>, CompileLog) {
        (self.set, Arc::new(self.hierarchies), self.log)
    }

    /// Compile every parsed resource, dependencies first.
    ///
    /// The input is stabilized with the by-kind comparator before the
    /// dependency sort, so ties between unrelated resources are broken
    /// deterministically.
    pub fn compile_resources(&mut self, mut resources: Vec<(ResourceFile, Value)>) {
        resources.sort_by(|(a, _), (b, _)| kind_order(a, b));

        let graph: BTreeMap<String, BTreeSet<String>> = resources
            .iter()
            .map(|(file, json)| {
                (
                    file.url.clone(),
                    extract_dependencies(file.resource_type, json),
                )
            })
            .collect();

        // The kind-sorted sequence seeds the DFS, so ties between
        // unrelated resources keep the stabilizer's order.
        let sort = topo_sort_seeded(&graph, resources.iter().map(|(file, _)| file.url.as_str()));
        for cycle in &sort.cycles {
            self.log.push(CompileError::CyclicDependency {
                cycle: cycle.clone(),
            });
        }

        let order = DependencyOrder::new(&sort);
        resources.sort_by(|(a, _), (b, _)| order.compare(&a.url, &b.url));

        for (file, json) in &resources {
            self.compile_one(file, json);
        }
    }

    fn compile_one(&mut self, file: &ResourceFile, json: &Value) {
        debug!(url = %file.url, kind = %file.resource_type.as_str(), "compiling");
        match file.resource_type {
            ResourceType::StructureDefinition => self.compile_structure_definition(file, json),
            ResourceType::ValueSet => self.compile_value_set(file, json),
            ResourceType::CodeSystem => self.compile_code_system(file, json),
            // Maps and guides carry dependency edges but no validator.
            ResourceType::ConceptMap
            | ResourceType::StructureMap
            | ResourceType::ImplementationGuide => {}
        }
    }

    fn compile_structure_definition(&mut self, file: &ResourceFile, json: &Value) {
        let sd: StructureDefinition = match serde_json::from_value(json.clone()) {
            Ok(sd) => sd,
            Err(error) => {
                self.log.push(CompileError::MalformedDefinition {
                    url: file.url.clone(),
                    message: error.to_string(),
                });
                self.set.insert(file.url.clone(), Schema::any());
                return;
            }
        };

        if !matches!(
            sd.kind.as_str(),
            "primitive-type" | "complex-type" | "resource" | "logical"
        ) {
            self.log.push(CompileError::UnsupportedKind {
                url: file.url.clone(),
                kind: sd.kind.clone(),
            });
            self.set.insert(file.url.clone(), Schema::any());
            return;
        }

        let schema = match build_tree(&sd) {
            Ok(tree) => {
                let ctx = Ctx::new(&self.set, &file.url);
                let schema = structure::compile_structure(&sd, &tree, &ctx);
                ctx.drain_unresolved(&mut self.log);
                schema
            }
            Err(error) => {
                self.log.push(error);
                Schema::any()
            }
        };

        self.set.insert(sd.url.clone(), schema);
        self.set.alias(sd.name.clone(), sd.url.clone());
        // Bare type codes resolve to core definitions only; profiles keep
        // their own canonical identity.
        if sd.url == canonicalize_type_code(&sd.type_name) {
            self.set.alias(sd.type_name.clone(), sd.url.clone());
        }
    }

    fn compile_value_set(&mut self, file: &ResourceFile, json: &Value) {
        let vs: ValueSet = match serde_json::from_value(json.clone()) {
            Ok(vs) => vs,
            Err(error) => {
                self.log.push(CompileError::MalformedDefinition {
                    url: file.url.clone(),
                    message: error.to_string(),
                });
                self.set.insert(file.url.clone(), Schema::any());
                return;
            }
        };

        let ctx = Ctx::new(&self.set, &file.url);
        let schema = value_set::compile_value_set(&vs, &ctx);
        ctx.drain_unresolved(&mut self.log);

        self.set.insert(vs.url.clone(), schema);
        if let Some(name) = &vs.name {
            self.set.alias(name.clone(), vs.url.clone());
        }
    }

    fn compile_code_system(&mut self, file: &ResourceFile, json: &Value) {
        let cs: CodeSystem = match serde_json::from_value(json.clone()) {
            Ok(cs) => cs,
            Err(error) => {
                self.log.push(CompileError::MalformedDefinition {
                    url: file.url.clone(),
                    message: error.to_string(),
                });
                self.set.insert(file.url.clone(), Schema::any());
                return;
            }
        };

        match code_system::compile_code_system(&cs, &mut self.hierarchies) {
            Some(schema) => {
                self.set.insert(cs.url.clone(), schema);
                if let Some(name) = &cs.name {
                    self.set.alias(name.clone(), cs.url.clone());
                }
            }
            None => {
                warn!(url = %cs.url, content = ?cs.content, "code system contributes no validator");
            }
        }
    }
}
