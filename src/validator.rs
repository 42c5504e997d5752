//! The validator facade: load definitions, compile once, validate many.
//!
//! A `Validator` owns its compiled schema map and hierarchy store;
//! nothing in the library is process-global except the package cache
//! location. Loading more definitions recompiles the whole set; the
//! compiler is cheap relative to package I/O and recompiling keeps the
//! topological guarantees intact.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::compile::{CompiledSet, SchemaCompiler};
use crate::error::{CompileLog, Issue, IssueCode, LoaderError, LoaderResult};
use crate::fhirpath::FhirPathEvaluator;
use crate::hierarchy::HierarchyStore;
use crate::package::{CacheLoader, PackageId, PackageManifest, ResourceLoader};
use crate::registry::{ResourceFile, ResourceRegistry};
use crate::runtime::{CancelFlag, Schema, SchemaEngine};

/// Options for one `validate` call.
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Profiles to validate against, in addition to the document's own
    /// declarations.
    pub profiles: Vec<String>,
    /// Skip `meta.profile` declarations inside the document.
    pub ignore_self_declared_profiles: bool,
    /// Stay silent about profiles no schema is compiled for.
    pub ignore_unknown_schemas: bool,
    /// Per-call deadline; expiry cancels in-flight evaluation.
    pub timeout: Option<Duration>,
}

/// Outcome of one `validate` call. `success` iff `errors` is empty; the
/// document itself is returned untouched.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub success: bool,
    pub errors: Vec<String>,
    pub issues: Vec<Issue>,
    pub data: Option<Value>,
}

/// A document input: parsed JSON, raw text, or a file path. Text that
/// names an existing file is read from disk; other text is parsed as
/// JSON; text that parses as neither passes through raw and fails type
/// validation downstream.
#[derive(Debug, Clone)]
pub enum Document {
    Value(Value),
    Text(String),
    File(PathBuf),
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Document::Value(value)
    }
}

impl From<&str> for Document {
    fn from(text: &str) -> Self {
        Document::Text(text.to_string())
    }
}

impl From<String> for Document {
    fn from(text: String) -> Self {
        Document::Text(text)
    }
}

impl From<&Path> for Document {
    fn from(path: &Path) -> Self {
        Document::File(path.to_path_buf())
    }
}

impl From<PathBuf> for Document {
    fn from(path: PathBuf) -> Self {
        Document::File(path)
    }
}

struct CompiledState {
    schemas: CompiledSet,
    hierarchies: Arc<HierarchyStore>,
    log: CompileLog,
}

/// Compiles registered definition packages and validates documents
/// against them.
pub struct Validator {
    loader: Arc<dyn ResourceLoader>,
    fhirpath: Option<Arc<dyn FhirPathEvaluator>>,
    registry: ResourceRegistry,
    documents: HashMap<PathBuf, Value>,
    extra_schemas: Vec<(String, Arc<Schema>)>,
    loaded_packages: HashSet<String>,
    synthetic_counter: usize,
    compiled: CompiledState,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// An empty validator over the default package cache.
    pub fn new() -> Self {
        Self::with_loader(Arc::new(CacheLoader::new()))
    }

    /// An empty validator with a pluggable package loader.
    pub fn with_loader(loader: Arc<dyn ResourceLoader>) -> Self {
        let (schemas, hierarchies, log) = SchemaCompiler::new().freeze();
        Self {
            loader,
            fhirpath: None,
            registry: ResourceRegistry::new(),
            documents: HashMap::new(),
            extra_schemas: Vec::new(),
            loaded_packages: HashSet::new(),
            synthetic_counter: 0,
            compiled: CompiledState {
                schemas,
                hierarchies,
                log,
            },
        }
    }

    /// Attach a FHIRPath engine for embedded constraint checking.
    pub fn set_fhirpath_evaluator(&mut self, evaluator: Arc<dyn FhirPathEvaluator>) {
        self.fhirpath = Some(evaluator);
    }

    /// Inject an opaque validator for an external vocabulary ahead of the
    /// next compilation.
    pub fn register_schema(&mut self, url: impl Into<String>, schema: Arc<Schema>) {
        self.extra_schemas.push((url.into(), schema));
        self.recompile();
    }

    /// Whether a compiled validator exists for a canonical URL or name.
    pub fn recognizes(&self, key: &str) -> bool {
        self.compiled.schemas.contains(key)
    }

    /// The compile log of the last compilation.
    pub fn compile_log(&self) -> &CompileLog {
        &self.compiled.log
    }

    /// Register in-memory definition resources, then recompile.
    pub fn load_resources<I>(&mut self, resources: I)
    where
        I: IntoIterator<Item = Value>,
    {
        for json in resources {
            self.synthetic_counter += 1;
            let path = PathBuf::from(format!("memory/resource-{}.json", self.synthetic_counter));
            self.register_document(&path, json);
        }
        self.recompile();
    }

    /// Register local files or every `*.json` under directories, then
    /// recompile. Explicitly named files must parse; directory scans skip
    /// non-resource files quietly.
    pub async fn load_files<I, P>(&mut self, paths: I) -> LoaderResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            let path = path.as_ref();
            let metadata = fs::metadata(path).await.map_err(|source| LoaderError::Io {
                path: path.display().to_string(),
                source,
            })?;
            if metadata.is_dir() {
                for file in collect_json_files(path).await? {
                    self.load_file_tolerant(&file).await;
                }
            } else {
                let json = read_json(path).await?;
                self.register_document(path, json);
            }
        }
        self.recompile();
        Ok(())
    }

    /// Fetch (or reuse) packages and their transitive dependencies, then
    /// recompile. Ids are `<name>` or `<name>!<version>`; the version may
    /// be `latest`.
    pub async fn load_packages<I, S>(&mut self, ids: I) -> LoaderResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut queue: Vec<PackageId> = ids
            .into_iter()
            .map(|id| PackageId::parse(id.as_ref()))
            .collect();

        while let Some(id) = queue.pop() {
            let package_dir = self.loader.resolve(&id).await?;
            let manifest = read_manifest(&package_dir).await?;

            let key = format!("{}#{}", manifest.name, manifest.version);
            if !self.loaded_packages.insert(key.clone()) {
                continue;
            }
            info!(package = %key, "loading package");

            for file in collect_json_files(&package_dir).await? {
                if file.file_name().is_some_and(|n| n == "package.json") {
                    continue;
                }
                self.load_file_tolerant(&file).await;
            }

            for (name, version) in &manifest.dependencies {
                queue.push(PackageId {
                    name: name.clone(),
                    version: version.clone(),
                });
            }
        }

        self.recompile();
        Ok(())
    }

    /// Validate a document against the effective profile list: explicit
    /// options, the document's own `meta.profile` (unless ignored), and
    /// the document's `url` when present.
    pub async fn validate(
        &self,
        document: impl Into<Document>,
        options: ValidateOptions,
    ) -> ValidationOutcome {
        let document = materialize(document.into()).await;

        let mut profiles: Vec<String> = Vec::new();
        let mut push = |url: &str| {
            if !url.is_empty() && !profiles.iter().any(|p| p == url) {
                profiles.push(url.to_string());
            }
        };
        for profile in &options.profiles {
            push(profile);
        }
        if !options.ignore_self_declared_profiles {
            for declared in document
                .get("meta")
                .and_then(|m| m.get("profile"))
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(url) = declared.as_str() {
                    push(url);
                }
            }
        }
        if let Some(url) = document.get("url").and_then(Value::as_str) {
            push(url);
        }

        let engine = match &self.fhirpath {
            Some(evaluator) => SchemaEngine::new(self.compiled.hierarchies.clone())
                .with_fhirpath(evaluator.clone()),
            None => SchemaEngine::new(self.compiled.hierarchies.clone()),
        };

        let cancel = CancelFlag::new();
        if let Some(timeout) = options.timeout {
            cancel.cancel_after(timeout);
        }

        let mut issues: Vec<Issue> = Vec::new();
        for profile in &profiles {
            match self.compiled.schemas.resolve(profile) {
                Some(schema) => {
                    debug!(profile = %profile, "validating against profile");
                    issues.extend(engine.validate(&schema, &document, &cancel).await);
                }
                None if options.ignore_unknown_schemas => {}
                None => issues.push(Issue::new(
                    IssueCode::UnknownProfile,
                    "",
                    format!("Could not find schema for {profile}"),
                )),
            }
        }

        let mut errors: Vec<String> = Vec::new();
        for issue in &issues {
            let rendered = issue.to_string();
            if !errors.contains(&rendered) {
                errors.push(rendered);
            }
        }

        ValidationOutcome {
            success: errors.is_empty(),
            errors,
            issues,
            data: Some(document),
        }
    }

    async fn load_file_tolerant(&mut self, path: &Path) {
        match read_json(path).await {
            Ok(json) => self.register_document(path, json),
            Err(error) => warn!(path = %path.display(), %error, "skipping unreadable file"),
        }
    }

    fn register_document(&mut self, path: &Path, json: Value) {
        match ResourceFile::from_json(path, &json) {
            Some(file) => {
                self.documents.insert(file.file_path.clone(), json);
                self.registry.register(file);
            }
            None => debug!(path = %path.display(), "not a conformance resource; skipped"),
        }
    }

    fn recompile(&mut self) {
        let mut compiler = SchemaCompiler::new();
        for (url, schema) in &self.extra_schemas {
            compiler.register_schema(url.clone(), schema.clone());
        }

        let resources: Vec<(ResourceFile, Value)> = self
            .registry
            .deduplicate()
            .into_iter()
            .filter_map(|file| {
                self.documents
                    .get(&file.file_path)
                    .map(|json| (file, json.clone()))
            })
            .collect();

        compiler.compile_resources(resources);
        let (schemas, hierarchies, log) = compiler.freeze();
        self.compiled = CompiledState {
            schemas,
            hierarchies,
            log,
        };
    }
}

/// Resolve a document input to a JSON value, per the facade contract.
async fn materialize(document: Document) -> Value {
    match document {
        Document::Value(value) => value,
        Document::File(path) => match fs::read_to_string(&path).await {
            Ok(text) => parse_or_raw(text),
            Err(error) => {
                warn!(path = %path.display(), %error, "document file unreadable");
                Value::String(path.display().to_string())
            }
        },
        Document::Text(text) => {
            if fs::try_exists(Path::new(&text)).await.unwrap_or(false) {
                match fs::read_to_string(Path::new(&text)).await {
                    Ok(contents) => parse_or_raw(contents),
                    Err(_) => parse_or_raw(text),
                }
            } else {
                parse_or_raw(text)
            }
        }
    }
}

/// Parse text as JSON; parse failures pass the raw string through so type
/// validation reports them.
fn parse_or_raw(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

async fn read_json(path: &Path) -> LoaderResult<Value> {
    let bytes = fs::read(path).await.map_err(|source| LoaderError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| LoaderError::JsonParseError {
        path: path.display().to_string(),
        source,
    })
}

async fn read_manifest(package_dir: &Path) -> LoaderResult<PackageManifest> {
    let manifest_path = package_dir.join("package.json");
    let json = read_json(&manifest_path).await?;
    serde_json::from_value(json).map_err(|source| LoaderError::CacheCorrupt {
        path: manifest_path.display().to_string(),
        message: source.to_string(),
    })
}

/// Every `*.json` under `dir`, recursively, in deterministic order.
async fn collect_json_files(dir: &Path) -> LoaderResult<Vec<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();

    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current).await.map_err(|source| LoaderError::Io {
            path: current.display().to_string(),
            source,
        })?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
