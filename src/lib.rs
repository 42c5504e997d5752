//! # FHIR Validator
//!
//! A runtime validator for FHIR R4 resource documents. Terminology and
//! profile definitions (StructureDefinition, ValueSet, CodeSystem) are
//! compiled into an in-memory, executable validation program; candidate
//! documents are then checked against one or more named profiles.
//!
//! The pipeline, leaves first: a registry deduplicates overlapping
//! canonical URLs, a dependency analyzer and cycle-tolerant topological
//! sorter fix the compile order, each StructureDefinition's flat snapshot
//! is lowered into a tree-shaped intermediate form, and a schema compiler
//! emits composable validators (primitives, complex types, resources,
//! value sets, code-system enumerations, and hierarchical code-system
//! queries) into a by-URL map the async runtime executes against.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use fhir_validator::{ValidateOptions, Validator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut validator = Validator::new();
//!     validator.load_packages(["hl7.fhir.r4.core!4.0.1"]).await?;
//!
//!     let outcome = validator
//!         .validate(
//!             serde_json::json!({"resourceType": "Patient", "active": true}),
//!             ValidateOptions {
//!                 profiles: vec!["http://hl7.org/fhir/StructureDefinition/Patient".into()],
//!                 ..Default::default()
//!             },
//!         )
//!         .await;
//!
//!     assert!(outcome.success, "{:?}", outcome.errors);
//!     Ok(())
//! }
//! ```

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod builtin;
pub mod compile;
pub mod definitions;
pub mod deps;
pub mod error;
pub mod fhirpath;
pub mod hierarchy;
pub mod ir;
pub mod package;
pub mod registry;
pub mod runtime;
pub mod toposort;
pub mod validator;

pub use compile::{CompiledSet, SchemaCompiler};
pub use error::{CompileError, CompileLog, Issue, IssueCode, LoaderError, LoaderResult};
pub use fhirpath::{FhirPathError, FhirPathEvaluator};
pub use hierarchy::{ConceptHierarchy, ConceptNode, HierarchyStore, PropertyValue};
pub use package::{CacheLoader, PackageId, PackageManifest, ResourceLoader};
pub use registry::{DefinitionKind, ResourceFile, ResourceRegistry, ResourceStatus, ResourceType};
pub use runtime::{CancelFlag, Refinement, Schema, SchemaEngine};
pub use validator::{Document, ValidateOptions, ValidationOutcome, Validator};
