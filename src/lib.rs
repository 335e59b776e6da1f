//! # spa_actions
//!
//! Compiles symbolic action rules over semantic pointers into the connection
//! topology of a neural model.
//!
//! Concepts are random high-dimensional vectors held in per-dimensionality
//! vocabularies. Rules such as `dot(state, A) --> state = B` are parsed,
//! resolved against the modules of a [`Model`](model::Model) and emitted as
//! [`ConnectionSpec`](model::ConnectionSpec)s: source port, sink port,
//! transform matrix, synapse and optional gate. Nothing here simulates; the
//! output is a static description for a simulator to build.
//!
//! ## Quick Start
//!
//! ```
//! use spa_actions::prelude::*;
//!
//! let mut model = Model::with_seed("demo", 42);
//! model.register("a", Module::buffer(16)).unwrap();
//! model.register("b", Module::buffer(16)).unwrap();
//!
//! let cortical = Cortical::build(&mut model, "cortical", &["b = a * CAT"], CorticalConfig::default()).unwrap();
//! assert_eq!(cortical.connections().len(), 1);
//!
//! let cat = model.default_vocab(16).get("CAT").unwrap();
//! assert!(cortical.connections()[0]
//!     .transform
//!     .approx_eq(&cat.convolution_matrix(), 1e-6));
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): serialization of configs, syntax trees and connection specs
//! - `parallel`: multi-threaded matrix construction and similarity scans via rayon
//! - `simd`: SIMD dot products via the `wide` crate
//!
//! ## Modules
//!
//! - [`vocab`]: vocabularies and pointer generation
//! - [`pointer`]: semantic pointer algebra
//! - [`parser`] / [`ast`]: the action language
//! - [`model`] / [`module`]: the module registry the rules resolve against
//! - [`compiler`] / [`context`]: evaluation of rules into connections
//! - [`cortical`], [`basal_ganglia`], [`thalamus`]: structural builders

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/transform.rs"]
pub mod transform;

#[path = "core/pointer.rs"]
pub mod pointer;

#[path = "core/vocab.rs"]
pub mod vocab;

#[path = "core/module.rs"]
pub mod module;

#[path = "core/model.rs"]
pub mod model;

#[path = "core/ast.rs"]
pub mod ast;

#[path = "core/parser.rs"]
pub mod parser;

#[path = "core/context.rs"]
pub mod context;

#[path = "core/compiler.rs"]
pub mod compiler;

#[path = "core/cortical.rs"]
pub mod cortical;

#[path = "core/basal_ganglia.rs"]
pub mod basal_ganglia;

#[path = "core/thalamus.rs"]
pub mod thalamus;

/// Prelude module for convenient imports.
///
/// ```
/// use spa_actions::prelude::*;
/// ```
pub mod prelude {
    pub use crate::ast::{Action, Actions, Effect, Expr};
    pub use crate::basal_ganglia::{BasalGanglia, BasalGangliaConfig, ChannelPorts};
    pub use crate::compiler::{compile, compile_actions, ActionCompiler};
    pub use crate::context::{ConstructionContext, Role};
    pub use crate::cortical::{Cortical, CorticalConfig};
    pub use crate::error::{Result, SpaError};
    pub use crate::model::{ConnectionSpec, Model, ModelScope, PortRef};
    pub use crate::module::{HasPorts, HasVocabulary, Module, ModuleKind, Nonlinearity, Port, PortVocab};
    pub use crate::pointer::SemanticPointer;
    pub use crate::prng::{Prng, SharedPrng};
    pub use crate::thalamus::{Thalamus, ThalamusConfig};
    pub use crate::transform::Transform;
    pub use crate::vocab::{Vocabulary, VocabularyConfig, VocabularyMap};
}
