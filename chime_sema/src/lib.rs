//! Semantic analysis for the Chime compiler: the canonical type manager,
//! the type checker, generic instantiation, extension auto-boxing and
//! inline analysis.

pub mod boxing;
pub mod check;
pub mod inline;
pub mod instantiate;
pub mod pipeline;
pub mod pset;
pub mod symbol;
pub mod types;

pub use crate::pset::{CommitScope, PSet, VersionId};
pub use crate::symbol::{SymbolInfo, SymbolKind, SymbolTable};
pub use crate::types::{Ty, TypeManager};
