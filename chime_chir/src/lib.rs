//! CHIR, the Chime typed intermediate representation: pool-based IR
//! model, the versioned serializer and deserializer, the bump-pointer
//! arena backing IR construction, the readable-text printer, and the
//! incremental-compilation cache loader.

pub mod arena;
pub mod deserialize;
pub mod incremental;
pub mod ir;
pub mod printer;
pub mod serialize;

pub use crate::arena::BumpPtrAllocator;
pub use crate::deserialize::Deserializer;
pub use crate::ir::IrPackage;
pub use crate::serialize::serialize_package;

/// File extension of serialized CHIR containers.
pub const CHIR_FILE_EXTENSION: &str = "chir";
/// File extension of the readable dump produced by `chir-dis`.
pub const CHIR_READABLE_FILE_EXTENSION: &str = "chirtxt";
