//! Model references and their source classification.

pub mod reference;

pub use reference::{encode_component, ArchiveKind, ModelReference, SourceKind};
