//! Resource model.
//!
//! This module defines typed resource descriptors:
//! - Resource kinds with their recognized inputs and default outputs
//! - Input values that are literals, collections or references
//! - Named resource sets with duplicate detection

mod kind;
mod set;
mod spec;
mod value;

pub use kind::{InputDefault, InputField, KindSchema, OutputType, ResourceKind};
pub use set::ResourceSet;
pub use spec::{Inputs, OutputDecls, ResourceSpec};
pub use value::{InputValue, Reference, ValueShape};
