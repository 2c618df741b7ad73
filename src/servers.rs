//! Language-specific server variants.

pub mod clangd;
pub mod generic;
pub mod php;
pub mod rust;

pub use clangd::ClangdClient;
pub use generic::GenericClient;
pub use php::PhpClient;
pub use rust::RustClient;
