//! Loads tree-sitter-shaped language grammars compiled to relocatable
//! (`dylink.0`) WebAssembly modules into a shared [`wasmtime`] sandbox, and
//! dispatches lexer/external-scanner calls into them.
//!
//! A [`store::Store`] owns one linear memory and one indirect function
//! table shared by every language loaded into it. `Store::load_language`
//! compiles and instantiates a module at a freshly-assigned memory/table
//! base and copies its static parse tables out into a
//! [`descriptor::Descriptor`]; `Store::bind`/dispatch calls then marshal a
//! host-provided [`lexer::Lexer`] through the guest's lex/scanner entry
//! points.

pub mod descriptor;
mod dispatcher;
pub mod dylink;
pub mod error;
pub mod language_types;
pub mod lexer;
mod loader;
pub mod module_registry;
pub mod store;

pub use descriptor::Descriptor;
pub use error::{LoaderError, Result};
pub use lexer::Lexer;
pub use store::{Store, StoreConfig};
