use thiserror::Error;

/// Errors produced while decoding, loading, or dispatching into a
/// WASM-backed language module.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The module bytes are not a loadable language module: bad magic/version,
    /// missing `dylink.0` section, or a truncated/oversized ULEB128.
    #[error("invalid module: {reason}")]
    InvalidModule { reason: String },

    /// The Wasmtime engine failed to compile the module.
    #[error("failed to compile module: {message}")]
    CompileError { message: String },

    /// The module declared an import this loader does not know how to satisfy.
    #[error("unresolved import: {name}")]
    UnresolvedImport { name: String },

    /// A trap occurred while instantiating the module.
    #[error("trap during instantiation: {message}")]
    InstantiationTrap { message: String },

    /// A trap occurred while running `__wasm_apply_data_relocs`.
    #[error("trap during data relocation: {message}")]
    RelocationTrap { message: String },

    /// The module does not export `tree_sitter_<name>` as a `() -> i32` function.
    #[error("module does not export a language function named tree_sitter_{language}")]
    MissingLanguageExport { language: String },

    /// A trap occurred while calling into the guest during dispatch, or while
    /// invoking the language-descriptor constructor.
    #[error("trap during guest call: {message}")]
    LanguageCallTrap { message: String },

    /// The store's memory or indirect function table could not be grown to
    /// cover a new module's footprint.
    #[error("store ran out of cursor space while growing {resource}")]
    OutOfCursorSpace { resource: &'static str },

    /// A descriptor that is not WASM-backed was passed to a Dispatcher
    /// operation that requires one.
    #[error("descriptor is not backed by a WASM language module")]
    NotWasmBacked,

    /// Any other Wasmtime-level failure not covered by a more specific variant.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;
