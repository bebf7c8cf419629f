//! Owns compiled [`LanguageModule`]s across the lifetime of every [`Store`]
//! that instantiates them.
//!
//! [`Store`]: crate::store::Store

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use wasmtime::Module;

use crate::dylink::DylinkInfo;

static NEXT_LANGUAGE_ID: AtomicU32 = AtomicU32::new(1);

/// A compiled, not-yet-resident module plus its name and a globally unique
/// `language_id`. Shared by reference (`Arc`) across every `Store` that
/// instantiates it. Keeps the original bytes and parsed dylink footprint
/// around so a later `Store` can re-run the instantiation steps (§4.3
/// "Re-binding") without recompiling or re-materialising the descriptor.
pub struct LanguageModuleInner {
    pub language_id: u32,
    pub name: String,
    pub module: Module,
    pub wasm_bytes: Vec<u8>,
    pub dylink: DylinkInfo,
}

/// A cheap-to-clone handle to a [`LanguageModuleInner`]. This is the Rust
/// analogue of the reference implementation's `LanguageWasmModule *` stashed
/// in a descriptor's sentinel field: an explicit, non-owning reference that
/// must not outlive the registry that owns the module.
#[derive(Clone)]
pub struct ModuleHandle(pub(crate) Arc<LanguageModuleInner>);

impl ModuleHandle {
    pub fn language_id(&self) -> u32 {
        self.0.language_id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn module(&self) -> &Module {
        &self.0.module
    }

    pub fn dylink(&self) -> DylinkInfo {
        self.0.dylink
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("language_id", &self.0.language_id)
            .field("name", &self.0.name)
            .finish()
    }
}

/// Registers newly-compiled language modules and assigns each a
/// process-wide unique `language_id`. Mirrors the "registry outside the
/// core" the original design assumes owns a `LanguageModule`'s lifetime.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleHandle>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly-compiled module under a new monotonic
    /// `language_id` and returns a handle to it.
    pub fn register(&mut self, name: String, module: Module, wasm_bytes: Vec<u8>, dylink: DylinkInfo) -> ModuleHandle {
        let language_id = NEXT_LANGUAGE_ID.fetch_add(1, Ordering::Relaxed);
        let handle = ModuleHandle(Arc::new(LanguageModuleInner {
            language_id,
            name,
            module,
            wasm_bytes,
            dylink,
        }));
        self.modules.push(handle.clone());
        handle
    }

    pub fn get(&self, language_id: u32) -> Option<&ModuleHandle> {
        self.modules.iter().find(|m| m.language_id() == language_id)
    }
}
