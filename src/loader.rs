//! Loads a relocatable language module into a [`Store`]: resolves its
//! imports against the closed prologue/stdlib set, instantiates it at a
//! freshly-assigned memory/table base, runs its data relocations, and
//! copies out a [`Descriptor`].

use tracing::{debug, info_span, warn};
use wasmtime::{Extern, Global, GlobalType, Instance, Module, Mutability, Ref, Val, ValType};

use crate::descriptor::{build_descriptor, read_entry_points, Descriptor, GuestEntryPoints, WasmDescriptor};
use crate::dylink::{parse_dylink_info, DylinkInfo};
use crate::error::{LoaderError, Result};
use crate::store::{FunctionIx, LanguageInstance, Store};

fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

impl Store {
    /// Loads `wasm_bytes` as a language named `language_name`, extending
    /// this Store by one `LanguageInstance` and returning its
    /// [`Descriptor`]. On any failure the Store's cursors and instance list
    /// are left exactly as they were before the call.
    pub fn load_language(&mut self, language_name: &str, wasm_bytes: &[u8]) -> Result<Descriptor> {
        let span = info_span!("load_language", name = %language_name);
        let _enter = span.enter();

        let dylink = parse_dylink_info(wasm_bytes)?;
        debug!(?dylink, "parsed dylink info");

        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| LoaderError::CompileError {
            message: e.to_string(),
        })?;

        let (instance, language_address, table_base) = self.instantiate(&module, dylink, language_name)?;

        let memory_data = self.memory.data(&self.inner).to_vec();
        let module_handle = self.registry.register(language_name.to_string(), module, wasm_bytes.to_vec(), dylink);
        let (wasm_descriptor, entry_points) =
            build_descriptor(&memory_data, language_address, module_handle.clone())?;

        let language_instance = absolute_instance(module_handle.language_id(), &entry_points, table_base);
        self.language_instances.push(language_instance);
        let _ = instance;

        debug!(language_id = language_instance.language_id, "language loaded");
        Ok(Descriptor::Wasm(Box::new(wasm_descriptor)))
    }

    /// Re-runs the instantiation steps (3-9 of §4.3) for an already
    /// compiled, already-registered module, appending a fresh
    /// `LanguageInstance` under its existing `language_id` without
    /// re-materialising the descriptor. Used by `bind` when a module
    /// previously loaded into another `Store` is bound into this one.
    pub(crate) fn reinstantiate_language(&mut self, wasm: &WasmDescriptor) -> Result<()> {
        let handle = wasm.module_handle.clone();
        let module = handle.module().clone();
        let dylink = handle.dylink();
        let (instance, language_address, table_base) = self.instantiate(&module, dylink, handle.name())?;
        let _ = instance;

        let memory_data = self.memory.data(&self.inner).to_vec();
        let entry_points = read_entry_points(&memory_data, language_address)?;

        let language_instance = absolute_instance(handle.language_id(), &entry_points, table_base);
        self.language_instances.push(language_instance);
        Ok(())
    }

    /// Steps 3-9 of §4.3: compute bases, grow memory/table, create the
    /// base globals, resolve imports, instantiate, run data relocations,
    /// and locate the language export. Commits cursor advances only on
    /// success.
    fn instantiate(&mut self, module: &Module, dylink: DylinkInfo, language_name: &str) -> Result<(Instance, i32, u32)> {
        let memory_base = align_up(self.memory_cursor, dylink.memory_align.max(1));
        let table_base = align_up(self.table_cursor, dylink.table_align.max(1));
        self.ensure_memory_capacity(memory_base + dylink.memory_size)?;
        self.ensure_table_capacity(table_base + dylink.table_size)?;

        let memory_base_global = Global::new(
            &mut self.inner,
            GlobalType::new(ValType::I32, Mutability::Const),
            Val::I32(memory_base as i32),
        )
        .map_err(LoaderError::Engine)?;
        let table_base_global = Global::new(
            &mut self.inner,
            GlobalType::new(ValType::I32, Mutability::Const),
            Val::I32(table_base as i32),
        )
        .map_err(LoaderError::Engine)?;

        let mut imports = Vec::new();
        for import in module.imports() {
            imports.push(self.resolve_import(import.name(), memory_base_global, table_base_global)?);
        }

        debug!(memory_base, table_base, "instantiating module");
        let instance = wasmtime::Instance::new(&mut self.inner, module, &imports)
            .map_err(|e| LoaderError::InstantiationTrap { message: e.to_string() })?;

        if let Ok(relocs) = instance.get_typed_func::<(), ()>(&mut self.inner, "__wasm_apply_data_relocs") {
            relocs
                .call(&mut self.inner, ())
                .map_err(|e| LoaderError::RelocationTrap { message: e.to_string() })?;
        }

        let export_name = format!("tree_sitter_{language_name}");
        let language_fn = instance
            .get_typed_func::<(), i32>(&mut self.inner, &export_name)
            .map_err(|_| LoaderError::MissingLanguageExport {
                language: language_name.to_string(),
            })?;
        let language_address = language_fn
            .call(&mut self.inner, ())
            .map_err(|e| LoaderError::LanguageCallTrap { message: e.to_string() })?;

        self.memory_cursor = memory_base + dylink.memory_size;
        self.table_cursor = table_base + dylink.table_size;

        Ok((instance, language_address, table_base))
    }

    fn resolve_import(&mut self, name: &str, memory_base: Global, table_base: Global) -> Result<Extern> {
        let bound = match name {
            "__memory_base" => Extern::Global(memory_base),
            "__table_base" => Extern::Global(table_base),
            "__indirect_function_table" => Extern::Table(self.function_table),
            "memory" => Extern::Memory(self.memory),
            "iswspace" => self.prologue_func(FunctionIx::IswSpace)?,
            "iswdigit" => self.prologue_func(FunctionIx::IswDigit)?,
            "iswalpha" => self.prologue_func(FunctionIx::IswAlpha)?,
            "iswalnum" => self.prologue_func(FunctionIx::IswAlnum)?,
            other => {
                if let Some(ext) = self.resolve_stdlib_import(other)? {
                    ext
                } else {
                    warn!(import = other, "unresolved import");
                    return Err(LoaderError::UnresolvedImport { name: other.to_string() });
                }
            }
        };
        Ok(bound)
    }

    fn prologue_func(&mut self, ix: FunctionIx) -> Result<Extern> {
        let func = self
            .function_table
            .get(&mut self.inner, ix as i32 as u32)
            .and_then(|r| match r {
                Ref::Func(f) => f,
                _ => None,
            })
            .ok_or_else(|| LoaderError::Engine(anyhow::anyhow!("prologue slot empty")))?;
        Ok(Extern::Func(func))
    }
}

/// Turns a language's guest-relative entry-point indices (table_base == 0,
/// as published in its `LanguageInWasmMemory` block) into the absolute
/// indices a `Store` dispatches through, by adding this load's `table_base`.
/// A guest-relative index of 0 ("not provided") stays 0.
///
/// `external_scanner_states` is taken from `entry_points`, not the
/// `Descriptor`, because it's an address in *this* Store's memory — the
/// `Descriptor`'s copy was only ever valid in whichever Store first
/// produced it, and is stale after re-binding into another one (§4.3
/// "Re-binding").
fn absolute_instance(language_id: u32, entry_points: &GuestEntryPoints, table_base: u32) -> LanguageInstance {
    let adjust = |relative: i32| if relative == 0 { 0 } else { relative + table_base as i32 };
    LanguageInstance {
        language_id,
        external_states_address: entry_points.external_scanner_states,
        lex_main_ix: adjust(entry_points.lex_fn),
        lex_keyword_ix: adjust(entry_points.keyword_lex_fn),
        scanner_create_ix: adjust(entry_points.scanner_create),
        scanner_destroy_ix: adjust(entry_points.scanner_destroy),
        scanner_scan_ix: adjust(entry_points.scanner_scan),
        scanner_serialize_ix: adjust(entry_points.scanner_serialize),
        scanner_deserialize_ix: adjust(entry_points.scanner_deserialize),
    }
}
