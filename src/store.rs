//! The sandbox: an engine-scoped `wasmtime::Store`, a shared linear memory
//! and indirect function table, and the callback prologue every language
//! module imports against.

use anyhow::anyhow;
use tracing::{debug, trace};
use wasmtime::{Caller, Engine, Func, Memory, MemoryType, Ref, RefType, Table, TableType};

use crate::error::{LoaderError, Result};
use crate::lexer::{self, Lexer, LexerCallbackSlots, LEXER_END_ADDRESS};
use crate::module_registry::ModuleRegistry;

/// Slot numbers of the host callbacks the Store installs in its indirect
/// function table before any language module is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum FunctionIx {
    ProcExit = 0,
    LexerAdvance = 1,
    LexerMarkEnd = 2,
    LexerGetColumn = 3,
    LexerIsAtIncludedRangeStart = 4,
    LexerEof = 5,
    IswSpace = 6,
    IswDigit = 7,
    IswAlpha = 8,
    IswAlnum = 9,
}

/// Number of slots occupied by the callback prologue, before any language
/// module's own table entries.
pub const PROLOGUE_LEN: u32 = 10;

/// Configuration for a new [`Store`], mirroring the shape of the reference
/// host's config record: initial sizing plus growth limits, all overridable
/// by the embedding parser.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub initial_memory_pages: u32,
    pub max_memory_pages: Option<u32>,
    pub initial_table_capacity: u32,
    pub max_table_capacity: Option<u32>,
    pub wasm_threads: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_memory_pages: 16,
            max_memory_pages: Some(16384),
            initial_table_capacity: PROLOGUE_LEN + 64,
            max_table_capacity: None,
            wasm_threads: false,
        }
    }
}

/// An embedder's standard-library WASM blob, supplying `malloc`-family and
/// related symbols to language modules that import them. Treated as an
/// opaque external artifact this crate never builds or bundles; an embedder
/// that needs one implements this trait to hand over its bytes.
pub trait StdlibProvider: Send + Sync {
    fn wasm_bytes(&self) -> &[u8];
}

/// Data carried by the `wasmtime::Store<T>` itself, reachable from host
/// callbacks via `Caller::data_mut`. Only state that changes per `bind()`
/// call lives here — `Memory`/`Table` handles are `Copy` and are captured
/// directly by the callback closures instead.
pub(crate) struct StoreState {
    pub current_lexer: Option<*mut dyn Lexer>,
}

// SAFETY: `current_lexer` is only ever dereferenced from within a `bind`ed
// call on the same thread that set it; the Store itself is never accessed
// from two threads concurrently (see the concurrency model in SPEC_FULL.md).
unsafe impl Send for StoreState {}

/// A language module instantiated into a particular `Store`, with absolute
/// (prologue + table_base adjusted) indirect-table indices for its entry
/// points. Zero means "not provided" for the optional scanner entries.
#[derive(Debug, Clone, Copy)]
pub struct LanguageInstance {
    pub language_id: u32,
    pub external_states_address: i32,
    pub lex_main_ix: i32,
    pub lex_keyword_ix: i32,
    pub scanner_create_ix: i32,
    pub scanner_destroy_ix: i32,
    pub scanner_scan_ix: i32,
    pub scanner_serialize_ix: i32,
    pub scanner_deserialize_ix: i32,
}

/// The shared sandbox: one linear memory, one indirect function table, a
/// callback prologue, and the allocation cursors the Loader advances.
pub struct Store {
    pub(crate) engine: Engine,
    pub(crate) inner: wasmtime::Store<StoreState>,
    pub(crate) memory: Memory,
    pub(crate) function_table: Table,
    pub(crate) registry: ModuleRegistry,
    pub(crate) language_instances: Vec<LanguageInstance>,
    pub(crate) memory_cursor: u32,
    pub(crate) table_cursor: u32,
    pub(crate) current_instance_index: Option<usize>,
    pub(crate) stdlib: Option<Box<dyn StdlibProvider>>,
    pub(crate) stdlib_instance: Option<wasmtime::Instance>,
}

impl Store {
    /// Builds a fresh sandbox: allocates memory and table, writes the
    /// initial LexerBridge, and installs the callback prologue.
    pub fn new(engine: Engine, config: StoreConfig) -> Result<Self> {
        Self::with_stdlib(engine, config, None)
    }

    pub fn with_stdlib(
        engine: Engine,
        config: StoreConfig,
        stdlib: Option<Box<dyn StdlibProvider>>,
    ) -> Result<Self> {
        let mut inner = wasmtime::Store::new(&engine, StoreState { current_lexer: None });

        let memory_ty = MemoryType::new(config.initial_memory_pages, config.max_memory_pages);
        let memory = Memory::new(&mut inner, memory_ty)
            .map_err(|e| LoaderError::Engine(e.context("allocating store memory")))?;

        {
            let data = memory.data_mut(&mut inner);
            lexer::write_initial_bridge(
                data,
                LexerCallbackSlots {
                    advance: FunctionIx::LexerAdvance as i32,
                    mark_end: FunctionIx::LexerMarkEnd as i32,
                    get_column: FunctionIx::LexerGetColumn as i32,
                    is_at_included_range_start: FunctionIx::LexerIsAtIncludedRangeStart as i32,
                    eof: FunctionIx::LexerEof as i32,
                },
            );
        }

        let table_ty = TableType::new(
            RefType::FUNCREF,
            config.initial_table_capacity.max(PROLOGUE_LEN),
            config.max_table_capacity,
        );
        let function_table = Table::new(&mut inner, table_ty, Ref::Func(None))
            .map_err(|e| LoaderError::Engine(e.context("allocating indirect function table")))?;

        install_prologue(&mut inner, memory, function_table)?;

        debug!(
            memory_pages = config.initial_memory_pages,
            table_capacity = config.initial_table_capacity,
            "store initialised"
        );

        Ok(Self {
            engine,
            inner,
            memory,
            function_table,
            registry: ModuleRegistry::new(),
            language_instances: Vec::new(),
            memory_cursor: LEXER_END_ADDRESS,
            table_cursor: PROLOGUE_LEN,
            current_instance_index: None,
            stdlib,
            stdlib_instance: None,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn memory_cursor(&self) -> u32 {
        self.memory_cursor
    }

    pub fn table_cursor(&self) -> u32 {
        self.table_cursor
    }

    /// The `LanguageInstance` currently bound via [`crate::Store::bind`], if any.
    pub fn current_language_instance(&self) -> Option<&LanguageInstance> {
        self.current_instance_index.map(|ix| &self.language_instances[ix])
    }

    /// Grows memory, if needed, so that `[0, end_byte)` is addressable.
    pub(crate) fn ensure_memory_capacity(&mut self, end_byte: u32) -> Result<()> {
        const PAGE: u64 = 65536;
        let needed_pages = u64::from(end_byte).div_ceil(PAGE);
        let current_pages = self.memory.size(&self.inner);
        if needed_pages > current_pages {
            let delta = needed_pages - current_pages;
            self.memory
                .grow(&mut self.inner, delta)
                .map_err(|_| LoaderError::OutOfCursorSpace { resource: "memory" })?;
        }
        Ok(())
    }

    /// Grows the indirect function table, if needed, so that index
    /// `end_index - 1` is valid.
    pub(crate) fn ensure_table_capacity(&mut self, end_index: u32) -> Result<()> {
        let current_len = self.function_table.size(&self.inner);
        if end_index > current_len {
            let delta = end_index - current_len;
            self.function_table
                .grow(&mut self.inner, delta, Ref::Func(None))
                .map_err(|_| LoaderError::OutOfCursorSpace { resource: "table" })?;
        }
        Ok(())
    }

    /// Lazily instantiates the embedder-supplied standard-library module
    /// (once per engine) and returns its export, if any, matching `name`.
    pub(crate) fn resolve_stdlib_import(&mut self, name: &str) -> Result<Option<wasmtime::Extern>> {
        if self.stdlib_instance.is_none() {
            let Some(provider) = self.stdlib.as_ref() else {
                return Ok(None);
            };
            let bytes = provider.wasm_bytes().to_vec();
            let module = wasmtime::Module::new(&self.engine, &bytes)
                .map_err(|e| LoaderError::CompileError { message: e.to_string() })?;
            let proc_exit = self
                .function_table
                .get(&mut self.inner, FunctionIx::ProcExit as u32)
                .and_then(|r| match r {
                    Ref::Func(f) => f,
                    _ => None,
                })
                .ok_or_else(|| LoaderError::Engine(anyhow!("proc_exit slot empty")))?;
            let instance = wasmtime::Instance::new(&mut self.inner, &module, &[proc_exit.into()])
                .map_err(|e| LoaderError::InstantiationTrap { message: e.to_string() })?;
            trace!("standard-library module instantiated");
            self.stdlib_instance = Some(instance);
        }
        let instance = self.stdlib_instance.unwrap();
        Ok(instance.get_export(&mut self.inner, name))
    }
}

fn install_prologue(store: &mut wasmtime::Store<StoreState>, memory: Memory, table: Table) -> Result<()> {
    let proc_exit = Func::wrap(&mut *store, |_lexer_address: i32| -> anyhow::Result<()> {
        Err(anyhow!("guest called proc_exit"))
    });

    let advance = Func::wrap(
        &mut *store,
        move |mut caller: Caller<'_, StoreState>, _lexer_address: i32, skip: i32| {
            let lexer = unsafe { &mut *caller.data_mut().current_lexer.expect("lexer bound") };
            lexer.advance(skip != 0);
            let lookahead = lexer.lookahead();
            lexer::write_lookahead(memory.data_mut(&mut caller), lookahead);
        },
    );

    let mark_end = Func::wrap(&mut *store, move |mut caller: Caller<'_, StoreState>, _lexer_address: i32| {
        let lexer = unsafe { &mut *caller.data_mut().current_lexer.expect("lexer bound") };
        lexer.mark_end();
    });

    let get_column = Func::wrap(
        &mut *store,
        move |mut caller: Caller<'_, StoreState>, _lexer_address: i32| -> i32 {
            let lexer = unsafe { &mut *caller.data_mut().current_lexer.expect("lexer bound") };
            lexer.get_column() as i32
        },
    );

    let is_at_included_range_start = Func::wrap(
        &mut *store,
        move |caller: Caller<'_, StoreState>, _lexer_address: i32| -> i32 {
            let lexer = unsafe { &*caller.data().current_lexer.expect("lexer bound") };
            i32::from(lexer.is_at_included_range_start())
        },
    );

    let eof = Func::wrap(&mut *store, move |caller: Caller<'_, StoreState>, _lexer_address: i32| -> i32 {
        let lexer = unsafe { &*caller.data().current_lexer.expect("lexer bound") };
        i32::from(lexer.eof())
    });

    let iswspace = Func::wrap(&mut *store, |codepoint: i32| -> i32 {
        i32::from(char::from_u32(codepoint as u32).is_some_and(char::is_whitespace))
    });
    let iswdigit = Func::wrap(&mut *store, |codepoint: i32| -> i32 {
        i32::from(char::from_u32(codepoint as u32).is_some_and(|c| c.is_ascii_digit()))
    });
    let iswalpha = Func::wrap(&mut *store, |codepoint: i32| -> i32 {
        i32::from(char::from_u32(codepoint as u32).is_some_and(char::is_alphabetic))
    });
    let iswalnum = Func::wrap(&mut *store, |codepoint: i32| -> i32 {
        i32::from(char::from_u32(codepoint as u32).is_some_and(char::is_alphanumeric))
    });

    let slots: [(FunctionIx, Func); 10] = [
        (FunctionIx::ProcExit, proc_exit),
        (FunctionIx::LexerAdvance, advance),
        (FunctionIx::LexerMarkEnd, mark_end),
        (FunctionIx::LexerGetColumn, get_column),
        (FunctionIx::LexerIsAtIncludedRangeStart, is_at_included_range_start),
        (FunctionIx::LexerEof, eof),
        (FunctionIx::IswSpace, iswspace),
        (FunctionIx::IswDigit, iswdigit),
        (FunctionIx::IswAlpha, iswalpha),
        (FunctionIx::IswAlnum, iswalnum),
    ];

    for (ix, func) in slots {
        table
            .set(&mut *store, ix as i32 as u32, Ref::Func(Some(func)))
            .map_err(|e| LoaderError::Engine(e.context("installing callback prologue")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_starts_cursors_past_prologue() {
        let engine = Engine::default();
        let store = Store::new(engine, StoreConfig::default()).unwrap();
        assert_eq!(store.memory_cursor(), LEXER_END_ADDRESS);
        assert_eq!(store.table_cursor(), PROLOGUE_LEN);
    }
}
