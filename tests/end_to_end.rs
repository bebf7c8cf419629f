//! Exercises the full load -> bind -> dispatch path against a real,
//! compiled WASM module rather than unit-testing each stage in isolation.
//!
//! The fixture is a small `.wat` module compiled via `wat::parse_str` (no
//! prebuilt `.wasm` binaries are checked in); since `wat`/`wast` has no
//! convenient surface for writing a `dylink.0` section's binary payload
//! inline, the section is assembled by hand with the same ULEB128 encoding
//! `dylink.rs` decodes, then spliced in right after the module's 8-byte
//! header before the module is handed to `Store::load_language`.

use wasm_language_loader::language_types::TSSymbol;
use wasm_language_loader::{Descriptor, Lexer, Store, StoreConfig};
use wasmtime::Engine;

fn uleb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// A 144-byte `LanguageInWasmMemory`-shaped block with `version` and
/// `lex_fn` (table index 1, relative to this module's `__table_base`) set;
/// every other field left at zero, matching how `descriptor.rs`'s own
/// `build_descriptor_round_trips_minimal_language` test shapes a block.
fn language_block(lex_fn: u32) -> Vec<u8> {
    let mut block = vec![0u8; 144];
    block[0..4].copy_from_slice(&14u32.to_le_bytes()); // version
    block[92..96].copy_from_slice(&lex_fn.to_le_bytes()); // lex_fn
    block
}

fn wat_byte_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{:02x}", b)).collect()
}

/// Compiles `wat_source` and splices a `dylink.0` custom section (declaring
/// `memory_size`/`table_size` just large enough for this fixture) in right
/// after the header, producing bytes `dylink::parse_dylink_info` and
/// `Store::load_language` both accept.
fn compile_with_dylink(wat_source: &str, memory_size: u32, table_size: u32) -> Vec<u8> {
    let wasm = wat::parse_str(wat_source).expect("fixture .wat should compile");

    let mut mem_info = Vec::new();
    uleb128(memory_size as u64, &mut mem_info);
    uleb128(1, &mut mem_info); // memory_align
    uleb128(table_size as u64, &mut mem_info);
    uleb128(1, &mut mem_info); // table_align

    let mut custom_payload = Vec::new();
    uleb128(8, &mut custom_payload);
    custom_payload.extend_from_slice(b"dylink.0");
    custom_payload.push(0x01); // WASM_DYLINK_MEM_INFO
    uleb128(mem_info.len() as u64, &mut custom_payload);
    custom_payload.extend_from_slice(&mem_info);

    let mut section = Vec::new();
    section.push(0x00); // custom section id
    uleb128(custom_payload.len() as u64, &mut section);
    section.extend_from_slice(&custom_payload);

    let mut out = Vec::new();
    out.extend_from_slice(&wasm[0..8]); // magic + version
    out.extend_from_slice(&section);
    out.extend_from_slice(&wasm[8..]);
    out
}

/// Exports `tree_sitter_<name>` returning the address of a language block
/// whose `lex_fn` points (table-relative) at a function returning
/// `i32.const 1` for every call, letting a test drive `call_lex_main` for
/// real instead of only asserting on copied-out table contents.
fn grammar_wat(name: &str, block_bytes_escaped: &str) -> String {
    format!(
        r#"(module
            (import "env" "memory" (memory 1))
            (import "env" "__memory_base" (global $memory_base i32))
            (import "env" "__table_base" (global $table_base i32))
            (import "env" "__indirect_function_table" (table 2 funcref))

            (func $unused (result i32) i32.const 0)
            (func $lex_main (param $lexer_address i32) (param $state i32) (result i32)
                i32.const 1)

            (func (export "tree_sitter_{name}") (result i32)
                global.get $memory_base)

            (elem (global.get $table_base) funcref (ref.func $unused) (ref.func $lex_main))
            (data (global.get $memory_base) "{block_bytes_escaped}")
        )"#
    )
}

/// A 144-byte block declaring one external token, whose `external_scanner_states`
/// field (offset 104) is left zero in the data segment and instead written by
/// a `start` function as `memory_base + 12345` — mimicking how a real
/// relocatable module's memory-address relocations resolve against whichever
/// base this particular instantiation was assigned, rather than being a
/// constant baked in at compile time.
fn external_scanner_block() -> Vec<u8> {
    let mut block = vec![0u8; 144];
    block[0..4].copy_from_slice(&14u32.to_le_bytes()); // version
    block[16..20].copy_from_slice(&1u32.to_le_bytes()); // external_token_count
    block[92..96].copy_from_slice(&1u32.to_le_bytes()); // lex_fn
    block
}

fn external_scanner_grammar_wat(name: &str, block_bytes_escaped: &str) -> String {
    format!(
        r#"(module
            (import "env" "memory" (memory 1))
            (import "env" "__memory_base" (global $memory_base i32))
            (import "env" "__table_base" (global $table_base i32))
            (import "env" "__indirect_function_table" (table 2 funcref))

            (func $unused (result i32) i32.const 0)
            (func $lex_main (param $lexer_address i32) (param $state i32) (result i32)
                i32.const 1)

            (func (export "tree_sitter_{name}") (result i32)
                global.get $memory_base)

            (elem (global.get $table_base) funcref (ref.func $unused) (ref.func $lex_main))
            (data (global.get $memory_base) "{block_bytes_escaped}")

            (func $init
                (i32.store
                    (i32.add (global.get $memory_base) (i32.const 104))
                    (i32.add (global.get $memory_base) (i32.const 12345))))
            (start $init)
        )"#
    )
}

/// A module with no external scanner, loaded purely to burn memory/table
/// cursor space ahead of another load, so that load lands at a different
/// (non-coincidentally-equal) base than it would in a fresh `Store`.
fn filler_wat() -> String {
    r#"(module
        (import "env" "memory" (memory 1))
        (import "env" "__memory_base" (global $memory_base i32))
        (import "env" "__table_base" (global $table_base i32))
        (import "env" "__indirect_function_table" (table 1 funcref))

        (func (export "tree_sitter_filler") (result i32)
            global.get $memory_base)
    )"#
    .to_string()
}

struct TestLexer {
    lookahead: i32,
    result_symbol: TSSymbol,
}

impl Lexer for TestLexer {
    fn lookahead(&self) -> i32 {
        self.lookahead
    }
    fn set_lookahead(&mut self, value: i32) {
        self.lookahead = value;
    }
    fn result_symbol(&self) -> TSSymbol {
        self.result_symbol
    }
    fn set_result_symbol(&mut self, value: TSSymbol) {
        self.result_symbol = value;
    }
    fn advance(&mut self, _skip: bool) {}
    fn mark_end(&mut self) {}
    fn get_column(&mut self) -> u32 {
        0
    }
    fn is_at_included_range_start(&self) -> bool {
        false
    }
    fn eof(&self) -> bool {
        false
    }
}

#[test]
fn loads_binds_and_dispatches_lex_main() {
    let wasm = compile_with_dylink(&grammar_wat("fixture", &wat_byte_string(&language_block(1))), 144, 2);

    let engine = Engine::default();
    let mut store = Store::new(engine, StoreConfig::default()).unwrap();

    let descriptor = store.load_language("fixture", &wasm).unwrap();
    let wasm_descriptor = match &descriptor {
        Descriptor::Wasm(w) => w,
        Descriptor::Native(_) => panic!("expected a WASM-backed descriptor"),
    };
    assert_eq!(wasm_descriptor.version, 14);

    let mut lexer = TestLexer {
        lookahead: 0,
        result_symbol: 0,
    };
    store.bind(&mut lexer, &descriptor).unwrap();
    let advanced = store.call_lex_main(0).unwrap();
    assert!(advanced, "fixture's lex_main always returns true");
    store.unbind();
}

#[test]
fn two_sequential_loads_advance_memory_and_table_cursors() {
    let block = wat_byte_string(&language_block(1));
    let first = compile_with_dylink(&grammar_wat("alpha", &block), 144, 2);
    let second = compile_with_dylink(&grammar_wat("beta", &block), 144, 2);

    let engine = Engine::default();
    let mut store = Store::new(engine, StoreConfig::default()).unwrap();

    let before_memory = store.memory_cursor();
    let before_table = store.table_cursor();
    store.load_language("alpha", &first).unwrap();
    let after_first_memory = store.memory_cursor();
    let after_first_table = store.table_cursor();
    store.load_language("beta", &second).unwrap();
    let after_second_memory = store.memory_cursor();
    let after_second_table = store.table_cursor();

    assert!(after_first_memory > before_memory);
    assert!(after_first_table > before_table);
    assert!(after_second_memory > after_first_memory);
    assert!(after_second_table > after_first_table);
}

#[test]
fn rebinding_into_a_second_store_preserves_language_id() {
    let wasm = compile_with_dylink(&grammar_wat("shared", &wat_byte_string(&language_block(1))), 144, 2);

    let engine = Engine::default();
    let mut store_a = Store::new(engine.clone(), StoreConfig::default()).unwrap();
    let descriptor = store_a.load_language("shared", &wasm).unwrap();
    let language_id = match &descriptor {
        Descriptor::Wasm(w) => w.module_handle.language_id(),
        Descriptor::Native(_) => panic!("expected a WASM-backed descriptor"),
    };

    let mut store_b = Store::new(engine, StoreConfig::default()).unwrap();
    let mut lexer = TestLexer {
        lookahead: 0,
        result_symbol: 0,
    };
    store_b.bind(&mut lexer, &descriptor).unwrap();
    assert_eq!(
        store_b.current_language_instance().unwrap().language_id,
        language_id
    );
    assert!(store_b.call_lex_main(0).unwrap());
}

/// Regression test for re-binding a language with an external scanner: the
/// second `Store`'s `LanguageInstance.external_states_address` must be
/// re-derived from *its own* memory, not carried over from whichever Store
/// first built the `Descriptor`. Gives `store_b` a different memory base
/// than `store_a` (by loading a filler module into it first) so a stale
/// address would be observably wrong rather than coincidentally correct.
#[test]
fn rebinding_recomputes_external_scanner_state_address_for_the_new_store() {
    let scanner_wasm = compile_with_dylink(
        &external_scanner_grammar_wat("ext_scanner", &wat_byte_string(&external_scanner_block())),
        256,
        2,
    );
    let filler_wasm = compile_with_dylink(&filler_wat(), 64, 1);

    let engine = Engine::default();

    let mut store_a = Store::new(engine.clone(), StoreConfig::default()).unwrap();
    let descriptor = store_a.load_language("ext_scanner", &scanner_wasm).unwrap();
    let mut lexer_a = TestLexer {
        lookahead: 0,
        result_symbol: 0,
    };
    store_a.bind(&mut lexer_a, &descriptor).unwrap();
    let address_in_store_a = store_a
        .current_language_instance()
        .unwrap()
        .external_states_address;

    let mut store_b = Store::new(engine, StoreConfig::default()).unwrap();
    store_b.load_language("filler", &filler_wasm).unwrap();

    let mut lexer = TestLexer {
        lookahead: 0,
        result_symbol: 0,
    };
    store_b.bind(&mut lexer, &descriptor).unwrap();
    let address_in_store_b = store_b
        .current_language_instance()
        .unwrap()
        .external_states_address;

    assert_ne!(
        address_in_store_a, address_in_store_b,
        "external scanner state address must be re-derived per Store, not reused from the first"
    );
    assert_eq!(address_in_store_b, address_in_store_a + 64);
}
