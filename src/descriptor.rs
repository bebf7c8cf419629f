//! The native-shaped `LanguageDescriptor` a parser core consumes, and the
//! guest-memory reader that materialises one from a `LanguageInWasmMemory`
//! block.

use tracing::warn;

use crate::error::{LoaderError, Result};
use crate::language_types::{
    TSFieldMapEntry, TSFieldMapSlice, TSLexMode, TSParseActionEntry, TSStateId, TSSymbol,
    TSSymbolMetadata,
};
use crate::module_registry::ModuleHandle;

/// Historical fixed sizes the reference implementation used when it could
/// not derive `parse_actions`/`small_parse_table` lengths from the guest
/// block. Used only as a fallback for modules built against an older ABI
/// that does not publish the extended length fields.
const LEGACY_PARSE_ACTIONS_LEN: u32 = 5655;
const LEGACY_SMALL_PARSE_TABLE_SLACK: u32 = 64;

/// A language backed by code outside this crate (native builds, or any
/// other construction path a parser core supports). Never produced by this
/// loader; exists so `Descriptor` can express "not WASM-backed" without an
/// `Option`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDescriptor;

/// The parser-facing tables copied out of a loaded WASM language module.
#[derive(Debug, Clone)]
pub struct WasmDescriptor {
    pub version: u32,
    pub symbol_count: u32,
    pub alias_count: u32,
    pub token_count: u32,
    pub external_token_count: u32,
    pub state_count: u32,
    pub large_state_count: u32,
    pub production_id_count: u32,
    pub field_count: u32,
    pub max_alias_sequence_length: u16,
    pub keyword_capture_token: TSSymbol,

    pub parse_table: Vec<u16>,
    pub parse_actions: Vec<TSParseActionEntry>,
    pub symbol_names: Vec<Option<String>>,
    pub symbol_metadata: Vec<TSSymbolMetadata>,
    pub public_symbol_map: Vec<TSSymbol>,
    pub lex_modes: Vec<TSLexMode>,

    pub field_map_slices: Option<Vec<TSFieldMapSlice>>,
    pub field_map_entries: Option<Vec<TSFieldMapEntry>>,
    pub field_names: Option<Vec<Option<String>>>,

    pub alias_map: Option<Vec<u8>>,
    pub alias_sequences: Option<Vec<TSSymbol>>,

    pub small_parse_table_map: Option<Vec<u32>>,
    pub small_parse_table: Option<Vec<u16>>,

    pub external_scanner_symbol_map: Option<Vec<TSSymbol>>,
    pub external_scanner_states_address: Option<i32>,

    pub primary_state_ids: Option<Vec<TSStateId>>,

    pub module_handle: ModuleHandle,
}

/// The native shape a parser core consumes, whether backed by native code
/// or (here) a WASM module. Replaces the reference implementation's
/// sentinel-function-pointer trick with an explicit tagged enum.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Native(NativeDescriptor),
    Wasm(Box<WasmDescriptor>),
}

impl Descriptor {
    pub fn is_wasm_backed(&self) -> bool {
        matches!(self, Descriptor::Wasm(_))
    }

    pub fn as_wasm(&self) -> Result<&WasmDescriptor> {
        match self {
            Descriptor::Wasm(d) => Ok(d),
            Descriptor::Native(_) => Err(LoaderError::NotWasmBacked),
        }
    }
}

/// The raw, guest-layout view of a `LanguageInWasmMemory` block: every
/// field read at its fixed byte offset, before any copy-out into host
/// allocations.
struct RawBlock {
    version: u32,
    symbol_count: u32,
    alias_count: u32,
    token_count: u32,
    external_token_count: u32,
    state_count: u32,
    large_state_count: u32,
    production_id_count: u32,
    field_count: u32,
    max_alias_sequence_length: u16,

    parse_table: i32,
    small_parse_table: i32,
    small_parse_table_map: i32,
    parse_actions: i32,
    symbol_names: i32,
    field_names: i32,
    field_map_slices: i32,
    field_map_entries: i32,
    symbol_metadata: i32,
    public_symbol_map: i32,
    alias_map: i32,
    alias_sequences: i32,
    lex_modes: i32,
    lex_fn: i32,
    keyword_lex_fn: i32,

    keyword_capture_token: u16,

    external_scanner_states: i32,
    external_scanner_symbol_map: i32,
    external_scanner_create: i32,
    external_scanner_destroy: i32,
    external_scanner_scan: i32,
    external_scanner_serialize: i32,
    external_scanner_deserialize: i32,

    primary_state_ids: i32,

    /// Extended ABI fields; `None` when the guest block is too short to
    /// contain them (older modules). See SPEC_FULL.md §9.
    parse_actions_length: Option<u32>,
    small_parse_table_length: Option<u32>,
}

mod offset {
    pub const VERSION: usize = 0;
    pub const SYMBOL_COUNT: usize = 4;
    pub const ALIAS_COUNT: usize = 8;
    pub const TOKEN_COUNT: usize = 12;
    pub const EXTERNAL_TOKEN_COUNT: usize = 16;
    pub const STATE_COUNT: usize = 20;
    pub const LARGE_STATE_COUNT: usize = 24;
    pub const PRODUCTION_ID_COUNT: usize = 28;
    pub const FIELD_COUNT: usize = 32;
    pub const MAX_ALIAS_SEQUENCE_LENGTH: usize = 36;
    // 2 bytes of padding at 38..40 to 4-byte-align the address block.
    pub const PARSE_TABLE: usize = 40;
    pub const SMALL_PARSE_TABLE: usize = 44;
    pub const SMALL_PARSE_TABLE_MAP: usize = 48;
    pub const PARSE_ACTIONS: usize = 52;
    pub const SYMBOL_NAMES: usize = 56;
    pub const FIELD_NAMES: usize = 60;
    pub const FIELD_MAP_SLICES: usize = 64;
    pub const FIELD_MAP_ENTRIES: usize = 68;
    pub const SYMBOL_METADATA: usize = 72;
    pub const PUBLIC_SYMBOL_MAP: usize = 76;
    pub const ALIAS_MAP: usize = 80;
    pub const ALIAS_SEQUENCES: usize = 84;
    pub const LEX_MODES: usize = 88;
    pub const LEX_FN: usize = 92;
    pub const KEYWORD_LEX_FN: usize = 96;
    pub const KEYWORD_CAPTURE_TOKEN: usize = 100;
    // 2 bytes of padding at 102..104 to 4-byte-align the scanner block.
    pub const EXTERNAL_SCANNER_STATES: usize = 104;
    pub const EXTERNAL_SCANNER_SYMBOL_MAP: usize = 108;
    pub const EXTERNAL_SCANNER_CREATE: usize = 112;
    pub const EXTERNAL_SCANNER_DESTROY: usize = 116;
    pub const EXTERNAL_SCANNER_SCAN: usize = 120;
    pub const EXTERNAL_SCANNER_SERIALIZE: usize = 124;
    pub const EXTERNAL_SCANNER_DESERIALIZE: usize = 128;
    pub const PRIMARY_STATE_IDS: usize = 132;
    pub const SIZE: usize = 136;
    pub const PARSE_ACTIONS_LENGTH: usize = 136;
    pub const SMALL_PARSE_TABLE_LENGTH: usize = 140;
    pub const EXTENDED_SIZE: usize = 144;
}

fn read_u32(memory: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(memory[at..at + 4].try_into().unwrap())
}
fn read_u16(memory: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(memory[at..at + 2].try_into().unwrap())
}
fn read_i32(memory: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(memory[at..at + 4].try_into().unwrap())
}

fn read_raw_block(memory: &[u8], address: i32) -> Result<RawBlock> {
    let base = address as usize;
    if base + offset::SIZE > memory.len() {
        return Err(LoaderError::LanguageCallTrap {
            message: "language block address out of bounds".into(),
        });
    }
    let (parse_actions_length, small_parse_table_length) = if base + offset::EXTENDED_SIZE <= memory.len() {
        (
            Some(read_u32(memory, base + offset::PARSE_ACTIONS_LENGTH)),
            Some(read_u32(memory, base + offset::SMALL_PARSE_TABLE_LENGTH)),
        )
    } else {
        (None, None)
    };

    Ok(RawBlock {
        version: read_u32(memory, base + offset::VERSION),
        symbol_count: read_u32(memory, base + offset::SYMBOL_COUNT),
        alias_count: read_u32(memory, base + offset::ALIAS_COUNT),
        token_count: read_u32(memory, base + offset::TOKEN_COUNT),
        external_token_count: read_u32(memory, base + offset::EXTERNAL_TOKEN_COUNT),
        state_count: read_u32(memory, base + offset::STATE_COUNT),
        large_state_count: read_u32(memory, base + offset::LARGE_STATE_COUNT),
        production_id_count: read_u32(memory, base + offset::PRODUCTION_ID_COUNT),
        field_count: read_u32(memory, base + offset::FIELD_COUNT),
        max_alias_sequence_length: read_u16(memory, base + offset::MAX_ALIAS_SEQUENCE_LENGTH),

        parse_table: read_i32(memory, base + offset::PARSE_TABLE),
        small_parse_table: read_i32(memory, base + offset::SMALL_PARSE_TABLE),
        small_parse_table_map: read_i32(memory, base + offset::SMALL_PARSE_TABLE_MAP),
        parse_actions: read_i32(memory, base + offset::PARSE_ACTIONS),
        symbol_names: read_i32(memory, base + offset::SYMBOL_NAMES),
        field_names: read_i32(memory, base + offset::FIELD_NAMES),
        field_map_slices: read_i32(memory, base + offset::FIELD_MAP_SLICES),
        field_map_entries: read_i32(memory, base + offset::FIELD_MAP_ENTRIES),
        symbol_metadata: read_i32(memory, base + offset::SYMBOL_METADATA),
        public_symbol_map: read_i32(memory, base + offset::PUBLIC_SYMBOL_MAP),
        alias_map: read_i32(memory, base + offset::ALIAS_MAP),
        alias_sequences: read_i32(memory, base + offset::ALIAS_SEQUENCES),
        lex_modes: read_i32(memory, base + offset::LEX_MODES),
        lex_fn: read_i32(memory, base + offset::LEX_FN),
        keyword_lex_fn: read_i32(memory, base + offset::KEYWORD_LEX_FN),

        keyword_capture_token: read_u16(memory, base + offset::KEYWORD_CAPTURE_TOKEN),

        external_scanner_states: read_i32(memory, base + offset::EXTERNAL_SCANNER_STATES),
        external_scanner_symbol_map: read_i32(memory, base + offset::EXTERNAL_SCANNER_SYMBOL_MAP),
        external_scanner_create: read_i32(memory, base + offset::EXTERNAL_SCANNER_CREATE),
        external_scanner_destroy: read_i32(memory, base + offset::EXTERNAL_SCANNER_DESTROY),
        external_scanner_scan: read_i32(memory, base + offset::EXTERNAL_SCANNER_SCAN),
        external_scanner_serialize: read_i32(memory, base + offset::EXTERNAL_SCANNER_SERIALIZE),
        external_scanner_deserialize: read_i32(memory, base + offset::EXTERNAL_SCANNER_DESERIALIZE),

        primary_state_ids: read_i32(memory, base + offset::PRIMARY_STATE_IDS),

        parse_actions_length,
        small_parse_table_length,
    })
}

/// Reads a null-terminated guest string array of `count` pointers starting
/// at `array_address`. A zero pointer becomes `None` at that index.
fn copy_strings(memory: &[u8], array_address: i32, count: u32) -> Vec<Option<String>> {
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let ptr_addr = array_address as usize + (i as usize) * 4;
        let str_addr = read_i32(memory, ptr_addr);
        if str_addr == 0 {
            out.push(None);
            continue;
        }
        let start = str_addr as usize;
        let end = memory[start..].iter().position(|&b| b == 0).map_or(memory.len(), |n| start + n);
        out.push(Some(String::from_utf8_lossy(&memory[start..end]).into_owned()));
    }
    out
}

fn copy_u16_array(memory: &[u8], address: i32, count: u32) -> Vec<u16> {
    (0..count).map(|i| read_u16(memory, address as usize + (i as usize) * 2)).collect()
}

fn copy_symbol_metadata(memory: &[u8], address: i32, count: u32) -> Vec<TSSymbolMetadata> {
    (0..count)
        .map(|i| {
            let at = address as usize + (i as usize) * 3;
            TSSymbolMetadata {
                visible: memory[at] != 0,
                named: memory[at + 1] != 0,
                supertype: memory[at + 2] != 0,
            }
        })
        .collect()
}

fn copy_lex_modes(memory: &[u8], address: i32, count: u32) -> Vec<TSLexMode> {
    (0..count)
        .map(|i| {
            let at = address as usize + (i as usize) * 4;
            TSLexMode {
                lex_state: read_u16(memory, at),
                external_lex_state: read_u16(memory, at + 2),
            }
        })
        .collect()
}

fn copy_field_map_slices(memory: &[u8], address: i32, count: u32) -> Vec<TSFieldMapSlice> {
    (0..count)
        .map(|i| {
            let at = address as usize + (i as usize) * 4;
            TSFieldMapSlice {
                index: read_u16(memory, at),
                length: read_u16(memory, at + 2),
            }
        })
        .collect()
}

fn copy_field_map_entries(memory: &[u8], address: i32, count: u32) -> Vec<TSFieldMapEntry> {
    (0..count)
        .map(|i| {
            let at = address as usize + (i as usize) * 4;
            TSFieldMapEntry {
                field_id: read_u16(memory, at),
                child_index: memory[at + 2],
                inherited: memory[at + 3] != 0,
            }
        })
        .collect()
}

/// Scans the alias-map byte span (`{symbol, count, count × symbols}*`
/// terminated by a zero symbol) and copies it verbatim.
fn copy_alias_map(memory: &[u8], address: i32) -> Vec<u8> {
    let start = address as usize;
    let mut pos = start;
    loop {
        let symbol = read_u16(memory, pos);
        if symbol == 0 {
            pos += 2;
            break;
        }
        let count = read_u16(memory, pos + 2) as usize;
        pos += 4 + count * 2;
    }
    memory[start..pos].to_vec()
}

/// The guest-relative (table_base == 0) indirect-table indices of a
/// language's entry points, read straight out of its `LanguageInWasmMemory`
/// block. A zero value means "not provided" per the guest ABI. The Loader
/// adds `table_base` to turn these into the absolute indices a `Store`
/// dispatches through.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GuestEntryPoints {
    pub lex_fn: i32,
    pub keyword_lex_fn: i32,
    pub scanner_create: i32,
    pub scanner_destroy: i32,
    pub scanner_scan: i32,
    pub scanner_serialize: i32,
    pub scanner_deserialize: i32,
    /// Address of the external scanner's state block, in the memory space
    /// this block was just read from. Must be re-read per `Store` — it is
    /// not a guest-relative index and stays meaningless if carried over
    /// from another `Store`'s memory.
    pub external_scanner_states: i32,
}

/// Reads just the guest-relative entry-point indices out of a language
/// block, without copying any of its tables. Used when re-binding an
/// already-materialised descriptor into a new `Store` (§4.3 "Re-binding"),
/// where the full copy-out would be redundant work.
pub(crate) fn read_entry_points(memory: &[u8], language_address: i32) -> Result<GuestEntryPoints> {
    let block = read_raw_block(memory, language_address)?;
    Ok(GuestEntryPoints {
        lex_fn: block.lex_fn,
        keyword_lex_fn: block.keyword_lex_fn,
        scanner_create: block.external_scanner_create,
        scanner_destroy: block.external_scanner_destroy,
        scanner_scan: block.external_scanner_scan,
        scanner_serialize: block.external_scanner_serialize,
        scanner_deserialize: block.external_scanner_deserialize,
        external_scanner_states: block.external_scanner_states,
    })
}

/// Materialises a [`Descriptor::Wasm`] by copying every table out of guest
/// memory into host-owned allocations, plus the guest-relative entry-point
/// indices the Loader needs to finish assembling a `LanguageInstance`.
pub(crate) fn build_descriptor(
    memory: &[u8],
    language_address: i32,
    module_handle: ModuleHandle,
) -> Result<(WasmDescriptor, GuestEntryPoints)> {
    let block = read_raw_block(memory, language_address)?;

    let parse_table_len = block.large_state_count * block.symbol_count;
    let parse_table = copy_u16_array(memory, block.parse_table, parse_table_len);

    let parse_actions_len = block.parse_actions_length.unwrap_or_else(|| {
        warn!("guest module does not publish parse_actions_length; falling back to legacy constant");
        LEGACY_PARSE_ACTIONS_LEN
    });
    let parse_actions: Vec<TSParseActionEntry> = (0..parse_actions_len)
        .map(|i| {
            let at = block.parse_actions as usize + (i as usize) * 4;
            TSParseActionEntry {
                bytes: memory[at..at + 4].try_into().unwrap(),
            }
        })
        .collect();

    let symbol_names_count = block.symbol_count + block.alias_count;
    let symbol_names = copy_strings(memory, block.symbol_names, symbol_names_count);

    let symbol_metadata = copy_symbol_metadata(memory, block.symbol_metadata, block.symbol_count);
    let public_symbol_map = copy_u16_array(memory, block.public_symbol_map, block.symbol_count);
    let lex_modes = copy_lex_modes(memory, block.lex_modes, block.state_count);

    let (field_map_slices, field_map_entries, field_names) =
        if block.field_count > 0 && block.production_id_count > 0 {
            let slices = copy_field_map_slices(memory, block.field_map_slices, block.production_id_count);
            let entries_len = slices.last().map(|s| u32::from(s.index) + u32::from(s.length)).unwrap_or(0);
            let entries = copy_field_map_entries(memory, block.field_map_entries, entries_len);
            let names = copy_strings(memory, block.field_names, block.field_count + 1);
            (Some(slices), Some(entries), Some(names))
        } else {
            (None, None, None)
        };

    let (alias_map, alias_sequences) = if block.alias_count > 0 && block.production_id_count > 0 {
        let map = copy_alias_map(memory, block.alias_map);
        let seq_len = block.production_id_count * u32::from(block.max_alias_sequence_length);
        let sequences = copy_u16_array(memory, block.alias_sequences, seq_len);
        (Some(map), Some(sequences))
    } else {
        (None, None)
    };

    let (small_parse_table_map, small_parse_table) = if block.state_count > block.large_state_count {
        let map_len = block.state_count - block.large_state_count;
        let map: Vec<u32> = (0..map_len)
            .map(|i| read_u32(memory, block.small_parse_table_map as usize + (i as usize) * 4))
            .collect();
        let table_len = block.small_parse_table_length.unwrap_or_else(|| {
            warn!("guest module does not publish small_parse_table_length; falling back to legacy slack");
            map.last().copied().unwrap_or(0) + LEGACY_SMALL_PARSE_TABLE_SLACK
        });
        let table = copy_u16_array(memory, block.small_parse_table, table_len);
        (Some(map), Some(table))
    } else {
        (None, None)
    };

    let (external_scanner_symbol_map, external_scanner_states_address) = if block.external_token_count > 0 {
        (
            Some(copy_u16_array(memory, block.external_scanner_symbol_map, block.external_token_count)),
            Some(block.external_scanner_states),
        )
    } else {
        (None, None)
    };

    let primary_state_ids = if block.production_id_count > 0 {
        Some(copy_u16_array(memory, block.primary_state_ids, block.production_id_count))
    } else {
        None
    };

    let entry_points = GuestEntryPoints {
        lex_fn: block.lex_fn,
        keyword_lex_fn: block.keyword_lex_fn,
        scanner_create: block.external_scanner_create,
        scanner_destroy: block.external_scanner_destroy,
        scanner_scan: block.external_scanner_scan,
        scanner_serialize: block.external_scanner_serialize,
        scanner_deserialize: block.external_scanner_deserialize,
        external_scanner_states: block.external_scanner_states,
    };

    let descriptor = WasmDescriptor {
        version: block.version,
        symbol_count: block.symbol_count,
        alias_count: block.alias_count,
        token_count: block.token_count,
        external_token_count: block.external_token_count,
        state_count: block.state_count,
        large_state_count: block.large_state_count,
        production_id_count: block.production_id_count,
        field_count: block.field_count,
        max_alias_sequence_length: block.max_alias_sequence_length,
        keyword_capture_token: block.keyword_capture_token,
        parse_table,
        parse_actions,
        symbol_names,
        symbol_metadata,
        public_symbol_map,
        lex_modes,
        field_map_slices,
        field_map_entries,
        field_names,
        alias_map,
        alias_sequences,
        small_parse_table_map,
        small_parse_table,
        external_scanner_symbol_map,
        external_scanner_states_address,
        primary_state_ids,
        module_handle,
    };

    Ok((descriptor, entry_points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Engine, Module};

    fn dummy_module_handle() -> ModuleHandle {
        let engine = Engine::default();
        let module = Module::new(&engine, "(module)").unwrap();
        let dylink = crate::dylink::DylinkInfo {
            memory_size: 0,
            memory_align: 1,
            table_size: 0,
            table_align: 1,
        };
        let mut registry = crate::module_registry::ModuleRegistry::new();
        registry.register("dummy".into(), module, Vec::new(), dylink)
    }

    #[test]
    fn copies_null_and_present_strings() {
        let mut memory = vec![0u8; 256];
        // array of 2 pointers at address 64: [0, 80]
        memory[64..68].copy_from_slice(&0i32.to_le_bytes());
        memory[68..72].copy_from_slice(&80i32.to_le_bytes());
        memory[80..83].copy_from_slice(b"abc");
        memory[83] = 0;

        let names = copy_strings(&memory, 64, 2);
        assert_eq!(names[0], None);
        assert_eq!(names[1].as_deref(), Some("abc"));
    }

    #[test]
    fn alias_map_scan_stops_at_zero_symbol() {
        let mut memory = vec![0u8; 64];
        // symbol=5, count=1, symbols=[9], then terminator symbol=0
        memory[0..2].copy_from_slice(&5u16.to_le_bytes());
        memory[2..4].copy_from_slice(&1u16.to_le_bytes());
        memory[4..6].copy_from_slice(&9u16.to_le_bytes());
        memory[6..8].copy_from_slice(&0u16.to_le_bytes());

        let scanned = copy_alias_map(&memory, 0);
        assert_eq!(scanned.len(), 8);
    }

    #[test]
    fn build_descriptor_round_trips_minimal_language() {
        let mut memory = vec![0u8; 512];
        let addr = 128usize;
        memory[addr + offset::VERSION..addr + offset::VERSION + 4].copy_from_slice(&14u32.to_le_bytes());
        memory[addr + offset::SYMBOL_COUNT..addr + offset::SYMBOL_COUNT + 4].copy_from_slice(&0u32.to_le_bytes());
        memory[addr + offset::STATE_COUNT..addr + offset::STATE_COUNT + 4].copy_from_slice(&0u32.to_le_bytes());
        memory[addr + offset::LARGE_STATE_COUNT..addr + offset::LARGE_STATE_COUNT + 4]
            .copy_from_slice(&0u32.to_le_bytes());
        memory[addr + offset::PARSE_ACTIONS_LENGTH..addr + offset::PARSE_ACTIONS_LENGTH + 4]
            .copy_from_slice(&0u32.to_le_bytes());
        memory[addr + offset::SMALL_PARSE_TABLE_LENGTH..addr + offset::SMALL_PARSE_TABLE_LENGTH + 4]
            .copy_from_slice(&0u32.to_le_bytes());

        let (descriptor, _) = build_descriptor(&memory, addr as i32, dummy_module_handle()).unwrap();
        assert_eq!(descriptor.version, 14);
        assert!(descriptor.parse_table.is_empty());
        assert!(descriptor.field_map_slices.is_none());
    }

    #[test]
    fn read_entry_points_tracks_external_scanner_states_per_memory() {
        // Two "stores" with the same language block laid out at different
        // addresses, and different external_scanner_states values — as if
        // the same module had been re-instantiated at a different base.
        let build = |addr: usize, external_scanner_states: i32| {
            let mut memory = vec![0u8; 512];
            memory[addr + offset::VERSION..addr + offset::VERSION + 4].copy_from_slice(&14u32.to_le_bytes());
            memory[addr + offset::EXTERNAL_TOKEN_COUNT..addr + offset::EXTERNAL_TOKEN_COUNT + 4]
                .copy_from_slice(&1u32.to_le_bytes());
            memory[addr + offset::EXTERNAL_SCANNER_STATES..addr + offset::EXTERNAL_SCANNER_STATES + 4]
                .copy_from_slice(&external_scanner_states.to_le_bytes());
            memory
        };

        let first = build(64, 100);
        let second = build(200, 999);

        let first_points = read_entry_points(&first, 64).unwrap();
        let second_points = read_entry_points(&second, 200).unwrap();

        assert_eq!(first_points.external_scanner_states, 100);
        assert_eq!(second_points.external_scanner_states, 999);
    }
}
