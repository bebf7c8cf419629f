//! Native-shaped record types used by a language's static parse tables.
//!
//! These mirror the parser core's public types closely enough for the
//! loader to size and copy guest tables correctly; the parser core itself
//! (the state machine and tree builder that consume these tables) is an
//! external collaborator out of scope for this crate.

pub type TSSymbol = u16;
pub type TSStateId = u16;
pub type TSFieldId = u16;

/// A single entry of the small (sparse) parse table, or the dense
/// `parse_table` when indexed by `large_state × symbol`.
pub type TSParseTableEntry = u16;

/// One row of `symbol_metadata`: whether a symbol is visible/named, and
/// whether it participates in supertype resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TSSymbolMetadata {
    pub visible: bool,
    pub named: bool,
    pub supertype: bool,
}

/// One row of `lex_modes`: which lex state and external-lex state a parser
/// state should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TSLexMode {
    pub lex_state: u16,
    pub external_lex_state: u16,
}

/// A slice into `field_map_entries` naming the field map for one production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TSFieldMapSlice {
    pub index: u16,
    pub length: u16,
}

/// One entry of a production's field map: which child index a named field
/// occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TSFieldMapEntry {
    pub field_id: TSFieldId,
    pub child_index: u8,
    pub inherited: bool,
}

/// One entry of the packed `parse_actions` array. The parser core
/// interprets the byte layout; this loader only needs its size to copy the
/// correct number of entries out of guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TSParseActionEntry {
    pub bytes: [u8; 4],
}
