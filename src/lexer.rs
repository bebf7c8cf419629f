//! The host-side lexer contract and the fixed-address `LexerBridge`
//! structure used to shuttle lookahead/result state and callback slot
//! numbers between host and guest.
//!
//! The concrete lexer implementation (tokenizing a text buffer, tracking
//! included ranges, etc.) belongs to the parser core and is out of scope
//! here; this crate only needs the shape described by [`Lexer`].

use crate::language_types::TSSymbol;

/// Guest address at which the [`LexerBridge`] is written. Fixed for the
/// lifetime of a `Store`.
pub const LEXER_ADDRESS: u32 = 32;

mod bridge_offset {
    pub const LOOKAHEAD: usize = 0;
    pub const RESULT_SYMBOL: usize = 4;
    pub const ADVANCE: usize = 8;
    pub const MARK_END: usize = 12;
    pub const GET_COLUMN: usize = 16;
    pub const IS_AT_INCLUDED_RANGE_START: usize = 20;
    pub const EOF: usize = 24;
    /// `int32_t lookahead; TSSymbol result_symbol; int32_t advance; ...` is
    /// 28 bytes once the 2-byte `result_symbol` field's trailing padding
    /// (to keep `advance` 4-byte aligned) is accounted for.
    pub const SIZE: usize = 28;
}

/// First guest address past the `LexerBridge`, i.e. the first address a
/// loaded module's memory range may start at.
pub const LEXER_END_ADDRESS: u32 = LEXER_ADDRESS + bridge_offset::SIZE as u32;

/// The slot numbers of the five lexer callbacks in the store's indirect
/// function table prologue (see [`crate::store::FunctionIx`]).
#[derive(Debug, Clone, Copy)]
pub struct LexerCallbackSlots {
    pub advance: i32,
    pub mark_end: i32,
    pub get_column: i32,
    pub is_at_included_range_start: i32,
    pub eof: i32,
}

/// Writes the initial `LexerBridge` contents (lookahead/result zeroed,
/// callback slot numbers populated) into guest memory at [`LEXER_ADDRESS`].
pub fn write_initial_bridge(memory: &mut [u8], slots: LexerCallbackSlots) {
    let base = LEXER_ADDRESS as usize;
    write_i32(memory, base + bridge_offset::LOOKAHEAD, 0);
    write_u16(memory, base + bridge_offset::RESULT_SYMBOL, 0);
    write_i32(memory, base + bridge_offset::ADVANCE, slots.advance);
    write_i32(memory, base + bridge_offset::MARK_END, slots.mark_end);
    write_i32(memory, base + bridge_offset::GET_COLUMN, slots.get_column);
    write_i32(
        memory,
        base + bridge_offset::IS_AT_INCLUDED_RANGE_START,
        slots.is_at_included_range_start,
    );
    write_i32(memory, base + bridge_offset::EOF, slots.eof);
}

pub fn write_lookahead(memory: &mut [u8], lookahead: i32) {
    write_i32(memory, LEXER_ADDRESS as usize + bridge_offset::LOOKAHEAD, lookahead);
}

pub fn read_lookahead_and_result(memory: &[u8]) -> (i32, TSSymbol) {
    let base = LEXER_ADDRESS as usize;
    (
        read_i32(memory, base + bridge_offset::LOOKAHEAD),
        read_u16(memory, base + bridge_offset::RESULT_SYMBOL),
    )
}

fn write_i32(memory: &mut [u8], offset: usize, value: i32) {
    memory[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u16(memory: &mut [u8], offset: usize, value: u16) {
    memory[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_i32(memory: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(memory[offset..offset + 4].try_into().unwrap())
}

fn read_u16(memory: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(memory[offset..offset + 2].try_into().unwrap())
}

/// The host-side lexer state a [`crate::store::Store`] dispatches calls
/// against. An embedding parser implements this trait over its own lexer
/// type; the loader only needs this much of its shape to bridge guest
/// lex/scanner calls.
pub trait Lexer {
    fn lookahead(&self) -> i32;
    fn set_lookahead(&mut self, value: i32);
    fn result_symbol(&self) -> TSSymbol;
    fn set_result_symbol(&mut self, value: TSSymbol);

    /// Advances the lexer by one codepoint, optionally treating it as
    /// insignificant whitespace to skip rather than include in the token.
    fn advance(&mut self, skip: bool);

    /// Marks the end of the current token at the lexer's current position.
    fn mark_end(&mut self);

    /// Returns the current column (in codepoints since the last newline).
    fn get_column(&mut self) -> u32;

    /// Returns whether the lexer's current position is the start of an
    /// included range (relevant when parsing with non-contiguous ranges).
    fn is_at_included_range_start(&self) -> bool;

    /// Returns whether the lexer has reached the end of its input.
    fn eof(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_round_trips_lookahead_and_result() {
        let mut memory = vec![0u8; LEXER_END_ADDRESS as usize];
        write_initial_bridge(
            &mut memory,
            LexerCallbackSlots {
                advance: 1,
                mark_end: 2,
                get_column: 3,
                is_at_included_range_start: 4,
                eof: 5,
            },
        );
        write_lookahead(&mut memory, 0x61);
        let base = LEXER_ADDRESS as usize;
        write_u16(&mut memory, base + bridge_offset::RESULT_SYMBOL, 7);

        let (lookahead, result) = read_lookahead_and_result(&memory);
        assert_eq!(lookahead, 0x61);
        assert_eq!(result, 7);
    }

    #[test]
    fn end_address_is_above_start() {
        assert!(LEXER_END_ADDRESS > LEXER_ADDRESS);
    }
}
