//! Binds a host lexer to a loaded language and dispatches lex/scanner calls
//! through the store's shared indirect function table.

use tracing::debug;
use wasmtime::Ref;

use crate::descriptor::Descriptor;
use crate::error::{LoaderError, Result};
use crate::lexer::{self, Lexer, LEXER_ADDRESS};
use crate::store::Store;

impl Store {
    /// Binds `lexer` against `descriptor`, re-instantiating the language
    /// into this Store if it was only ever loaded into another one.
    ///
    /// # Safety contract
    ///
    /// The caller must not let `lexer` be dropped or moved before calling
    /// [`Store::unbind`] (or binding a different lexer); every dispatch call
    /// below only dereferences the pointer while a bind set by this function
    /// is still current.
    pub fn bind(&mut self, lexer: &mut dyn Lexer, descriptor: &Descriptor) -> Result<()> {
        let wasm = descriptor.as_wasm()?;
        let language_id = wasm.module_handle.language_id();

        if !self.language_instances.iter().any(|li| li.language_id == language_id) {
            self.reinstantiate_language(wasm)?;
        }
        let index = self
            .language_instances
            .iter()
            .position(|li| li.language_id == language_id)
            .expect("instance present after reinstantiate");

        // SAFETY: erases `lexer`'s borrow to `'static` so it fits in
        // `StoreState`, which carries no lifetime parameter. Upheld by the
        // safety contract documented above.
        let erased: *mut dyn Lexer = unsafe { std::mem::transmute(lexer as *mut dyn Lexer) };

        self.current_instance_index = Some(index);
        self.inner.data_mut().current_lexer = Some(erased);
        debug!(language_id, "lexer bound");
        Ok(())
    }

    /// Clears the current binding. Safe to call even if nothing is bound.
    pub fn unbind(&mut self) {
        self.current_instance_index = None;
        self.inner.data_mut().current_lexer = None;
    }

    fn current_index(&self) -> Result<usize> {
        self.current_instance_index.ok_or(LoaderError::NotWasmBacked)
    }

    fn write_lexer_in(&mut self, lexer: &dyn Lexer) {
        let data = self.memory.data_mut(&mut self.inner);
        lexer::write_lookahead(data, lexer.lookahead());
    }

    fn read_lexer_out(&mut self, lexer: &mut dyn Lexer) {
        let data = self.memory.data(&self.inner);
        let (lookahead, result) = lexer::read_lookahead_and_result(data);
        lexer.set_lookahead(lookahead);
        lexer.set_result_symbol(result);
    }

    fn call_indirect_bool(&mut self, table_index: i32, args: &[i32]) -> Result<bool> {
        let func = self
            .function_table
            .get(&mut self.inner, table_index as u32)
            .and_then(|r| match r {
                Ref::Func(f) => f,
                _ => None,
            })
            .ok_or_else(|| LoaderError::LanguageCallTrap {
                message: format!("no function at table index {table_index}"),
            })?;
        let wasm_args: Vec<wasmtime::Val> = args.iter().map(|&a| wasmtime::Val::I32(a)).collect();
        let mut results = [wasmtime::Val::I32(0)];
        func.call(&mut self.inner, &wasm_args, &mut results)
            .map_err(|e| LoaderError::LanguageCallTrap { message: e.to_string() })?;
        Ok(results[0].unwrap_i32() != 0)
    }

    fn call_indirect_i32(&mut self, table_index: i32, args: &[i32]) -> Result<i32> {
        let func = self
            .function_table
            .get(&mut self.inner, table_index as u32)
            .and_then(|r| match r {
                Ref::Func(f) => f,
                _ => None,
            })
            .ok_or_else(|| LoaderError::LanguageCallTrap {
                message: format!("no function at table index {table_index}"),
            })?;
        let wasm_args: Vec<wasmtime::Val> = args.iter().map(|&a| wasmtime::Val::I32(a)).collect();
        let mut results = [wasmtime::Val::I32(0)];
        func.call(&mut self.inner, &wasm_args, &mut results)
            .map_err(|e| LoaderError::LanguageCallTrap { message: e.to_string() })?;
        Ok(results[0].unwrap_i32())
    }

    /// Runs the guest's main lex function for parser state `state`,
    /// marshaling lookahead/result through the LexerBridge.
    pub fn call_lex_main(&mut self, state: u16) -> Result<bool> {
        self.call_lex(state, false)
    }

    /// Runs the guest's keyword-disambiguation lex function.
    pub fn call_lex_keyword(&mut self, state: u16) -> Result<bool> {
        self.call_lex(state, true)
    }

    fn call_lex(&mut self, state: u16, keyword: bool) -> Result<bool> {
        let index = self.current_index()?;
        let table_index = if keyword {
            self.language_instances[index].lex_keyword_ix
        } else {
            self.language_instances[index].lex_main_ix
        };

        let current_lexer = self.inner.data().current_lexer.expect("bound before dispatch");
        let lexer = unsafe { &mut *current_lexer };
        self.write_lexer_in(lexer);
        let result = self.call_indirect_bool(table_index, &[LEXER_ADDRESS as i32, i32::from(state)])?;
        let lexer = unsafe { &mut *current_lexer };
        self.read_lexer_out(lexer);
        Ok(result)
    }

    /// Creates a new external-scanner instance, returning its opaque handle
    /// (an address in guest memory the language manages itself).
    pub fn call_scanner_create(&mut self) -> Result<u32> {
        let index = self.current_index()?;
        let table_index = self.language_instances[index].scanner_create_ix;
        if table_index == 0 {
            return Ok(0);
        }
        Ok(self.call_indirect_i32(table_index, &[])? as u32)
    }

    pub fn call_scanner_destroy(&mut self, scanner: u32) -> Result<()> {
        let index = self.current_index()?;
        let table_index = self.language_instances[index].scanner_destroy_ix;
        if table_index == 0 {
            return Ok(());
        }
        self.call_indirect_i32(table_index, &[scanner as i32])?;
        Ok(())
    }

    /// Runs the external scanner's `scan`, marshaling the LexerBridge the
    /// same way `call_lex` does.
    pub fn call_scanner_scan(&mut self, scanner: u32, valid_tokens_ix: u32) -> Result<bool> {
        let index = self.current_index()?;
        let instance = self.language_instances[index];
        if instance.scanner_scan_ix == 0 {
            return Ok(false);
        }
        let valid_tokens_address = instance.external_states_address + valid_tokens_ix as i32;

        let current_lexer = self.inner.data().current_lexer.expect("bound before dispatch");
        let lexer = unsafe { &mut *current_lexer };
        self.write_lexer_in(lexer);
        let result = self.call_indirect_bool(
            instance.scanner_scan_ix,
            &[scanner as i32, LEXER_ADDRESS as i32, valid_tokens_address],
        )?;
        let lexer = unsafe { &mut *current_lexer };
        self.read_lexer_out(lexer);
        Ok(result)
    }

    /// Forwards to the guest's `serialize` when the language provides one;
    /// otherwise a no-op returning 0, mirroring the reference's honestly
    /// unimplemented status rather than inventing semantics.
    pub fn call_scanner_serialize(&mut self, scanner: u32, out_buffer_address: i32) -> Result<u32> {
        let index = self.current_index()?;
        let table_index = self.language_instances[index].scanner_serialize_ix;
        if table_index == 0 {
            return Ok(0);
        }
        Ok(self.call_indirect_i32(table_index, &[scanner as i32, out_buffer_address])? as u32)
    }

    pub fn call_scanner_deserialize(&mut self, scanner: u32, in_buffer_address: i32, len: u32) -> Result<()> {
        let index = self.current_index()?;
        let table_index = self.language_instances[index].scanner_deserialize_ix;
        if table_index == 0 {
            return Ok(());
        }
        self.call_indirect_i32(table_index, &[scanner as i32, in_buffer_address, len as i32])?;
        Ok(())
    }
}
