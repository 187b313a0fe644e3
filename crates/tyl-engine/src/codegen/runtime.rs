//! Runtime error paths and OS helpers emitted into generated code.
//!
//! On a refinement-check failure, a list index out of bounds, a division
//! by zero, or a contract violation, the generated binary fetches the
//! console handle, writes a pre-registered message via `WriteConsoleA`
//! (five-argument Windows stack layout) and calls `ExitProcess(1)`.

use super::abi::SHADOW_SPACE;
use super::x64::Reg;
use super::{CodeGen, CodegenError};

impl CodeGen {
    /// Get (or create) the error stub for `message` and return its label.
    /// Jumping there never returns.
    pub(crate) fn error_stub(&mut self, message: &str) -> String {
        if let Some((label, _)) = self
            .error_stubs
            .iter()
            .find(|(_, existing)| existing == message)
        {
            return label.clone();
        }
        let label = self.fresh_label("err");
        self.error_stubs.push((label.clone(), message.to_string()));
        label
    }

    /// Emit the error stubs accumulated while generating a function.
    pub(crate) fn emit_error_stubs(&mut self) -> Result<(), CodegenError> {
        let stubs = std::mem::take(&mut self.error_stubs);
        for (label, message) in stubs {
            self.buf.bind_label(&label)?;
            self.emit_asm(&format!("{}: ; \"{}\"", label, message));
            self.emit_write_console_and_exit(&message);
        }
        Ok(())
    }

    /// `GetStdHandle(STD_OUTPUT_HANDLE)`; `WriteConsoleA(h, msg, len,
    /// &written, 0)`; `ExitProcess(1)`.
    pub(crate) fn emit_write_console_and_exit(&mut self, message: &str) {
        let msg_label = self.add_string_constant(message);
        let get_std = self.imports.kernel32("GetStdHandle");
        let write_console = self.imports.kernel32("WriteConsoleA");
        let exit = self.imports.kernel32("ExitProcess");

        // GetStdHandle(-11)
        self.buf.mov_reg_imm32(Reg::Rcx, -11);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.call_import(&get_std);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);

        // WriteConsoleA(handle, msg, len, &written, 0): the written-count
        // slot and the reserved fifth argument sit just above the shadow
        // space
        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
        self.buf.lea_reg_data(Reg::Rdx, msg_label);
        self.buf.mov_reg_imm32(Reg::R8, message.len() as i32);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE + 16);
        self.buf.lea_reg_rsp(Reg::R9, SHADOW_SPACE + 8);
        self.buf.mov_rsp_disp_imm32(SHADOW_SPACE, 0);
        self.buf.call_import(&write_console);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE + 16);

        // ExitProcess(1)
        self.buf.mov_reg_imm32(Reg::Rcx, 1);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.call_import(&exit);
    }

    /// `HeapAlloc(GetProcessHeap(), HEAP_ZERO_MEMORY, size-in-RCX)` with
    /// the size taken from RAX; result pointer in RAX.
    pub(crate) fn emit_heap_alloc_rax_size(&mut self) {
        let get_heap = self.imports.kernel32("GetProcessHeap");
        let heap_alloc = self.imports.kernel32("HeapAlloc");

        // Preserve the requested size across GetProcessHeap
        self.buf.mov_reg_reg(Reg::R10, Reg::Rax);
        self.buf.push_reg(Reg::R10);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE + 8);
        self.buf.call_import(&get_heap);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE + 8);
        self.buf.pop_reg(Reg::R10);

        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
        // HEAP_ZERO_MEMORY = 0x8
        self.buf.mov_reg_imm32(Reg::Rdx, 0x8);
        self.buf.mov_reg_reg(Reg::R8, Reg::R10);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.call_import(&heap_alloc);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.emit_asm("  ; HeapAlloc(GetProcessHeap(), HEAP_ZERO_MEMORY, rax)");
    }

    /// `HeapFree(GetProcessHeap(), 0, ptr-in-RAX)`.
    pub(crate) fn emit_heap_free_rax(&mut self) {
        let get_heap = self.imports.kernel32("GetProcessHeap");
        let heap_free = self.imports.kernel32("HeapFree");

        self.buf.mov_reg_reg(Reg::R10, Reg::Rax);
        self.buf.push_reg(Reg::R10);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE + 8);
        self.buf.call_import(&get_heap);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE + 8);
        self.buf.pop_reg(Reg::R10);

        self.buf.mov_reg_reg(Reg::Rcx, Reg::Rax);
        self.buf.mov_reg_imm32(Reg::Rdx, 0);
        self.buf.mov_reg_reg(Reg::R8, Reg::R10);
        self.buf.sub_reg_imm32(Reg::Rsp, SHADOW_SPACE);
        self.buf.call_import(&heap_free);
        self.buf.add_reg_imm32(Reg::Rsp, SHADOW_SPACE);
    }

    /// Emit the `spawn` thunks collected during function emission. Each
    /// thunk has the `CreateThread` start-routine signature: it evaluates
    /// its expression and returns 0.
    pub(crate) fn emit_pending_thunks(&mut self) -> Result<(), CodegenError> {
        let thunks = std::mem::take(&mut self.pending_thunks);
        for (label, expression) in thunks {
            self.buf.bind_label(&label)?;
            self.emit_asm(&format!("{}: ; spawn thunk", label));
            self.buf.push_reg(Reg::Rbp);
            self.buf.mov_reg_reg(Reg::Rbp, Reg::Rsp);
            self.buf.sub_reg_imm32(Reg::Rsp, 288);
            self.emit_expr(&expression)?;
            self.buf.mov_reg_imm32(Reg::Rax, 0);
            self.buf.mov_reg_reg(Reg::Rsp, Reg::Rbp);
            self.buf.pop_reg(Reg::Rbp);
            self.buf.ret();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::OptLevel;

    #[test]
    fn error_stub_is_shared_per_message() {
        let mut cg = CodeGen::new("t.tyl", OptLevel::O0);
        let a = cg.error_stub("Division by zero");
        let b = cg.error_stub("Division by zero");
        let c = cg.error_stub("Index out of bounds");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn write_console_sequence_imports() {
        let mut cg = CodeGen::new("t.tyl", OptLevel::O0);
        cg.emit_write_console_and_exit("Refinement type constraint failed for type 'Positive'");
        assert!(cg.imports.contains("kernel32", "GetStdHandle"));
        assert!(cg.imports.contains("kernel32", "WriteConsoleA"));
        assert!(cg.imports.contains("kernel32", "ExitProcess"));
        // The message text landed in .rdata
        let rdata = String::from_utf8_lossy(&cg.rdata);
        assert!(rdata.contains("Refinement type constraint failed for type 'Positive'"));
    }
}
