//! x86-64 instruction encoders.
//!
//! Each helper appends the encoded bytes of one instruction to the
//! [`CodeBuffer`]. Addressing sticks to the forms the generator actually
//! uses: register-register, register-immediate, `[rbp+disp32]` locals,
//! `[reg+disp32]` heap fields, and RIP-relative data/import references.

use super::buffer::{CodeBuffer, RelocKind};

/// General-purpose registers with their hardware encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    pub fn low3(self) -> u8 {
        self as u8 & 0b111
    }

    pub fn is_extended(self) -> bool {
        self as u8 >= 8
    }
}

/// SSE registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
}

impl Xmm {
    pub fn low3(self) -> u8 {
        self as u8 & 0b111
    }
}

/// Condition codes for `jcc`/`setcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned below (used for bounds checks).
    Below,
}

impl Cond {
    /// Low nibble of the 0x0F 0x8x / 0x9x opcode.
    fn code(self) -> u8 {
        match self {
            Cond::Eq => 0x4,
            Cond::Ne => 0x5,
            Cond::Lt => 0xC,
            Cond::Ge => 0xD,
            Cond::Le => 0xE,
            Cond::Gt => 0xF,
            Cond::Below => 0x2,
        }
    }

    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Below => Cond::Below,
        }
    }
}

fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | (w as u8) << 3 | (r as u8) << 2 | (x as u8) << 1 | (b as u8)
}

fn modrm(mode: u8, reg: u8, rm: u8) -> u8 {
    (mode << 6) | (reg << 3) | rm
}

impl CodeBuffer {
    // ------------------------------------------------------------------
    // Stack and moves
    // ------------------------------------------------------------------

    pub fn push_reg(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.emit_u8(rex(false, false, false, true));
        }
        self.emit_u8(0x50 + reg.low3());
    }

    pub fn pop_reg(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.emit_u8(rex(false, false, false, true));
        }
        self.emit_u8(0x58 + reg.low3());
    }

    /// `mov dst, src`
    pub fn mov_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_u8(rex(true, src.is_extended(), false, dst.is_extended()));
        self.emit_u8(0x89);
        self.emit_u8(modrm(0b11, src.low3(), dst.low3()));
    }

    /// `mov reg, imm64`
    pub fn mov_reg_imm64(&mut self, reg: Reg, value: i64) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xB8 + reg.low3());
        self.emit_u64(value as u64);
    }

    /// `mov reg, imm32` (sign-extended)
    pub fn mov_reg_imm32(&mut self, reg: Reg, value: i32) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xC7);
        self.emit_u8(modrm(0b11, 0, reg.low3()));
        self.emit_i32(value);
    }

    /// `mov reg, [rbp+disp]`
    pub fn mov_reg_local(&mut self, reg: Reg, disp: i32) {
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit_u8(0x8B);
        self.emit_u8(modrm(0b10, reg.low3(), Reg::Rbp.low3()));
        self.emit_i32(disp);
    }

    /// `mov [rbp+disp], reg`
    pub fn mov_local_reg(&mut self, disp: i32, reg: Reg) {
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit_u8(0x89);
        self.emit_u8(modrm(0b10, reg.low3(), Reg::Rbp.low3()));
        self.emit_i32(disp);
    }

    /// `mov reg, [base+disp]` (base must not be rsp)
    pub fn mov_reg_mem(&mut self, reg: Reg, base: Reg, disp: i32) {
        debug_assert!(base != Reg::Rsp);
        self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
        self.emit_u8(0x8B);
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    /// `mov [base+disp], reg`
    pub fn mov_mem_reg(&mut self, base: Reg, disp: i32, reg: Reg) {
        debug_assert!(base != Reg::Rsp);
        self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
        self.emit_u8(0x89);
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    /// `mov [base+disp], reg` with 8/16/32-bit operand sizes.
    pub fn mov_mem_reg_sized(&mut self, base: Reg, disp: i32, reg: Reg, size: u32) {
        match size {
            1 => {
                self.emit_u8(rex(false, reg.is_extended(), false, base.is_extended()));
                self.emit_u8(0x88);
            }
            2 => {
                self.emit_u8(0x66);
                if reg.is_extended() || base.is_extended() {
                    self.emit_u8(rex(false, reg.is_extended(), false, base.is_extended()));
                }
                self.emit_u8(0x89);
            }
            4 => {
                if reg.is_extended() || base.is_extended() {
                    self.emit_u8(rex(false, reg.is_extended(), false, base.is_extended()));
                }
                self.emit_u8(0x89);
            }
            _ => {
                self.mov_mem_reg(base, disp, reg);
                return;
            }
        }
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    /// `movzx reg, byte/word [base+disp]` or plain dword/qword load.
    pub fn load_zero_extended(&mut self, reg: Reg, base: Reg, disp: i32, size: u32) {
        match size {
            1 => {
                self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
                self.emit(&[0x0F, 0xB6]);
            }
            2 => {
                self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
                self.emit(&[0x0F, 0xB7]);
            }
            4 => {
                // 32-bit mov zero-extends
                if reg.is_extended() || base.is_extended() {
                    self.emit_u8(rex(false, reg.is_extended(), false, base.is_extended()));
                }
                self.emit_u8(0x8B);
            }
            _ => {
                self.mov_reg_mem(reg, base, disp);
                return;
            }
        }
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    /// `lea reg, [rip+label]` against a code-section label (function
    /// addresses for thunks and function pointers).
    pub fn lea_reg_label(&mut self, reg: Reg, label: impl Into<String>) {
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit_u8(0x8D);
        self.emit_u8(modrm(0b00, reg.low3(), 0b101));
        self.emit_label_rel32(label);
    }

    /// `lea reg, [rip+symbol]` against the data section.
    pub fn lea_reg_data(&mut self, reg: Reg, symbol: impl Into<String>) {
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit_u8(0x8D);
        self.emit_u8(modrm(0b00, reg.low3(), 0b101));
        self.emit_reloc_rel32(RelocKind::RipData, symbol, 0);
    }

    /// `lea reg, [rsp+disp]`
    pub fn lea_reg_rsp(&mut self, reg: Reg, disp: i32) {
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit_u8(0x8D);
        self.emit_u8(modrm(0b10, reg.low3(), 0b100));
        self.emit_u8(0x24); // SIB: base rsp
        self.emit_i32(disp);
    }

    /// `mov qword [rsp+disp], imm32` (sign-extended)
    pub fn mov_rsp_disp_imm32(&mut self, disp: i32, value: i32) {
        self.emit_u8(rex(true, false, false, false));
        self.emit_u8(0xC7);
        self.emit_u8(modrm(0b10, 0, 0b100));
        self.emit_u8(0x24);
        self.emit_i32(disp);
        self.emit_i32(value);
    }

    /// `mov [rsp+disp], reg`
    pub fn mov_rsp_disp_reg(&mut self, disp: i32, reg: Reg) {
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit_u8(0x89);
        self.emit_u8(modrm(0b10, reg.low3(), 0b100));
        self.emit_u8(0x24);
        self.emit_i32(disp);
    }

    /// `lea reg, [rbp+disp]`
    pub fn lea_reg_local(&mut self, reg: Reg, disp: i32) {
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit_u8(0x8D);
        self.emit_u8(modrm(0b10, reg.low3(), Reg::Rbp.low3()));
        self.emit_i32(disp);
    }

    // ------------------------------------------------------------------
    // Arithmetic
    // ------------------------------------------------------------------

    fn alu_reg_reg(&mut self, opcode: u8, dst: Reg, src: Reg) {
        self.emit_u8(rex(true, src.is_extended(), false, dst.is_extended()));
        self.emit_u8(opcode);
        self.emit_u8(modrm(0b11, src.low3(), dst.low3()));
    }

    pub fn add_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.alu_reg_reg(0x01, dst, src);
    }

    pub fn sub_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.alu_reg_reg(0x29, dst, src);
    }

    pub fn and_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.alu_reg_reg(0x21, dst, src);
    }

    pub fn or_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.alu_reg_reg(0x09, dst, src);
    }

    pub fn xor_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.alu_reg_reg(0x31, dst, src);
    }

    pub fn cmp_reg_reg(&mut self, left: Reg, right: Reg) {
        self.alu_reg_reg(0x39, left, right);
    }

    /// `cmp reg, [base+disp]`
    pub fn cmp_reg_mem(&mut self, reg: Reg, base: Reg, disp: i32) {
        debug_assert!(base != Reg::Rsp);
        self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
        self.emit_u8(0x3B);
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    pub fn test_reg_reg(&mut self, left: Reg, right: Reg) {
        self.alu_reg_reg(0x85, left, right);
    }

    /// `imul dst, src`
    pub fn imul_reg_reg(&mut self, dst: Reg, src: Reg) {
        self.emit_u8(rex(true, dst.is_extended(), false, src.is_extended()));
        self.emit(&[0x0F, 0xAF]);
        self.emit_u8(modrm(0b11, dst.low3(), src.low3()));
    }

    pub fn add_reg_imm32(&mut self, reg: Reg, value: i32) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0x81);
        self.emit_u8(modrm(0b11, 0, reg.low3()));
        self.emit_i32(value);
    }

    pub fn sub_reg_imm32(&mut self, reg: Reg, value: i32) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0x81);
        self.emit_u8(modrm(0b11, 5, reg.low3()));
        self.emit_i32(value);
    }

    pub fn cmp_reg_imm32(&mut self, reg: Reg, value: i32) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0x81);
        self.emit_u8(modrm(0b11, 7, reg.low3()));
        self.emit_i32(value);
    }

    /// Sign-extend rax into rdx:rax (before `idiv`).
    pub fn cqo(&mut self) {
        self.emit(&[0x48, 0x99]);
    }

    /// `idiv reg` (rdx:rax / reg → quotient rax, remainder rdx)
    pub fn idiv_reg(&mut self, reg: Reg) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xF7);
        self.emit_u8(modrm(0b11, 7, reg.low3()));
    }

    pub fn neg_reg(&mut self, reg: Reg) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xF7);
        self.emit_u8(modrm(0b11, 3, reg.low3()));
    }

    pub fn not_reg(&mut self, reg: Reg) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xF7);
        self.emit_u8(modrm(0b11, 2, reg.low3()));
    }

    /// `shl reg, imm8`
    pub fn shl_reg_imm8(&mut self, reg: Reg, amount: u8) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xC1);
        self.emit_u8(modrm(0b11, 4, reg.low3()));
        self.emit_u8(amount);
    }

    /// `sar reg, imm8` (arithmetic right shift)
    pub fn sar_reg_imm8(&mut self, reg: Reg, amount: u8) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xC1);
        self.emit_u8(modrm(0b11, 7, reg.low3()));
        self.emit_u8(amount);
    }

    /// `shl reg, cl`
    pub fn shl_reg_cl(&mut self, reg: Reg) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xD3);
        self.emit_u8(modrm(0b11, 4, reg.low3()));
    }

    /// `sar reg, cl`
    pub fn sar_reg_cl(&mut self, reg: Reg) {
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit_u8(0xD3);
        self.emit_u8(modrm(0b11, 7, reg.low3()));
    }

    /// `setcc al; movzx rax, al`
    pub fn set_cond_rax(&mut self, cond: Cond) {
        self.emit(&[0x0F, 0x90 + cond.code()]);
        self.emit_u8(modrm(0b11, 0, 0)); // al
        self.emit(&[0x48, 0x0F, 0xB6, 0xC0]); // movzx rax, al
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    /// `jmp label`
    pub fn jmp_label(&mut self, label: impl Into<String>) {
        self.emit_u8(0xE9);
        self.emit_label_rel32(label);
    }

    /// `jcc label`
    pub fn jcc_label(&mut self, cond: Cond, label: impl Into<String>) {
        self.emit(&[0x0F, 0x80 + cond.code()]);
        self.emit_label_rel32(label);
    }

    /// `call label` (intra-section)
    pub fn call_label(&mut self, label: impl Into<String>) {
        self.emit_u8(0xE8);
        self.emit_label_rel32(label);
    }

    /// `call [rip+import]` through the import address table.
    pub fn call_import(&mut self, symbol: impl Into<String>) {
        self.emit(&[0xFF, 0x15]);
        self.emit_reloc_rel32(RelocKind::RipImport, symbol, 0);
    }

    pub fn ret(&mut self) {
        self.emit_u8(0xC3);
    }

    // ------------------------------------------------------------------
    // SSE2 floating point
    // ------------------------------------------------------------------

    /// `movsd dst, src` (register form)
    pub fn movsd_xmm_xmm(&mut self, dst: Xmm, src: Xmm) {
        self.emit(&[0xF2, 0x0F, 0x10]);
        self.emit_u8(modrm(0b11, dst.low3(), src.low3()));
    }

    /// `movsd xmm, [rbp+disp]`
    pub fn movsd_xmm_local(&mut self, xmm: Xmm, disp: i32) {
        self.emit(&[0xF2, 0x0F, 0x10]);
        self.emit_u8(modrm(0b10, xmm.low3(), Reg::Rbp.low3()));
        self.emit_i32(disp);
    }

    /// `movsd [rbp+disp], xmm`
    pub fn movsd_local_xmm(&mut self, disp: i32, xmm: Xmm) {
        self.emit(&[0xF2, 0x0F, 0x11]);
        self.emit_u8(modrm(0b10, xmm.low3(), Reg::Rbp.low3()));
        self.emit_i32(disp);
    }

    /// `movsd xmm, [rip+symbol]` (float constant pool)
    pub fn movsd_xmm_data(&mut self, xmm: Xmm, symbol: impl Into<String>) {
        self.emit(&[0xF2, 0x0F, 0x10]);
        self.emit_u8(modrm(0b00, xmm.low3(), 0b101));
        self.emit_reloc_rel32(RelocKind::RipData, symbol, 0);
    }

    fn sse_arith(&mut self, opcode: u8, dst: Xmm, src: Xmm) {
        self.emit(&[0xF2, 0x0F, opcode]);
        self.emit_u8(modrm(0b11, dst.low3(), src.low3()));
    }

    pub fn addsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_arith(0x58, dst, src);
    }

    pub fn subsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_arith(0x5C, dst, src);
    }

    pub fn mulsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_arith(0x59, dst, src);
    }

    pub fn divsd(&mut self, dst: Xmm, src: Xmm) {
        self.sse_arith(0x5E, dst, src);
    }

    /// `ucomisd xmm, xmm`
    pub fn ucomisd(&mut self, left: Xmm, right: Xmm) {
        self.emit(&[0x66, 0x0F, 0x2E]);
        self.emit_u8(modrm(0b11, left.low3(), right.low3()));
    }

    /// `cvtsi2sd xmm, reg`
    pub fn cvtsi2sd(&mut self, xmm: Xmm, reg: Reg) {
        self.emit_u8(0xF2);
        self.emit_u8(rex(true, false, false, reg.is_extended()));
        self.emit(&[0x0F, 0x2A]);
        self.emit_u8(modrm(0b11, xmm.low3(), reg.low3()));
    }

    /// `cvttsd2si reg, xmm`
    pub fn cvttsd2si(&mut self, reg: Reg, xmm: Xmm) {
        self.emit_u8(0xF2);
        self.emit_u8(rex(true, reg.is_extended(), false, false));
        self.emit(&[0x0F, 0x2C]);
        self.emit_u8(modrm(0b11, reg.low3(), xmm.low3()));
    }

    // ------------------------------------------------------------------
    // Atomics (lock-prefixed, fully ordered)
    // ------------------------------------------------------------------

    /// `lock xadd [base+disp], reg` — returns the previous value in reg.
    pub fn lock_xadd_mem_reg(&mut self, base: Reg, disp: i32, reg: Reg) {
        self.emit_u8(0xF0);
        self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
        self.emit(&[0x0F, 0xC1]);
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    /// `lock add [base+disp], reg`
    pub fn lock_add_mem_reg(&mut self, base: Reg, disp: i32, reg: Reg) {
        self.emit_u8(0xF0);
        self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
        self.emit_u8(0x01);
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    /// `lock sub [base+disp], reg`
    pub fn lock_sub_mem_reg(&mut self, base: Reg, disp: i32, reg: Reg) {
        self.emit_u8(0xF0);
        self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
        self.emit_u8(0x29);
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }

    /// `xchg [base+disp], reg` (implicitly locked)
    pub fn xchg_mem_reg(&mut self, base: Reg, disp: i32, reg: Reg) {
        self.emit_u8(rex(true, reg.is_extended(), false, base.is_extended()));
        self.emit_u8(0x87);
        self.emit_u8(modrm(0b10, reg.low3(), base.low3()));
        self.emit_i32(disp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
        let mut buf = CodeBuffer::new();
        f(&mut buf);
        buf.bytes
    }

    #[test]
    fn prologue_encodings() {
        assert_eq!(bytes_of(|b| b.push_reg(Reg::Rbp)), vec![0x55]);
        assert_eq!(
            bytes_of(|b| b.mov_reg_reg(Reg::Rbp, Reg::Rsp)),
            vec![0x48, 0x89, 0xE5]
        );
        assert_eq!(
            bytes_of(|b| b.sub_reg_imm32(Reg::Rsp, 32)),
            vec![0x48, 0x81, 0xEC, 0x20, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn mov_imm_encodings() {
        assert_eq!(
            bytes_of(|b| b.mov_reg_imm32(Reg::Rax, 42)),
            vec![0x48, 0xC7, 0xC0, 0x2A, 0x00, 0x00, 0x00]
        );
        let imm64 = bytes_of(|b| b.mov_reg_imm64(Reg::Rax, 0x1122334455667788));
        assert_eq!(imm64[0], 0x48);
        assert_eq!(imm64[1], 0xB8);
        assert_eq!(&imm64[2..], &0x1122334455667788u64.to_le_bytes());
    }

    #[test]
    fn extended_register_rex() {
        assert_eq!(
            bytes_of(|b| b.mov_reg_reg(Reg::R12, Reg::Rax)),
            vec![0x49, 0x89, 0xC4]
        );
        assert_eq!(
            bytes_of(|b| b.mov_reg_reg(Reg::Rax, Reg::R12)),
            vec![0x4C, 0x89, 0xE0]
        );
        assert_eq!(bytes_of(|b| b.push_reg(Reg::R12)), vec![0x41, 0x54]);
    }

    #[test]
    fn local_load_store() {
        assert_eq!(
            bytes_of(|b| b.mov_reg_local(Reg::Rax, -8)),
            vec![0x48, 0x8B, 0x85, 0xF8, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            bytes_of(|b| b.mov_local_reg(-16, Reg::Rcx)),
            vec![0x48, 0x89, 0x8D, 0xF0, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn arithmetic_encodings() {
        assert_eq!(
            bytes_of(|b| b.add_reg_reg(Reg::Rax, Reg::Rcx)),
            vec![0x48, 0x01, 0xC8]
        );
        assert_eq!(
            bytes_of(|b| b.imul_reg_reg(Reg::Rax, Reg::Rcx)),
            vec![0x48, 0x0F, 0xAF, 0xC1]
        );
        assert_eq!(bytes_of(|b| b.cqo()), vec![0x48, 0x99]);
        assert_eq!(
            bytes_of(|b| b.idiv_reg(Reg::Rcx)),
            vec![0x48, 0xF7, 0xF9]
        );
        assert_eq!(
            bytes_of(|b| b.shl_reg_imm8(Reg::Rax, 3)),
            vec![0x48, 0xC1, 0xE0, 0x03]
        );
    }

    #[test]
    fn lock_prefixed_atomics() {
        let xadd = bytes_of(|b| b.lock_xadd_mem_reg(Reg::Rax, 0, Reg::Rcx));
        assert_eq!(&xadd[..4], &[0xF0, 0x48, 0x0F, 0xC1]);
        let add = bytes_of(|b| b.lock_add_mem_reg(Reg::Rax, 8, Reg::Rcx));
        assert_eq!(&add[..3], &[0xF0, 0x48, 0x01]);
    }

    #[test]
    fn call_import_records_reloc() {
        let mut buf = CodeBuffer::new();
        buf.call_import("kernel32!ExitProcess");
        assert_eq!(&buf.bytes[..2], &[0xFF, 0x15]);
        assert_eq!(buf.relocs.len(), 1);
        assert_eq!(buf.relocs[0].kind, RelocKind::RipImport);
    }

    #[test]
    fn sse_encodings() {
        assert_eq!(
            bytes_of(|b| b.addsd(Xmm::Xmm0, Xmm::Xmm1)),
            vec![0xF2, 0x0F, 0x58, 0xC1]
        );
        assert_eq!(
            bytes_of(|b| b.cvtsi2sd(Xmm::Xmm0, Reg::Rax)),
            vec![0xF2, 0x48, 0x0F, 0x2A, 0xC0]
        );
        assert_eq!(
            bytes_of(|b| b.cvttsd2si(Reg::Rax, Xmm::Xmm0)),
            vec![0xF2, 0x48, 0x0F, 0x2C, 0xC0]
        );
    }

    #[test]
    fn setcc_sequences() {
        let bytes = bytes_of(|b| b.set_cond_rax(Cond::Lt));
        assert_eq!(&bytes[..3], &[0x0F, 0x9C, 0xC0]);
        assert_eq!(&bytes[3..], &[0x48, 0x0F, 0xB6, 0xC0]);
    }
}
