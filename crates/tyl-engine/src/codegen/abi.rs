//! Microsoft x64 calling convention constants.
//!
//! RCX, RDX, R8, R9 carry the first four integer arguments; XMM0..XMM3
//! the first four floats. 32 bytes of shadow space are reserved before
//! every call and the stack is 16-byte aligned at call boundaries.
//! Return values come back in RAX / XMM0.

use super::x64::{Reg, Xmm};

/// Integer argument registers, in order.
pub const INT_ARG_REGS: [Reg; 4] = [Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9];

/// Float argument registers, in order.
pub const FLOAT_ARG_REGS: [Xmm; 4] = [Xmm::Xmm0, Xmm::Xmm1, Xmm::Xmm2, Xmm::Xmm3];

/// Shadow space the caller reserves for the callee's register spills.
pub const SHADOW_SPACE: i32 = 32;

/// Callee-saved registers under the Microsoft convention.
pub const CALLEE_SAVED: [Reg; 8] = [
    Reg::Rbx,
    Reg::Rbp,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

/// Registers the allocator hands to register-resident integer locals, in
/// hint order.
pub const REGISTER_HINTS: [Reg; 5] = [Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

/// Round a frame size up to the 16-byte alignment the ABI requires.
pub fn align_frame(size: i32) -> i32 {
    (size + 15) & !15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_alignment() {
        assert_eq!(align_frame(0), 0);
        assert_eq!(align_frame(8), 16);
        assert_eq!(align_frame(16), 16);
        assert_eq!(align_frame(40), 48);
    }

    #[test]
    fn argument_register_order() {
        assert_eq!(INT_ARG_REGS[0], Reg::Rcx);
        assert_eq!(INT_ARG_REGS[3], Reg::R9);
        assert_eq!(FLOAT_ARG_REGS[0], Xmm::Xmm0);
    }
}
