//! Growable machine-code buffer with labels and relocations.
//!
//! Intra-section label references are patched by [`CodeBuffer::finalize`];
//! references to data, imports and external symbols stay in the
//! relocation list for the object/PE writer.

use rustc_hash::FxHashMap;
use thiserror::Error;

/// Relocation kinds the PE/COFF writer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 32-bit RIP-relative displacement to a data-section symbol.
    RipData,
    /// 32-bit RIP-relative displacement to an import-table slot.
    RipImport,
    /// 32-bit relative branch target to an external symbol.
    Rel32,
    /// Absolute 64-bit address of a symbol.
    Abs64,
}

/// One relocation record: patch `kind` at `offset` with the address of
/// `symbol` (plus `addend`).
#[derive(Debug, Clone)]
pub struct Reloc {
    pub offset: usize,
    pub kind: RelocKind,
    pub symbol: String,
    pub addend: i64,
}

#[derive(Debug, Clone)]
struct Fixup {
    offset: usize,
    label: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferError {
    #[error("Undefined label '{0}'")]
    UndefinedLabel(String),
    #[error("Duplicate label '{0}'")]
    DuplicateLabel(String),
    #[error("Branch target out of 32-bit range for label '{0}'")]
    OutOfRange(String),
}

/// The code buffer: raw bytes, a symbol/label map, pending intra-section
/// fix-ups and external relocations.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    pub bytes: Vec<u8>,
    labels: FxHashMap<String, usize>,
    fixups: Vec<Fixup>,
    pub relocs: Vec<Reloc>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn here(&self) -> usize {
        self.bytes.len()
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Bind a label to the current position.
    pub fn bind_label(&mut self, name: impl Into<String>) -> Result<(), BufferError> {
        let name = name.into();
        if self.labels.insert(name.clone(), self.bytes.len()).is_some() {
            return Err(BufferError::DuplicateLabel(name));
        }
        Ok(())
    }

    pub fn label_offset(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    /// Emit a 32-bit placeholder displacement referring to `label`,
    /// patched relative to the end of the displacement by `finalize`.
    pub fn emit_label_rel32(&mut self, label: impl Into<String>) {
        self.fixups.push(Fixup {
            offset: self.bytes.len(),
            label: label.into(),
        });
        self.emit_u32(0);
    }

    /// Emit a RIP-relative displacement resolved by the object writer.
    pub fn emit_reloc_rel32(&mut self, kind: RelocKind, symbol: impl Into<String>, addend: i64) {
        self.relocs.push(Reloc {
            offset: self.bytes.len(),
            kind,
            symbol: symbol.into(),
            addend,
        });
        self.emit_u32(0);
    }

    /// Patch all intra-section fix-ups. Call once, after emission.
    pub fn finalize(&mut self) -> Result<(), BufferError> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in fixups {
            let target = self
                .labels
                .get(&fixup.label)
                .copied()
                .ok_or_else(|| BufferError::UndefinedLabel(fixup.label.clone()))?;
            let rel = target as i64 - (fixup.offset as i64 + 4);
            let rel: i32 = rel
                .try_into()
                .map_err(|_| BufferError::OutOfRange(fixup.label.clone()))?;
            self.bytes[fixup.offset..fixup.offset + 4].copy_from_slice(&rel.to_le_bytes());
        }
        Ok(())
    }

    /// All bound labels, for map files and symbol tables.
    pub fn labels(&self) -> impl Iterator<Item = (&String, usize)> {
        self.labels.iter().map(|(name, offset)| (name, *offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_fixup_is_patched() {
        let mut buf = CodeBuffer::new();
        // jmp rel32 to a label bound 3 bytes after the displacement
        buf.emit_u8(0xE9);
        buf.emit_label_rel32("target");
        buf.emit(&[0x90, 0x90, 0x90]);
        buf.bind_label("target").unwrap();
        buf.finalize().unwrap();
        let disp = i32::from_le_bytes(buf.bytes[1..5].try_into().unwrap());
        assert_eq!(disp, 3);
    }

    #[test]
    fn backward_fixup_is_negative() {
        let mut buf = CodeBuffer::new();
        buf.bind_label("loop").unwrap();
        buf.emit(&[0x90, 0x90]);
        buf.emit_u8(0xE9);
        buf.emit_label_rel32("loop");
        buf.finalize().unwrap();
        let disp = i32::from_le_bytes(buf.bytes[3..7].try_into().unwrap());
        // target(0) - (3 + 4)
        assert_eq!(disp, -7);
    }

    #[test]
    fn undefined_label_fails_finalize() {
        let mut buf = CodeBuffer::new();
        buf.emit_u8(0xE9);
        buf.emit_label_rel32("nowhere");
        assert!(matches!(
            buf.finalize(),
            Err(BufferError::UndefinedLabel(_))
        ));
    }

    #[test]
    fn duplicate_label_rejected() {
        let mut buf = CodeBuffer::new();
        buf.bind_label("a").unwrap();
        assert!(matches!(
            buf.bind_label("a"),
            Err(BufferError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn relocations_are_recorded() {
        let mut buf = CodeBuffer::new();
        buf.emit(&[0x48, 0x8D, 0x05]); // lea rax, [rip+disp]
        buf.emit_reloc_rel32(RelocKind::RipData, "str_0", 0);
        assert_eq!(buf.relocs.len(), 1);
        assert_eq!(buf.relocs[0].offset, 3);
        assert_eq!(buf.relocs[0].kind, RelocKind::RipData);
    }
}
