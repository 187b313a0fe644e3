//! Registry of user-defined macros, infix operators, DSL transformers and
//! layers. Populated by the expander's collection pass; layers only
//! contribute their macros once activated by `use layer "name"`.

use crate::parser::ast::{InfixMacroDecl, MacroDecl, SyntaxMacroDecl};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
pub struct MacroRegistry {
    macros: FxHashMap<String, MacroDecl>,
    infix_ops: FxHashMap<String, InfixMacroDecl>,
    dsl_transformers: FxHashMap<String, Option<String>>,
    layers: FxHashMap<String, Vec<MacroDecl>>,
    active_layers: FxHashSet<String>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_macro(&mut self, decl: MacroDecl) {
        self.macros.insert(decl.name.clone(), decl);
    }

    pub fn register_infix(&mut self, decl: InfixMacroDecl) {
        self.infix_ops.insert(decl.op.clone(), decl);
    }

    pub fn register_dsl(&mut self, decl: &SyntaxMacroDecl) {
        self.dsl_transformers
            .insert(decl.name.clone(), decl.transformer.clone());
    }

    pub fn register_layer(&mut self, name: String, macros: Vec<MacroDecl>) {
        self.layers.insert(name, macros);
    }

    /// Activate a layer: its macros join the active set.
    pub fn activate_layer(&mut self, name: &str) -> bool {
        if let Some(macros) = self.layers.get(name) {
            for decl in macros.clone() {
                self.macros.insert(decl.name.clone(), decl);
            }
            self.active_layers.insert(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn lookup_macro(&self, name: &str) -> Option<&MacroDecl> {
        self.macros.get(name)
    }

    pub fn lookup_infix(&self, op: &str) -> Option<&InfixMacroDecl> {
        self.infix_ops.get(op)
    }

    /// Transformer function for a DSL name. `Some(None)` means the DSL is
    /// registered but wraps its content as a string literal.
    pub fn lookup_dsl(&self, name: &str) -> Option<Option<&str>> {
        self.dsl_transformers.get(name).map(|t| t.as_deref())
    }

    pub fn is_layer_active(&self, name: &str) -> bool {
        self.active_layers.contains(name)
    }
}
