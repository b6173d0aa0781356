// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Desugaring (C9): rewrites inline imports, inline exports, and inline
//! table/memory segments into their canonical standalone forms. Runs after
//! name resolution (C8), so every `Var` it touches is already an index.

use crate::types::{At, Var};

use super::ast::*;

/// Desugars `module` in place. After this runs, no item carries an inline
/// import, inline export, or inline element/data list.
pub fn desugar_module(module: &mut Module) {
    let mut out = Vec::with_capacity(module.items.len());
    let mut func_index = 0u32;
    let mut table_index = 0u32;
    let mut memory_index = 0u32;
    let mut global_index = 0u32;

    for item in std::mem::take(&mut module.items) {
        match item {
            ModuleItem::Import(import) => {
                match &import.descriptor {
                    ImportDescriptor::Function(_) => func_index += 1,
                    ImportDescriptor::Table(_) => table_index += 1,
                    ImportDescriptor::Memory(_) => memory_index += 1,
                    ImportDescriptor::Global(_) => global_index += 1,
                }
                out.push(ModuleItem::Import(import));
            }
            ModuleItem::Function(f) => {
                let index = func_index;
                func_index += 1;
                let exports = f.inline_exports.clone();
                if let Some(inline) = f.inline_import {
                    out.push(ModuleItem::Import(Import {
                        module: inline.module,
                        field: inline.field,
                        name: f.name,
                        descriptor: ImportDescriptor::Function(f.type_use),
                    }));
                } else {
                    out.push(ModuleItem::Function(Function {
                        inline_exports: Vec::new(),
                        inline_import: None,
                        ..f
                    }));
                }
                append_exports(&mut out, exports, crate::types::ExternalKind::Function, index);
            }
            ModuleItem::Table(mut t) => {
                let index = table_index;
                table_index += 1;
                let exports = std::mem::take(&mut t.inline_exports);
                let inline_import = t.inline_import.take();
                let inline_elements = t.inline_elements.take();
                if let Some(inline) = inline_import {
                    out.push(ModuleItem::Import(Import {
                        module: inline.module,
                        field: inline.field,
                        name: t.name,
                        descriptor: ImportDescriptor::Table(t.ty),
                    }));
                } else {
                    out.push(ModuleItem::Table(t));
                    if let Some(items) = inline_elements {
                        out.push(ModuleItem::Element(ElementSegment {
                            name: None,
                            table: Some(At::new(0..0, Var::Index(index))),
                            offset: Some(vec![zero_const_instr()]),
                            mode: ElementModeText::Active,
                            items,
                        }));
                    }
                }
                append_exports(&mut out, exports, crate::types::ExternalKind::Table, index);
            }
            ModuleItem::Memory(mut m) => {
                let index = memory_index;
                memory_index += 1;
                let exports = std::mem::take(&mut m.inline_exports);
                let inline_import = m.inline_import.take();
                let inline_data = m.inline_data.take();
                if let Some(inline) = inline_import {
                    out.push(ModuleItem::Import(Import {
                        module: inline.module,
                        field: inline.field,
                        name: m.name,
                        descriptor: ImportDescriptor::Memory(m.limits),
                    }));
                } else {
                    out.push(ModuleItem::Memory(m));
                    if let Some(bytes) = inline_data {
                        out.push(ModuleItem::Data(DataSegment {
                            name: None,
                            memory: Some(At::new(0..0, Var::Index(index))),
                            offset: Some(vec![zero_const_instr()]),
                            bytes,
                        }));
                    }
                }
                append_exports(&mut out, exports, crate::types::ExternalKind::Memory, index);
            }
            ModuleItem::Global(g) => {
                let index = global_index;
                global_index += 1;
                let exports = g.inline_exports.clone();
                if let Some(inline) = g.inline_import {
                    out.push(ModuleItem::Import(Import {
                        module: inline.module,
                        field: inline.field,
                        name: g.name,
                        descriptor: ImportDescriptor::Global(g.ty),
                    }));
                } else {
                    out.push(ModuleItem::Global(Global {
                        inline_exports: Vec::new(),
                        inline_import: None,
                        ..g
                    }));
                }
                append_exports(&mut out, exports, crate::types::ExternalKind::Global, index);
            }
            other => out.push(other),
        }
    }

    module.items = out;
}

fn zero_const_instr() -> Instruction {
    Instruction {
        offset: 0,
        opcode: "i32.const".to_string(),
        immediate: Immediate::I32(0),
    }
}

fn append_exports(
    out: &mut Vec<ModuleItem>,
    exports: Vec<InlineExport>,
    kind: crate::types::ExternalKind,
    index: u32,
) {
    for export in exports {
        out.push(ModuleItem::Export(Export {
            name: export.name,
            kind,
            index: At::new(0..0, Var::Index(index)),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorSink;
    use crate::text::parser::Parser;
    use crate::text::resolve::resolve_module;

    #[test]
    fn inline_export_becomes_standalone_export_item() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new("(module (func $f (export \"f\")))", &mut sink);
        let mut module = parser.parse_module(&mut sink);
        resolve_module(&mut module, &mut sink);
        desugar_module(&mut module);
        assert!(matches!(module.items[0], ModuleItem::Function(_)));
        assert!(matches!(module.items[1], ModuleItem::Export(_)));
    }

    #[test]
    fn inline_table_elements_become_an_active_segment() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new("(module (table funcref (elem $a $b)) (func $a) (func $b))", &mut sink);
        let mut module = parser.parse_module(&mut sink);
        resolve_module(&mut module, &mut sink);
        desugar_module(&mut module);
        let has_element = module
            .items
            .iter()
            .any(|i| matches!(i, ModuleItem::Element(_)));
        assert!(has_element);
    }

    #[test]
    fn inline_import_becomes_a_standalone_import_item() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new("(module (func $f (import \"env\" \"f\")))", &mut sink);
        let mut module = parser.parse_module(&mut sink);
        resolve_module(&mut module, &mut sink);
        desugar_module(&mut module);
        assert!(matches!(module.items[0], ModuleItem::Import(_)));
    }
}
