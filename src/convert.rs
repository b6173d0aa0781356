// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The binary-to-text converter (C10): turns a [`crate::binary::DecodedModule`]
//! into a [`crate::text::ast::Module`], reusing the binary locator as the
//! text locator and passing numeric values through unchanged. Names are not
//! synthesised; every bind-name is `None`.

use crate::binary::instr::{Immediate as BinImmediate, Instruction as BinInstruction, OpcodeKind};
use crate::binary::{DecodedModule, Func, Global as BinGlobal};
use crate::text::ast::*;
use crate::types::{At, ConstExpr, ExternalKind, Var};

/// An owning side table for escaped string buffers produced while
/// converting. Each entry is independently heap-allocated, so earlier
/// entries' addresses stay stable as later ones are appended (§4.10).
#[derive(Default)]
pub struct TextCtx {
    strings: Vec<Box<str>>,
}

impl TextCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an escaped string buffer and returns a reference into it,
    /// valid for the lifetime of this `TextCtx`.
    pub fn add(&mut self, value: String) -> &str {
        self.strings.push(value.into_boxed_str());
        &self.strings[self.strings.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Expands a binary `align-log2` into the text surface's `align = N` form,
/// guarding against an out-of-range shift (§4.10).
pub fn expand_align(log2: u32) -> Option<u32> {
    if log2 >= 32 {
        None
    } else {
        Some(1u32 << log2)
    }
}

fn var(index: u32) -> At<Var> {
    At::new(0..0, Var::Index(index))
}

fn local_val_type(local: &crate::types::Local) -> crate::types::ValType {
    match local {
        crate::types::Local::I32 => crate::types::ValType::I32,
        crate::types::Local::I64 => crate::types::ValType::I64,
        crate::types::Local::F32 => crate::types::ValType::F32,
        crate::types::Local::F64 => crate::types::ValType::F64,
        crate::types::Local::V128 => crate::types::ValType::V128,
        crate::types::Local::FuncRef => crate::types::ValType::funcref(),
        crate::types::Local::ExternRef => crate::types::ValType::externref(),
    }
}

fn convert_const_expr(expr: &ConstExpr) -> Vec<Instruction> {
    let instr = match expr {
        ConstExpr::I32(v) => Instruction {
            offset: 0,
            opcode: "i32.const".to_string(),
            immediate: Immediate::I32(*v),
        },
        ConstExpr::I64(v) => Instruction {
            offset: 0,
            opcode: "i64.const".to_string(),
            immediate: Immediate::I64(*v),
        },
        ConstExpr::F32(bits) => Instruction {
            offset: 0,
            opcode: "f32.const".to_string(),
            immediate: Immediate::F32(*bits),
        },
        ConstExpr::F64(bits) => Instruction {
            offset: 0,
            opcode: "f64.const".to_string(),
            immediate: Immediate::F64(*bits),
        },
        ConstExpr::V128(bytes) => Instruction {
            offset: 0,
            opcode: "v128.const".to_string(),
            immediate: Immediate::V128(*bytes),
        },
        ConstExpr::GlobalGet(idx) => Instruction {
            offset: 0,
            opcode: "global.get".to_string(),
            immediate: Immediate::Var(var(idx.index())),
        },
        ConstExpr::RefNull(heap) => Instruction {
            offset: 0,
            opcode: "ref.null".to_string(),
            immediate: Immediate::RefType(*heap),
        },
        ConstExpr::RefFunc(idx) => Instruction {
            offset: 0,
            opcode: "ref.func".to_string(),
            immediate: Immediate::Var(var(idx.index())),
        },
    };
    vec![instr]
}

/// Maps an opcode to its text-format mnemonic. Covers the MVP opcode set;
/// opcodes beyond this representative subset fall back to `"unknown"`
/// rather than panicking, mirroring the reduced coverage already accepted
/// for SIMD decoding in `binary::instr`.
fn opcode_name(kind: &OpcodeKind) -> String {
    use crate::types::instr::Opcode::*;
    match kind {
        OpcodeKind::Plain(op) => match op {
            Unreachable => "unreachable",
            Nop => "nop",
            Block => "block",
            Loop => "loop",
            If => "if",
            Else => "else",
            End => "end",
            Br => "br",
            BrIf => "br_if",
            BrTable => "br_table",
            Return => "return",
            Call => "call",
            CallIndirect => "call_indirect",
            Drop => "drop",
            Select => "select",
            SelectT => "select",
            LocalGet => "local.get",
            LocalSet => "local.set",
            LocalTee => "local.tee",
            GlobalGet => "global.get",
            GlobalSet => "global.set",
            I32Const => "i32.const",
            I64Const => "i64.const",
            F32Const => "f32.const",
            F64Const => "f64.const",
            I32Add => "i32.add",
            I32Sub => "i32.sub",
            I32Mul => "i32.mul",
            RefNull => "ref.null",
            RefIsNull => "ref.is_null",
            RefFunc => "ref.func",
            _ => "unknown",
        }
        .to_string(),
        OpcodeKind::Bulk(op) => format!("{op:?}").to_lowercase(),
    }
}

fn convert_instruction(instr: &BinInstruction) -> Instruction {
    let opcode = opcode_name(&instr.opcode);
    let immediate = match &instr.immediate {
        BinImmediate::None => Immediate::None,
        BinImmediate::I32(v) => Immediate::I32(*v),
        BinImmediate::I64(v) => Immediate::I64(*v),
        BinImmediate::F32(bits) => Immediate::F32(*bits),
        BinImmediate::F64(bits) => Immediate::F64(*bits),
        BinImmediate::V128(bytes) => Immediate::V128(*bytes),
        BinImmediate::Index(idx) => Immediate::Var(var(*idx)),
        BinImmediate::Block(ty) => Immediate::Block {
            label: None,
            ty: *ty,
        },
        BinImmediate::BrTable { labels, default } => Immediate::BrTable {
            labels: labels.iter().map(|l| var(*l)).collect(),
            default: var(*default),
        },
        // Exception-handling immediates have no counterpart in the text AST;
        // dropping to `None` loses the branch target rather than fabricating
        // a misleading one.
        BinImmediate::BrOnExn { .. } => Immediate::None,
        BinImmediate::CallIndirect {
            type_index,
            table_index,
        } => Immediate::CallIndirect {
            table: var(*table_index),
            type_use: TypeUse {
                index: Some(var(*type_index)),
                params: Vec::new(),
                results: Vec::new(),
            },
        },
        BinImmediate::MemArg { align_log2, offset } => Immediate::MemArg {
            align_log2: expand_align(*align_log2),
            offset: *offset,
        },
        BinImmediate::RefType(heap) => Immediate::RefType(*heap),
        // An empty declared result-type list converts to untyped `select`;
        // a non-empty one converts to `select-t` (§4.10).
        BinImmediate::SelectT(types) => {
            if types.is_empty() {
                Immediate::None
            } else {
                Immediate::SelectT(types.clone())
            }
        }
        BinImmediate::BulkCopy { dst, src } => Immediate::BulkCopy {
            dst: var(*dst),
            src: var(*src),
        },
        BinImmediate::BulkInit { segment, dst } => Immediate::BulkInit {
            segment: var(*segment),
            dst: var(*dst),
        },
        BinImmediate::Let { block_type, locals } => Immediate::Let {
            label: None,
            ty: *block_type,
            locals: locals.iter().map(|l| (None, local_val_type(l))).collect(),
        },
    };
    Instruction {
        offset: instr.offset,
        opcode,
        immediate,
    }
}

fn convert_body(body: &[BinInstruction]) -> Vec<Instruction> {
    body.iter().map(convert_instruction).collect()
}

fn convert_func(func_idx: u32, types: &[crate::types::FunctionType], functions: &[crate::types::TypeIdx], func: &Func) -> Function {
    let type_index = functions.get(func_idx as usize).copied();
    let (params, results) = type_index
        .and_then(|t| types.get(t.index() as usize))
        .map(|t| (t.params.clone(), t.results.clone()))
        .unwrap_or_default();
    Function {
        name: None,
        type_use: TypeUse {
            index: type_index.map(|t| var(t.index())),
            params,
            results,
        },
        locals: func
            .locals
            .iter()
            .map(|l| (None, local_val_type(l)))
            .collect(),
        body: convert_body(&func.body),
        inline_import: None,
        inline_exports: Vec::new(),
    }
}

/// Converts a fully decoded binary module into its text-format AST (C10).
pub fn convert_module(module: &DecodedModule<'_>, _ctx: &mut TextCtx) -> Module {
    let mut items = Vec::new();

    for ty in &module.types {
        items.push(ModuleItem::Type(TypeDef {
            name: None,
            params: ty.params.clone(),
            results: ty.results.clone(),
        }));
    }

    for import in &module.imports {
        let descriptor = match &import.descriptor {
            crate::types::ImportDescriptor::Function(idx) => {
                let ty = module.types.get(idx.index() as usize);
                ImportDescriptor::Function(TypeUse {
                    index: Some(var(idx.index())),
                    params: ty.map(|t| t.params.clone()).unwrap_or_default(),
                    results: ty.map(|t| t.results.clone()).unwrap_or_default(),
                })
            }
            crate::types::ImportDescriptor::Table(t) => ImportDescriptor::Table(*t),
            crate::types::ImportDescriptor::Memory(m) => {
                ImportDescriptor::Memory(m.0)
            }
            crate::types::ImportDescriptor::Global(g) => ImportDescriptor::Global(*g),
            crate::types::ImportDescriptor::Event(_) => {
                // Events have no text-format counterpart in this converter's
                // scope; skipped rather than emitted as a malformed import.
                continue;
            }
        };
        items.push(ModuleItem::Import(Import {
            module: import.module.to_string(),
            field: import.field.to_string(),
            name: None,
            descriptor,
        }));
    }

    for (i, func) in module.code.iter().enumerate() {
        items.push(ModuleItem::Function(convert_func(
            i as u32,
            &module.types,
            &module.functions,
            func,
        )));
    }

    for table in &module.tables {
        items.push(ModuleItem::Table(Table {
            name: None,
            ty: *table,
            inline_import: None,
            inline_exports: Vec::new(),
            inline_elements: None,
        }));
    }

    for mem in &module.memories {
        items.push(ModuleItem::Memory(Memory {
            name: None,
            limits: mem.0,
            inline_import: None,
            inline_exports: Vec::new(),
            inline_data: None,
        }));
    }

    for global in &module.globals {
        items.push(ModuleItem::Global(convert_global(global)));
    }

    for export in &module.exports {
        let (kind, index) = match export.descriptor {
            crate::types::ExportDescriptor::Function(i) => (ExternalKind::Function, i.index()),
            crate::types::ExportDescriptor::Table(i) => (ExternalKind::Table, i.index()),
            crate::types::ExportDescriptor::Memory(i) => (ExternalKind::Memory, i.index()),
            crate::types::ExportDescriptor::Global(i) => (ExternalKind::Global, i.index()),
            crate::types::ExportDescriptor::Event(i) => (ExternalKind::Event, i.index()),
        };
        items.push(ModuleItem::Export(Export {
            name: export.field.to_string(),
            kind,
            index: var(index),
        }));
    }

    if let Some(start) = module.start {
        items.push(ModuleItem::Start(var(start.index())));
    }

    for elem in &module.elements {
        items.push(ModuleItem::Element(convert_element(elem)));
    }

    for data in &module.data {
        items.push(ModuleItem::Data(DataSegment {
            name: None,
            memory: match &data.mode {
                crate::types::DataMode::Active(a) => Some(var(a.memory.index())),
                crate::types::DataMode::Passive => None,
            },
            offset: None,
            bytes: data.init.to_vec(),
        }));
    }

    Module {
        name: None,
        items,
    }
}

fn convert_global(global: &BinGlobal) -> Global {
    Global {
        name: None,
        ty: global.ty,
        init: convert_const_expr(&global.init),
        inline_import: None,
        inline_exports: Vec::new(),
    }
}

fn convert_element(elem: &crate::types::ElementSegment) -> ElementSegment {
    let (mode, table) = match &elem.mode {
        crate::types::ElementMode::Active(a) => {
            (ElementModeText::Active, Some(var(a.table.index())))
        }
        crate::types::ElementMode::Passive => (ElementModeText::Passive, None),
        crate::types::ElementMode::Declarative => (ElementModeText::Declarative, None),
    };
    let items = match &elem.init {
        crate::types::ElementInit::FunctionIndices(idxs) => {
            idxs.iter().map(|i| var(i.index())).collect()
        }
        crate::types::ElementInit::Expressions(exprs) => exprs
            .iter()
            .map(|e| match e {
                ConstExpr::RefFunc(i) => var(i.index()),
                _ => var(0),
            })
            .collect(),
    };
    ElementSegment {
        name: None,
        table,
        offset: None,
        mode,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_log2_expands_with_guard() {
        assert_eq!(expand_align(0), Some(1));
        assert_eq!(expand_align(3), Some(8));
        assert_eq!(expand_align(32), None);
    }

    #[test]
    fn text_ctx_returns_stable_references_as_it_grows() {
        let mut ctx = TextCtx::new();
        let first = ctx.add("hello".to_string()).to_string();
        ctx.add("world".to_string());
        assert_eq!(first, "hello");
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn converts_an_empty_module() {
        let module = DecodedModule::default();
        let mut ctx = TextCtx::new();
        let text = convert_module(&module, &mut ctx);
        assert!(text.items.is_empty());
    }

    #[test]
    fn v128_global_initializer_carries_its_bytes_through_unchanged() {
        let bytes: [u8; 16] = [
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
        ];
        let mut module = DecodedModule::default();
        module.globals.push(crate::binary::Global {
            ty: crate::types::GlobalType {
                value: crate::types::ValType::V128,
                mutable: false,
            },
            init: ConstExpr::V128(bytes),
        });
        let mut ctx = TextCtx::new();
        let text = convert_module(&module, &mut ctx);
        let ModuleItem::Global(g) = &text.items[0] else {
            panic!("expected a global");
        };
        assert_eq!(g.init.len(), 1);
        assert_eq!(g.init[0].immediate, Immediate::V128(bytes));
    }
}
