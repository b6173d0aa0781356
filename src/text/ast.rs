// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The text-format AST (§4.7, §4.8, §4.9): the parser's output, the
//! resolver's input and output, and the desugarer's input and output. Every
//! name reference is a [`Var`] until C8 resolves it to an index.

use crate::types::{
    At, BlockType, ElementMode, ExternalKind, GlobalType, HeapType, Limits, TableType, ValType,
    Var,
};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TypeUse {
    pub index: Option<At<Var>>,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Immediate {
    None,
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    V128([u8; 16]),
    Var(At<Var>),
    Block {
        label: Option<String>,
        ty: BlockType,
    },
    BrTable {
        labels: Vec<At<Var>>,
        default: At<Var>,
    },
    CallIndirect {
        table: At<Var>,
        type_use: TypeUse,
    },
    MemArg {
        align_log2: Option<u32>,
        offset: u32,
    },
    RefType(HeapType),
    SelectT(Vec<ValType>),
    BulkCopy {
        dst: At<Var>,
        src: At<Var>,
    },
    BulkInit {
        segment: At<Var>,
        dst: At<Var>,
    },
    Let {
        label: Option<String>,
        ty: BlockType,
        locals: Vec<(Option<String>, ValType)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: String,
    pub immediate: Immediate,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct InlineExport {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImport {
    pub module: String,
    pub field: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Function {
    pub name: Option<At<Var>>,
    pub type_use: TypeUse,
    pub locals: Vec<(Option<String>, ValType)>,
    pub body: Vec<Instruction>,
    pub inline_import: Option<InlineImport>,
    pub inline_exports: Vec<InlineExport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Table {
    pub name: Option<At<Var>>,
    pub ty: TableType,
    pub inline_import: Option<InlineImport>,
    pub inline_exports: Vec<InlineExport>,
    pub inline_elements: Option<Vec<At<Var>>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Memory {
    pub name: Option<At<Var>>,
    pub limits: Limits,
    pub inline_import: Option<InlineImport>,
    pub inline_exports: Vec<InlineExport>,
    pub inline_data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Global {
    pub name: Option<At<Var>>,
    pub ty: GlobalType,
    pub init: Vec<Instruction>,
    pub inline_import: Option<InlineImport>,
    pub inline_exports: Vec<InlineExport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub name: Option<At<Var>>,
    pub descriptor: ImportDescriptor,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportDescriptor {
    Function(TypeUse),
    Table(TableType),
    Memory(Limits),
    Global(GlobalType),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: At<Var>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementSegment {
    pub name: Option<At<Var>>,
    pub table: Option<At<Var>>,
    pub offset: Option<Vec<Instruction>>,
    pub mode: ElementModeText,
    pub items: Vec<At<Var>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementModeText {
    Active,
    Passive,
    Declarative,
}

impl ElementModeText {
    pub fn to_binary(&self) -> ElementMode {
        match self {
            ElementModeText::Active => {
                ElementMode::Active(crate::types::ElementModeActive {
                    table: crate::types::TableIdx::new(0),
                })
            }
            ElementModeText::Passive => ElementMode::Passive,
            ElementModeText::Declarative => ElementMode::Declarative,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSegment {
    pub name: Option<At<Var>>,
    pub memory: Option<At<Var>>,
    pub offset: Option<Vec<Instruction>>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: Option<At<Var>>,
    pub params: Vec<ValType>,
    pub results: Vec<ValType>,
}

/// One top-level item inside `(module ...)`, in source order. Desugaring
/// (§4.9) rewrites this list so that only canonical kinds remain (no item
/// carries an inline import, inline export, or inline segment any longer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleItem {
    Type(TypeDef),
    Import(Import),
    Function(Function),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Export(Export),
    Start(At<Var>),
    Element(ElementSegment),
    Data(DataSegment),
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Module {
    pub name: Option<String>,
    pub items: Vec<ModuleItem>,
}
