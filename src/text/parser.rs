// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The recursive-descent text parser (C7). Folded instructions
//! (`(op operand...)`) are canonicalised into linear order as they are
//! parsed; by the time a [`super::ast::Function`] body reaches the resolver
//! it is a flat linear instruction stream regardless of which surface
//! syntax the source used.

use crate::error::{Error, ErrorSink};
use crate::types::{
    At, BlockType, ExternalKind, GlobalType, HeapType, Limits, RefType, TableType, ValType, Var,
};

use super::ast::*;
use super::token::{decode_string, Token, TokenKind, Tokenizer};

pub struct Parser<'a> {
    tok: Tokenizer<'a>,
    cur: Token<'a>,
}

fn parse_var(text: &str) -> Var {
    if let Some(name) = text.strip_prefix('$') {
        Var::Name(name.to_string())
    } else {
        Var::Index(text.parse().unwrap_or(0))
    }
}

fn parse_value_type(keyword: &str) -> Option<ValType> {
    Some(match keyword {
        "i32" => ValType::I32,
        "i64" => ValType::I64,
        "f32" => ValType::F32,
        "f64" => ValType::F64,
        "v128" => ValType::V128,
        "funcref" => ValType::funcref(),
        "externref" => ValType::externref(),
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, sink: &mut ErrorSink) -> Self {
        let mut tok = Tokenizer::new(src);
        let cur = tok.next(sink);
        Self { tok, cur }
    }

    fn advance(&mut self, sink: &mut ErrorSink) {
        self.cur = self.tok.next(sink);
    }

    fn offset(&self) -> usize {
        self.cur.offset
    }

    fn expect_lpar(&mut self, sink: &mut ErrorSink) -> bool {
        if self.cur.kind == TokenKind::LPar {
            self.advance(sink);
            true
        } else {
            sink.report(self.offset(), Error::BadString);
            false
        }
    }

    fn expect_rpar(&mut self, sink: &mut ErrorSink) -> bool {
        if self.cur.kind == TokenKind::RPar {
            self.advance(sink);
            true
        } else {
            sink.report(self.offset(), Error::BadString);
            false
        }
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.cur.kind, TokenKind::Keyword(k) if k == word)
    }

    fn take_keyword(&mut self, word: &str, sink: &mut ErrorSink) -> bool {
        if self.peek_keyword(word) {
            self.advance(sink);
            true
        } else {
            false
        }
    }

    fn take_id(&mut self, sink: &mut ErrorSink) -> Option<At<Var>> {
        if let TokenKind::Id(text) = self.cur.kind {
            let offset = self.cur.offset;
            self.advance(sink);
            Some(At::new(offset..offset + text.len(), parse_var(text)))
        } else {
            None
        }
    }

    fn take_var(&mut self, sink: &mut ErrorSink) -> Option<At<Var>> {
        let offset = self.cur.offset;
        match self.cur.kind {
            TokenKind::Id(text) => {
                self.advance(sink);
                Some(At::new(offset..offset + text.len(), parse_var(text)))
            }
            TokenKind::Nat(text) => {
                self.advance(sink);
                Some(At::new(offset..offset + text.len(), parse_var(text)))
            }
            _ => None,
        }
    }

    fn take_string(&mut self, sink: &mut ErrorSink) -> Option<String> {
        if let TokenKind::String(literal) = self.cur.kind {
            self.advance(sink);
            Some(String::from_utf8_lossy(&decode_string(literal, sink)).into_owned())
        } else {
            None
        }
    }

    fn parse_value_type_token(&mut self, sink: &mut ErrorSink) -> Option<ValType> {
        if let TokenKind::Keyword(word) = self.cur.kind {
            if let Some(ty) = parse_value_type(word) {
                self.advance(sink);
                return Some(ty);
            }
        }
        None
    }

    /// Parses `(module $name? item*)`, or a bare sequence of items if the
    /// outer `(module ...)` wrapper is absent (the common "inline module"
    /// form used by single-module test inputs).
    pub fn parse_module(&mut self, sink: &mut ErrorSink) -> Module {
        let mut module = Module::default();
        let wrapped = self.cur.kind == TokenKind::LPar;
        if wrapped {
            self.advance(sink);
            if !self.take_keyword("module", sink) {
                sink.report(self.offset(), Error::BadString);
            }
            if let TokenKind::Id(text) = self.cur.kind {
                module.name = Some(text.to_string());
                self.advance(sink);
            }
        }
        loop {
            if self.cur.kind == TokenKind::Eof {
                break;
            }
            if wrapped && self.cur.kind == TokenKind::RPar {
                break;
            }
            if let Some(item) = self.parse_item(sink) {
                module.items.push(item);
            } else {
                break;
            }
        }
        if wrapped {
            self.expect_rpar(sink);
        }
        module
    }

    fn parse_item(&mut self, sink: &mut ErrorSink) -> Option<ModuleItem> {
        if !self.expect_lpar(sink) {
            return None;
        }
        let item = match self.cur.kind {
            TokenKind::Keyword("type") => ModuleItem::Type(self.parse_type_def(sink)),
            TokenKind::Keyword("import") => ModuleItem::Import(self.parse_import(sink)),
            TokenKind::Keyword("func") => ModuleItem::Function(self.parse_func(sink)),
            TokenKind::Keyword("table") => ModuleItem::Table(self.parse_table(sink)),
            TokenKind::Keyword("memory") => ModuleItem::Memory(self.parse_memory(sink)),
            TokenKind::Keyword("global") => ModuleItem::Global(self.parse_global(sink)),
            TokenKind::Keyword("export") => ModuleItem::Export(self.parse_export(sink)),
            TokenKind::Keyword("start") => {
                self.advance(sink);
                let var = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
                ModuleItem::Start(var)
            }
            TokenKind::Keyword("elem") => ModuleItem::Element(self.parse_elem(sink)),
            TokenKind::Keyword("data") => ModuleItem::Data(self.parse_data(sink)),
            _ => {
                sink.report(self.offset(), Error::BadString);
                self.skip_to_matching_rpar(sink);
                return None;
            }
        };
        self.expect_rpar(sink);
        Some(item)
    }

    fn skip_to_matching_rpar(&mut self, sink: &mut ErrorSink) {
        let mut depth = 1;
        loop {
            match self.cur.kind {
                TokenKind::LPar => depth += 1,
                TokenKind::RPar => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance(sink);
                        return;
                    }
                }
                TokenKind::Eof => return,
                _ => {}
            }
            self.advance(sink);
        }
    }

    fn parse_type_def(&mut self, sink: &mut ErrorSink) -> TypeDef {
        self.advance(sink); // "type"
        let name = self.take_id(sink);
        let mut def = TypeDef {
            name,
            params: Vec::new(),
            results: Vec::new(),
        };
        if self.expect_lpar(sink) {
            self.take_keyword("func", sink);
            self.parse_params_results(&mut def.params, &mut def.results, sink);
            self.expect_rpar(sink);
        }
        def
    }

    fn parse_params_results(
        &mut self,
        params: &mut Vec<ValType>,
        results: &mut Vec<ValType>,
        sink: &mut ErrorSink,
    ) {
        loop {
            if self.cur.kind != TokenKind::LPar {
                break;
            }
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("param", sink) {
                let _ = self.take_id(sink);
                while let Some(ty) = self.parse_value_type_token(sink) {
                    params.push(ty);
                }
                self.expect_rpar(sink);
            } else if self.take_keyword("result", sink) {
                while let Some(ty) = self.parse_value_type_token(sink) {
                    results.push(ty);
                }
                self.expect_rpar(sink);
            } else {
                self.cur = checkpoint;
                break;
            }
        }
    }

    fn parse_type_use(&mut self, sink: &mut ErrorSink) -> TypeUse {
        let mut use_ = TypeUse::default();
        if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("type", sink) {
                use_.index = self.take_var(sink);
                self.expect_rpar(sink);
            } else {
                self.cur = checkpoint;
            }
        }
        self.parse_params_results(&mut use_.params, &mut use_.results, sink);
        use_
    }

    fn parse_inline_import_export(
        &mut self,
        sink: &mut ErrorSink,
    ) -> (Option<InlineImport>, Vec<InlineExport>) {
        let mut import = None;
        let mut exports = Vec::new();
        loop {
            if self.cur.kind != TokenKind::LPar {
                break;
            }
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("import", sink) {
                let module = self.take_string(sink).unwrap_or_default();
                let field = self.take_string(sink).unwrap_or_default();
                import = Some(InlineImport { module, field });
                self.expect_rpar(sink);
            } else if self.take_keyword("export", sink) {
                let name = self.take_string(sink).unwrap_or_default();
                exports.push(InlineExport { name });
                self.expect_rpar(sink);
            } else {
                self.cur = checkpoint;
                break;
            }
        }
        (import, exports)
    }

    /// Parses a run of `(local $name? ty*)` groups, used both by `func`'s
    /// own local declarations and by `let`'s (§4.5).
    fn parse_locals(&mut self, sink: &mut ErrorSink) -> Vec<(Option<String>, ValType)> {
        let mut locals = Vec::new();
        loop {
            if self.cur.kind != TokenKind::LPar {
                break;
            }
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("local", sink) {
                let local_name = self.take_id(sink).map(|_| String::new());
                while let Some(ty) = self.parse_value_type_token(sink) {
                    locals.push((local_name.clone(), ty));
                }
                self.expect_rpar(sink);
            } else {
                self.cur = checkpoint;
                break;
            }
        }
        locals
    }

    fn parse_func(&mut self, sink: &mut ErrorSink) -> Function {
        self.advance(sink); // "func"
        let name = self.take_id(sink);
        let (inline_import, inline_exports) = self.parse_inline_import_export(sink);
        let type_use = self.parse_type_use(sink);
        let locals = self.parse_locals(sink);
        let body = self.parse_instructions(sink);
        Function {
            name,
            type_use,
            locals,
            body,
            inline_import,
            inline_exports,
        }
    }

    /// Parses a mixed linear/folded instruction sequence up to the item's
    /// closing paren, flattening folded forms into linear order. Stops
    /// before a clause-delimiter keyword (`else`, `catch`, `catch_all`,
    /// `delegate`, `end`) rather than consuming it as a bare instruction,
    /// so the caller (`parse_block_instr`/`parse_try_instr`) can recognise
    /// which clause follows.
    fn parse_instructions(&mut self, sink: &mut ErrorSink) -> Vec<Instruction> {
        let mut out = Vec::new();
        loop {
            match self.cur.kind {
                TokenKind::RPar | TokenKind::Eof => break,
                TokenKind::Keyword("else" | "catch" | "catch_all" | "delegate" | "end") => break,
                TokenKind::LPar => self.parse_folded_instr(&mut out, sink),
                TokenKind::Keyword(_) => self.parse_plain_instr(&mut out, sink),
                _ => break,
            }
        }
        out
    }

    fn parse_folded_instr(&mut self, out: &mut Vec<Instruction>, sink: &mut ErrorSink) {
        self.advance(sink); // LPar
        if matches!(self.cur.kind, TokenKind::Keyword("block" | "loop" | "if")) {
            self.parse_block_instr(out, sink, true);
            self.expect_rpar(sink);
            return;
        }
        if self.peek_keyword("try") {
            self.parse_try_instr(out, sink, true);
            self.expect_rpar(sink);
            return;
        }
        if self.peek_keyword("let") {
            self.parse_let_instr(out, sink, true);
            self.expect_rpar(sink);
            return;
        }
        // (op operand* child-expr*) -> children first, then op.
        let offset = self.offset();
        let TokenKind::Keyword(opcode) = self.cur.kind else {
            self.skip_to_matching_rpar(sink);
            return;
        };
        self.advance(sink);
        let immediate = self.parse_immediate_for(opcode, sink);
        loop {
            if self.cur.kind == TokenKind::RPar {
                break;
            }
            if self.cur.kind == TokenKind::LPar {
                self.parse_folded_instr(out, sink);
            } else {
                break;
            }
        }
        out.push(Instruction {
            offset,
            opcode: opcode.to_string(),
            immediate,
        });
        self.expect_rpar(sink);
    }

    fn parse_plain_instr(&mut self, out: &mut Vec<Instruction>, sink: &mut ErrorSink) {
        let offset = self.offset();
        if matches!(self.cur.kind, TokenKind::Keyword("block" | "loop" | "if")) {
            self.parse_block_instr(out, sink, false);
            return;
        }
        if self.peek_keyword("try") {
            self.parse_try_instr(out, sink, false);
            return;
        }
        if self.peek_keyword("let") {
            self.parse_let_instr(out, sink, false);
            return;
        }
        let TokenKind::Keyword(opcode) = self.cur.kind else {
            return;
        };
        self.advance(sink);
        let immediate = self.parse_immediate_for(opcode, sink);
        out.push(Instruction {
            offset,
            opcode: opcode.to_string(),
            immediate,
        });
    }

    fn parse_block_instr(&mut self, out: &mut Vec<Instruction>, sink: &mut ErrorSink, folded: bool) {
        let offset = self.offset();
        let TokenKind::Keyword(opcode) = self.cur.kind else {
            return;
        };
        self.advance(sink);
        let label = self.take_id(sink).map(|_| String::new());
        let mut params = Vec::new();
        let mut results = Vec::new();
        self.parse_params_results(&mut params, &mut results, sink);
        let ty = if !results.is_empty() && params.is_empty() {
            if results.len() == 1 {
                BlockType::Result(results[0])
            } else {
                BlockType::Empty
            }
        } else {
            BlockType::Empty
        };
        out.push(Instruction {
            offset,
            opcode: opcode.to_string(),
            immediate: Immediate::Block { label, ty },
        });
        if folded {
            out.extend(self.parse_instructions(sink));
            if self.take_keyword("else", sink) {
                out.push(Instruction {
                    offset: self.offset(),
                    opcode: "else".to_string(),
                    immediate: Immediate::None,
                });
                let _ = self.take_id(sink);
                out.extend(self.parse_instructions(sink));
            }
        } else {
            out.extend(self.parse_instructions(sink));
            if self.take_keyword("else", sink) {
                out.push(Instruction {
                    offset: self.offset(),
                    opcode: "else".to_string(),
                    immediate: Immediate::None,
                });
                let _ = self.take_id(sink);
                out.extend(self.parse_instructions(sink));
            }
            self.take_keyword("end", sink);
            let _ = self.take_id(sink);
        }
        out.push(Instruction {
            offset: self.offset(),
            opcode: "end".to_string(),
            immediate: Immediate::None,
        });
    }

    /// Parses `try $label? blocktype instr* (catch $tag instr*)*
    /// (catch_all instr*)? end` or the `delegate $label` terminated form
    /// (exception-handling proposal).
    fn parse_try_instr(&mut self, out: &mut Vec<Instruction>, sink: &mut ErrorSink, folded: bool) {
        let offset = self.offset();
        self.advance(sink); // "try"
        let label = self.take_id(sink).map(|_| String::new());
        let mut params = Vec::new();
        let mut results = Vec::new();
        self.parse_params_results(&mut params, &mut results, sink);
        let ty = if !results.is_empty() && params.is_empty() {
            if results.len() == 1 {
                BlockType::Result(results[0])
            } else {
                BlockType::Empty
            }
        } else {
            BlockType::Empty
        };
        out.push(Instruction {
            offset,
            opcode: "try".to_string(),
            immediate: Immediate::Block { label, ty },
        });
        out.extend(self.parse_instructions(sink));
        loop {
            if self.take_keyword("catch", sink) {
                let tag = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
                out.push(Instruction {
                    offset: self.offset(),
                    opcode: "catch".to_string(),
                    immediate: Immediate::Var(tag),
                });
                out.extend(self.parse_instructions(sink));
            } else if self.take_keyword("catch_all", sink) {
                out.push(Instruction {
                    offset: self.offset(),
                    opcode: "catch_all".to_string(),
                    immediate: Immediate::None,
                });
                out.extend(self.parse_instructions(sink));
            } else {
                break;
            }
        }
        if self.take_keyword("delegate", sink) {
            let target = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
            out.push(Instruction {
                offset: self.offset(),
                opcode: "delegate".to_string(),
                immediate: Immediate::Var(target),
            });
            if !folded {
                let _ = self.take_id(sink);
            }
            return;
        }
        if !folded {
            self.take_keyword("end", sink);
            let _ = self.take_id(sink);
        }
        out.push(Instruction {
            offset: self.offset(),
            opcode: "end".to_string(),
            immediate: Immediate::None,
        });
    }

    /// Parses `let $label? blocktype (local $name? ty*)* instr* end`
    /// (function-references proposal).
    fn parse_let_instr(&mut self, out: &mut Vec<Instruction>, sink: &mut ErrorSink, folded: bool) {
        let offset = self.offset();
        self.advance(sink); // "let"
        let label = self.take_id(sink).map(|_| String::new());
        let mut params = Vec::new();
        let mut results = Vec::new();
        self.parse_params_results(&mut params, &mut results, sink);
        let ty = if !results.is_empty() && params.is_empty() {
            if results.len() == 1 {
                BlockType::Result(results[0])
            } else {
                BlockType::Empty
            }
        } else {
            BlockType::Empty
        };
        let locals = self.parse_locals(sink);
        out.push(Instruction {
            offset,
            opcode: "let".to_string(),
            immediate: Immediate::Let { label, ty, locals },
        });
        out.extend(self.parse_instructions(sink));
        if !folded {
            self.take_keyword("end", sink);
            let _ = self.take_id(sink);
        }
        out.push(Instruction {
            offset: self.offset(),
            opcode: "end".to_string(),
            immediate: Immediate::None,
        });
    }

    fn parse_immediate_for(&mut self, opcode: &str, sink: &mut ErrorSink) -> Immediate {
        match opcode {
            "i32.const" => Immediate::I32(self.parse_int_literal(sink) as i32),
            "i64.const" => Immediate::I64(self.parse_int_literal(sink)),
            "f32.const" => Immediate::F32((self.parse_float_literal(sink) as f32).to_bits()),
            "f64.const" => Immediate::F64(self.parse_float_literal(sink).to_bits()),
            "call" | "br" | "br_if" | "local.get" | "local.set" | "local.tee" | "global.get"
            | "global.set" | "table.get" | "table.set" | "ref.func" | "memory.size"
            | "memory.grow" | "table.size" | "table.grow" | "table.fill" | "elem.drop"
            | "data.drop" | "return_call" | "throw" | "catch" | "rethrow" | "delegate" => self
                .take_var(sink)
                .map(Immediate::Var)
                .unwrap_or(Immediate::None),
            "call_indirect" | "return_call_indirect" => {
                let table = self
                    .take_var(sink)
                    .unwrap_or(At::new(0..0, Var::Index(0)));
                let type_use = self.parse_type_use(sink);
                Immediate::CallIndirect { table, type_use }
            }
            "select" => {
                let mut params = Vec::new();
                let mut results = Vec::new();
                self.parse_params_results(&mut params, &mut results, sink);
                if results.is_empty() {
                    Immediate::None
                } else {
                    Immediate::SelectT(results)
                }
            }
            "br_table" => {
                let mut labels = Vec::new();
                while let Some(v) = self.take_var(sink) {
                    labels.push(v);
                }
                let default = labels.pop().unwrap_or(At::new(0..0, Var::Index(0)));
                Immediate::BrTable { labels, default }
            }
            "ref.null" => {
                if let TokenKind::Keyword(word) = self.cur.kind {
                    let heap = match word {
                        "func" => Some(HeapType::Func),
                        "extern" => Some(HeapType::Extern),
                        _ => None,
                    };
                    if let Some(heap) = heap {
                        self.advance(sink);
                        return Immediate::RefType(heap);
                    }
                }
                Immediate::None
            }
            _ if opcode.contains("load") || opcode.contains("store") => {
                self.parse_mem_arg(sink)
            }
            "table.copy" | "memory.copy" => {
                let dst = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
                let src = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
                Immediate::BulkCopy { dst, src }
            }
            "table.init" | "memory.init" => {
                let segment = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
                let dst = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
                Immediate::BulkInit { segment, dst }
            }
            _ => Immediate::None,
        }
    }

    fn parse_mem_arg(&mut self, sink: &mut ErrorSink) -> Immediate {
        let mut offset = 0u32;
        let mut align_log2 = None;
        loop {
            let mem_arg_offset = self.offset();
            let TokenKind::Keyword(word) = self.cur.kind else {
                break;
            };
            if let Some(rest) = word.strip_prefix("offset=") {
                offset = rest.parse().unwrap_or(0);
                self.advance(sink);
            } else if let Some(rest) = word.strip_prefix("align=") {
                let align: u32 = rest.parse().unwrap_or(1);
                let log2 = align.trailing_zeros();
                if log2 >= 32 {
                    sink.report(mem_arg_offset, Error::AlignOutOfRange { log2 });
                } else {
                    align_log2 = Some(log2);
                }
                self.advance(sink);
            } else {
                break;
            }
        }
        Immediate::MemArg { align_log2, offset }
    }

    fn parse_int_literal(&mut self, sink: &mut ErrorSink) -> i64 {
        let text = match self.cur.kind {
            TokenKind::Nat(t) | TokenKind::Int(t) => t,
            _ => {
                sink.report(self.offset(), Error::BadString);
                return 0;
            }
        };
        self.advance(sink);
        let clean: String = text.chars().filter(|c| *c != '_').collect();
        if let Some(hex) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("-0x")) {
            let negative = clean.starts_with('-');
            let value = i64::from_str_radix(hex, 16).unwrap_or(0);
            if negative {
                -value
            } else {
                value
            }
        } else {
            clean.parse().unwrap_or(0)
        }
    }

    fn parse_float_literal(&mut self, sink: &mut ErrorSink) -> f64 {
        let text = match self.cur.kind {
            TokenKind::Nat(t) | TokenKind::Int(t) | TokenKind::Float(t) => t,
            _ => {
                sink.report(self.offset(), Error::BadString);
                return 0.0;
            }
        };
        self.advance(sink);
        let clean: String = text.chars().filter(|c| *c != '_').collect();
        match clean.as_str() {
            "nan" | "+nan" => f64::NAN,
            "-nan" => -f64::NAN,
            "inf" | "+inf" => f64::INFINITY,
            "-inf" => f64::NEG_INFINITY,
            _ if clean.contains("nan:") => f64::NAN,
            _ => clean.parse().unwrap_or(0.0),
        }
    }

    fn parse_import(&mut self, sink: &mut ErrorSink) -> Import {
        self.advance(sink); // "import"
        let module = self.take_string(sink).unwrap_or_default();
        let field = self.take_string(sink).unwrap_or_default();
        self.expect_lpar(sink);
        let (name, descriptor) = match self.cur.kind {
            TokenKind::Keyword("func") => {
                self.advance(sink);
                let name = self.take_id(sink);
                (name, ImportDescriptor::Function(self.parse_type_use(sink)))
            }
            TokenKind::Keyword("table") => {
                self.advance(sink);
                let name = self.take_id(sink);
                let limits = self.parse_limits(sink);
                let reftype = self.parse_ref_type(sink);
                (
                    name,
                    ImportDescriptor::Table(TableType { reftype, limits }),
                )
            }
            TokenKind::Keyword("memory") => {
                self.advance(sink);
                let name = self.take_id(sink);
                (name, ImportDescriptor::Memory(self.parse_limits(sink)))
            }
            TokenKind::Keyword("global") => {
                self.advance(sink);
                let name = self.take_id(sink);
                (name, ImportDescriptor::Global(self.parse_global_type(sink)))
            }
            _ => {
                sink.report(self.offset(), Error::BadString);
                (None, ImportDescriptor::Function(TypeUse::default()))
            }
        };
        self.expect_rpar(sink);
        Import {
            module,
            field,
            name,
            descriptor,
        }
    }

    fn parse_limits(&mut self, sink: &mut ErrorSink) -> Limits {
        let min = self.parse_int_literal(sink) as u32;
        let max = if matches!(self.cur.kind, TokenKind::Nat(_)) {
            Some(self.parse_int_literal(sink) as u32)
        } else {
            None
        };
        Limits { min, max }
    }

    fn parse_ref_type(&mut self, sink: &mut ErrorSink) -> RefType {
        if let TokenKind::Keyword(word) = self.cur.kind {
            let heap = match word {
                "funcref" | "func" => Some(HeapType::Func),
                "externref" | "extern" => Some(HeapType::Extern),
                _ => None,
            };
            if let Some(heap) = heap {
                self.advance(sink);
                return RefType {
                    nullable: true,
                    heap,
                };
            }
        }
        RefType::FUNCREF
    }

    fn parse_global_type(&mut self, sink: &mut ErrorSink) -> GlobalType {
        if self.take_keyword("mut", sink) {
            // shouldn't normally be bare, but tolerate "(mut ty)" handled below
        }
        if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("mut", sink) {
                let value = self.parse_value_type_token(sink).unwrap_or(ValType::I32);
                self.expect_rpar(sink);
                return GlobalType {
                    value,
                    mutable: true,
                };
            }
            self.cur = checkpoint;
        }
        let value = self.parse_value_type_token(sink).unwrap_or(ValType::I32);
        GlobalType {
            value,
            mutable: false,
        }
    }

    fn parse_table(&mut self, sink: &mut ErrorSink) -> Table {
        self.advance(sink); // "table"
        let name = self.take_id(sink);
        let (inline_import, inline_exports) = self.parse_inline_import_export(sink);
        // Inline element-list form: `(table reftype (elem var*))`.
        if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("elem", sink) {
                let reftype = self.parse_ref_type(sink);
                let mut items = Vec::new();
                while let Some(v) = self.take_var(sink) {
                    items.push(v);
                }
                self.expect_rpar(sink);
                return Table {
                    name,
                    ty: TableType {
                        reftype,
                        limits: Limits {
                            min: items.len() as u32,
                            max: Some(items.len() as u32),
                        },
                    },
                    inline_import,
                    inline_exports,
                    inline_elements: Some(items),
                };
            }
            self.cur = checkpoint;
        }
        let limits = self.parse_limits(sink);
        let reftype = self.parse_ref_type(sink);
        Table {
            name,
            ty: TableType { reftype, limits },
            inline_import,
            inline_exports,
            inline_elements: None,
        }
    }

    fn parse_memory(&mut self, sink: &mut ErrorSink) -> Memory {
        self.advance(sink); // "memory"
        let name = self.take_id(sink);
        let (inline_import, inline_exports) = self.parse_inline_import_export(sink);
        if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("data", sink) {
                let mut bytes = Vec::new();
                while let TokenKind::String(literal) = self.cur.kind {
                    bytes.extend(decode_string(literal, sink));
                    self.advance(sink);
                }
                self.expect_rpar(sink);
                let pages = (bytes.len() as u32).div_ceil(crate::types::MemType::PAGE_SIZE as u32);
                return Memory {
                    name,
                    limits: Limits {
                        min: pages,
                        max: Some(pages),
                    },
                    inline_import,
                    inline_exports,
                    inline_data: Some(bytes),
                };
            }
            self.cur = checkpoint;
        }
        let limits = self.parse_limits(sink);
        Memory {
            name,
            limits,
            inline_import,
            inline_exports,
            inline_data: None,
        }
    }

    fn parse_global(&mut self, sink: &mut ErrorSink) -> Global {
        self.advance(sink); // "global"
        let name = self.take_id(sink);
        let (inline_import, inline_exports) = self.parse_inline_import_export(sink);
        let ty = self.parse_global_type(sink);
        let init = self.parse_instructions(sink);
        Global {
            name,
            ty,
            init,
            inline_import,
            inline_exports,
        }
    }

    fn parse_export(&mut self, sink: &mut ErrorSink) -> Export {
        self.advance(sink); // "export"
        let name = self.take_string(sink).unwrap_or_default();
        self.expect_lpar(sink);
        let kind = match self.cur.kind {
            TokenKind::Keyword("func") => ExternalKind::Function,
            TokenKind::Keyword("table") => ExternalKind::Table,
            TokenKind::Keyword("memory") => ExternalKind::Memory,
            TokenKind::Keyword("global") => ExternalKind::Global,
            _ => ExternalKind::Function,
        };
        self.advance(sink);
        let index = self.take_var(sink).unwrap_or(At::new(0..0, Var::Index(0)));
        self.expect_rpar(sink);
        Export { name, kind, index }
    }

    fn parse_elem(&mut self, sink: &mut ErrorSink) -> ElementSegment {
        self.advance(sink); // "elem"
        let name = self.take_id(sink);
        let mut mode = ElementModeText::Active;
        let mut table = None;
        if self.take_keyword("declare", sink) {
            mode = ElementModeText::Declarative;
        }
        if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("table", sink) {
                table = self.take_var(sink);
                self.expect_rpar(sink);
            } else {
                self.cur = checkpoint;
            }
        }
        let offset = if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("offset", sink) {
                let instrs = self.parse_instructions(sink);
                self.expect_rpar(sink);
                Some(instrs)
            } else {
                // `(elem (i32.const 0) ...)`: the `offset` keyword is
                // optional, the bare folded expression stands for it.
                self.cur = checkpoint;
                let mut instrs = Vec::new();
                self.parse_folded_instr(&mut instrs, sink);
                Some(instrs)
            }
        } else {
            None
        };
        if offset.is_none() && !matches!(mode, ElementModeText::Declarative) {
            if self.take_keyword("func", sink) || self.peek_keyword("func") {
                // Parsed below via the generic ref-list path; `func` just tags funcref.
            } else if !self.peek_keyword("func") && table.is_none() && offset.is_none() {
                // No explicit offset/table keyword at all: passive segment.
                mode = ElementModeText::Passive;
            }
        }
        self.take_keyword("func", sink);
        let mut items = Vec::new();
        while let Some(v) = self.take_var(sink) {
            items.push(v);
        }
        ElementSegment {
            name,
            table,
            offset,
            mode,
            items,
        }
    }

    fn parse_data(&mut self, sink: &mut ErrorSink) -> DataSegment {
        self.advance(sink); // "data"
        let name = self.take_id(sink);
        let mut memory = None;
        if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("memory", sink) {
                memory = self.take_var(sink);
                self.expect_rpar(sink);
            } else {
                self.cur = checkpoint;
            }
        }
        let offset = if self.cur.kind == TokenKind::LPar {
            let checkpoint = self.cur;
            self.advance(sink);
            if self.take_keyword("offset", sink) {
                let instrs = self.parse_instructions(sink);
                self.expect_rpar(sink);
                Some(instrs)
            } else {
                self.cur = checkpoint;
                None
            }
        } else {
            None
        };
        let mut bytes = Vec::new();
        while let TokenKind::String(literal) = self.cur.kind {
            bytes.extend(decode_string(literal, sink));
            self.advance(sink);
        }
        DataSegment {
            name,
            memory,
            offset,
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_module() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new("(module)", &mut sink);
        let module = parser.parse_module(&mut sink);
        assert!(module.items.is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn parses_a_function_with_inline_export_and_linear_body() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new(
            "(module (func $f (export \"f\") (result i32) i32.const 42))",
            &mut sink,
        );
        let module = parser.parse_module(&mut sink);
        assert_eq!(module.items.len(), 1);
        let ModuleItem::Function(f) = &module.items[0] else {
            panic!("expected function");
        };
        assert_eq!(f.inline_exports.len(), 1);
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn parses_folded_instructions_into_linear_order() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new(
            "(module (func (result i32) (i32.add (i32.const 1) (i32.const 2))))",
            &mut sink,
        );
        let module = parser.parse_module(&mut sink);
        let ModuleItem::Function(f) = &module.items[0] else {
            panic!("expected function");
        };
        assert_eq!(f.body.len(), 3);
        assert_eq!(f.body[0].opcode, "i32.const");
        assert_eq!(f.body[1].opcode, "i32.const");
        assert_eq!(f.body[2].opcode, "i32.add");
    }
}
