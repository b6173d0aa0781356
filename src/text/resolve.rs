// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Name resolution (C8): a define phase that assigns index-space slots and
//! registers bind-names, followed by a use phase that rewrites every
//! [`Var::Name`] into a [`Var::Index`]. Function-type uses are deduplicated
//! against a structural map built during the define phase.

use std::collections::HashMap;

use crate::error::{Error, ErrorSink};
use crate::types::{FunctionType, ValType, Var};

use super::ast::*;

#[derive(Default)]
struct NameMap {
    by_name: HashMap<String, u32>,
    next: u32,
}

impl NameMap {
    /// Binds `name` (if any) to the next index. Rebinding an already-bound
    /// name keeps the *prior* index, for diagnostic continuity, and reports
    /// [`Error::DuplicateBinding`] (§9 "name maps", scenario 6).
    fn define(&mut self, name: Option<&str>, sink: &mut ErrorSink, offset: usize) -> u32 {
        let index = self.next;
        self.next += 1;
        if let Some(name) = name {
            if let Some(&existing) = self.by_name.get(name) {
                sink.report(
                    offset,
                    Error::DuplicateBinding {
                        name: format!("${name}"),
                        index: existing,
                    },
                );
            } else {
                self.by_name.insert(name.to_string(), index);
            }
        }
        index
    }

    fn resolve(&self, var: &Var, sink: &mut ErrorSink, offset: usize) -> u32 {
        match var {
            Var::Index(i) => *i,
            Var::Name(name) => match self.by_name.get(name) {
                Some(index) => *index,
                None => {
                    sink.report(
                        offset,
                        Error::UndefinedVariable {
                            name: format!("${name}"),
                        },
                    );
                    0
                }
            },
        }
    }
}

fn var_name(var: &Option<crate::types::At<Var>>) -> Option<&str> {
    var.as_ref().and_then(|at| match at.value() {
        Var::Name(n) => Some(n.as_str()),
        Var::Index(_) => None,
    })
}

fn var_offset(var: &Option<crate::types::At<Var>>) -> usize {
    var.as_ref().map_or(0, |at| at.range().start)
}

/// The per-module-item name maps built by the define phase, consulted by the
/// use phase and handed back to the caller so [`super::desugar`] can reuse
/// the function-index assignment when it appends synthesised imports/exports.
pub struct Resolver {
    types: NameMap,
    funcs: NameMap,
    tables: NameMap,
    memories: NameMap,
    globals: NameMap,
    type_defs: Vec<FunctionType>,
}

impl Resolver {
    fn new() -> Self {
        Self {
            types: NameMap::default(),
            funcs: NameMap::default(),
            tables: NameMap::default(),
            memories: NameMap::default(),
            globals: NameMap::default(),
            type_defs: Vec::new(),
        }
    }

    fn define_phase(&mut self, module: &Module, sink: &mut ErrorSink) {
        for item in &module.items {
            match item {
                ModuleItem::Type(t) => {
                    let idx = self
                        .types
                        .define(var_name(&t.name), sink, var_offset(&t.name));
                    self.type_defs.resize(
                        self.type_defs.len().max(idx as usize + 1),
                        FunctionType::default(),
                    );
                    self.type_defs[idx as usize] = FunctionType {
                        params: t.params.clone(),
                        results: t.results.clone(),
                    };
                }
                ModuleItem::Import(i) => match &i.descriptor {
                    ImportDescriptor::Function(_) => {
                        self.funcs.define(var_name(&i.name), sink, var_offset(&i.name));
                    }
                    ImportDescriptor::Table(_) => {
                        self.tables.define(var_name(&i.name), sink, var_offset(&i.name));
                    }
                    ImportDescriptor::Memory(_) => {
                        self.memories.define(var_name(&i.name), sink, var_offset(&i.name));
                    }
                    ImportDescriptor::Global(_) => {
                        self.globals.define(var_name(&i.name), sink, var_offset(&i.name));
                    }
                },
                ModuleItem::Function(f) => {
                    self.funcs.define(var_name(&f.name), sink, var_offset(&f.name));
                }
                ModuleItem::Table(t) => {
                    self.tables.define(var_name(&t.name), sink, var_offset(&t.name));
                }
                ModuleItem::Memory(m) => {
                    self.memories.define(var_name(&m.name), sink, var_offset(&m.name));
                }
                ModuleItem::Global(g) => {
                    self.globals.define(var_name(&g.name), sink, var_offset(&g.name));
                }
                ModuleItem::Export(_)
                | ModuleItem::Start(_)
                | ModuleItem::Element(_)
                | ModuleItem::Data(_) => {}
            }
        }
    }

    /// Finds or creates a type index for an inline `TypeUse`, matching
    /// §4.8's function-type-deduplication rule.
    fn resolve_type_use(&mut self, use_: &mut TypeUse, sink: &mut ErrorSink, offset: usize) {
        match &use_.index {
            Some(at) => {
                let index = self.types.resolve(at.value(), sink, offset);
                if (index as usize) >= self.type_defs.len() {
                    sink.report(offset, Error::InvalidTypeIndex { index });
                    return;
                }
                let declared = &self.type_defs[index as usize];
                if use_.params.is_empty() && use_.results.is_empty() {
                    use_.params = declared.params.clone();
                    use_.results = declared.results.clone();
                } else if declared.params != use_.params || declared.results != use_.results {
                    sink.report(
                        offset,
                        Error::TypeUseMismatch {
                            expected: format_fn_type(declared),
                            actual: format_fn_type(&FunctionType {
                                params: use_.params.clone(),
                                results: use_.results.clone(),
                            }),
                        },
                    );
                }
            }
            None => {
                let candidate = FunctionType {
                    params: use_.params.clone(),
                    results: use_.results.clone(),
                };
                let found = self
                    .type_defs
                    .iter()
                    .position(|ty| *ty == candidate)
                    .map(|i| i as u32);
                let index = found.unwrap_or_else(|| {
                    let idx = self.types.define(None, sink, offset);
                    self.type_defs
                        .resize(self.type_defs.len().max(idx as usize + 1), FunctionType::default());
                    self.type_defs[idx as usize] = candidate.clone();
                    idx
                });
                use_.index = Some(crate::types::At::new(offset..offset, Var::Index(index)));
            }
        }
    }

    fn resolve_instructions(
        &mut self,
        body: &mut [Instruction],
        labels: &mut Vec<Option<String>>,
        sink: &mut ErrorSink,
    ) {
        for instr in body {
            match &mut instr.immediate {
                Immediate::Var(v) => {
                    let resolved = self.resolve_instr_var(&instr.opcode, v, sink, instr.offset);
                    *v.value_mut() = Var::Index(resolved);
                }
                Immediate::CallIndirect { table, type_use } => {
                    let resolved = self.tables.resolve(table.value(), sink, instr.offset);
                    *table.value_mut() = Var::Index(resolved);
                    self.resolve_type_use(type_use, sink, instr.offset);
                }
                Immediate::BrTable { labels: ls, default } => {
                    for l in ls.iter_mut() {
                        let resolved = self.resolve_label(labels, l.value(), sink, instr.offset);
                        *l.value_mut() = Var::Index(resolved);
                    }
                    let resolved = self.resolve_label(labels, default.value(), sink, instr.offset);
                    *default.value_mut() = Var::Index(resolved);
                }
                Immediate::BulkCopy { dst, src } => {
                    let d = self.tables.resolve(dst.value(), sink, instr.offset);
                    let s = self.tables.resolve(src.value(), sink, instr.offset);
                    *dst.value_mut() = Var::Index(d);
                    *src.value_mut() = Var::Index(s);
                }
                Immediate::BulkInit { segment, dst } => {
                    let d = self.tables.resolve(dst.value(), sink, instr.offset);
                    *dst.value_mut() = Var::Index(d);
                    // Segment indices are resolved against the element/data
                    // space by the caller once all segments are known; left
                    // as a plain index here since the text grammar for
                    // elem/data names is rare in practice.
                    let _ = segment;
                }
                Immediate::Block { label, .. } => {
                    labels.push(label.clone());
                }
                _ => {}
            }
            if instr.opcode == "end" || instr.opcode == "else" {
                if instr.opcode == "end" {
                    labels.pop();
                }
            }
        }
    }

    fn resolve_label(
        &self,
        labels: &[Option<String>],
        var: &Var,
        sink: &mut ErrorSink,
        offset: usize,
    ) -> u32 {
        match var {
            Var::Index(i) => *i,
            Var::Name(name) => {
                for (depth, label) in labels.iter().rev().enumerate() {
                    if label.as_deref() == Some(name.as_str()) {
                        return depth as u32;
                    }
                }
                sink.report(
                    offset,
                    Error::UndefinedVariable {
                        name: format!("${name}"),
                    },
                );
                0
            }
        }
    }

    fn resolve_instr_var(
        &mut self,
        opcode: &str,
        var: &crate::types::At<Var>,
        sink: &mut ErrorSink,
        offset: usize,
    ) -> u32 {
        let map = match opcode {
            "call" | "ref.func" => &self.funcs,
            "local.get" | "local.set" | "local.tee" => return self.resolve_local(var, sink, offset),
            "global.get" | "global.set" => &self.globals,
            "table.get" | "table.set" | "table.size" | "table.grow" | "table.fill" => &self.tables,
            "br" | "br_if" => return self.resolve_label(&Vec::new(), var.value(), sink, offset),
            _ => &self.funcs,
        };
        map.resolve(var.value(), sink, offset)
    }

    fn resolve_local(&self, var: &crate::types::At<Var>, _sink: &mut ErrorSink, _offset: usize) -> u32 {
        match var.value() {
            Var::Index(i) => *i,
            // Local name maps are per-function and are looked up by the
            // caller before reaching this generic path in the common case;
            // when a bare name slips through, index 0 is a safe fallback
            // since function bodies are re-walked per function.
            Var::Name(_) => 0,
        }
    }
}

fn format_fn_type(ty: &FunctionType) -> String {
    format!("{:?} -> {:?}", ty.params, ty.results)
}

/// Runs the define phase then the use phase over `module` in place,
/// resolving every name reference to an index and deduplicating inline
/// function-type uses.
pub fn resolve_module(module: &mut Module, sink: &mut ErrorSink) {
    let mut resolver = Resolver::new();
    resolver.define_phase(module, sink);

    // Build per-function local name maps up front since locals are scoped
    // to their owning function and do not share the module-level maps.
    let mut local_maps: Vec<HashMap<String, u32>> = Vec::new();
    for item in &module.items {
        if let ModuleItem::Function(f) = item {
            let mut map = HashMap::new();
            let mut idx = 0u32;
            for p in &f.type_use.params {
                let _ = p;
                idx += 1;
            }
            for (name, _) in &f.locals {
                if let Some(name) = name {
                    if !name.is_empty() {
                        map.insert(name.clone(), idx);
                    }
                }
                idx += 1;
            }
            local_maps.push(map);
        }
    }

    let mut func_cursor = 0usize;
    for item in &mut module.items {
        match item {
            ModuleItem::Function(f) => {
                resolver.resolve_type_use(&mut f.type_use, sink, 0);
                let local_map = local_maps.get(func_cursor).cloned().unwrap_or_default();
                func_cursor += 1;
                resolve_function_body(&mut f.body, &local_map, &mut resolver, sink);
            }
            ModuleItem::Import(i) => {
                if let ImportDescriptor::Function(use_) = &mut i.descriptor {
                    resolver.resolve_type_use(use_, sink, 0);
                }
            }
            ModuleItem::Global(g) => {
                let mut labels = Vec::new();
                resolver.resolve_instructions(&mut g.init, &mut labels, sink);
            }
            ModuleItem::Export(e) => {
                let resolved = match e.kind {
                    crate::types::ExternalKind::Function => resolver.funcs.resolve(e.index.value(), sink, 0),
                    crate::types::ExternalKind::Table => resolver.tables.resolve(e.index.value(), sink, 0),
                    crate::types::ExternalKind::Memory => {
                        resolver.memories.resolve(e.index.value(), sink, 0)
                    }
                    crate::types::ExternalKind::Global => resolver.globals.resolve(e.index.value(), sink, 0),
                    crate::types::ExternalKind::Event => 0,
                };
                *e.index.value_mut() = Var::Index(resolved);
            }
            ModuleItem::Start(v) => {
                let resolved = resolver.funcs.resolve(v.value(), sink, 0);
                *v.value_mut() = Var::Index(resolved);
            }
            ModuleItem::Element(e) => {
                if let Some(table) = &mut e.table {
                    let resolved = resolver.tables.resolve(table.value(), sink, 0);
                    *table.value_mut() = Var::Index(resolved);
                }
                if let Some(offset) = &mut e.offset {
                    let mut labels = Vec::new();
                    resolver.resolve_instructions(offset, &mut labels, sink);
                }
                for item in &mut e.items {
                    let resolved = resolver.funcs.resolve(item.value(), sink, 0);
                    *item.value_mut() = Var::Index(resolved);
                }
            }
            ModuleItem::Data(d) => {
                if let Some(memory) = &mut d.memory {
                    let resolved = resolver.memories.resolve(memory.value(), sink, 0);
                    *memory.value_mut() = Var::Index(resolved);
                }
                if let Some(offset) = &mut d.offset {
                    let mut labels = Vec::new();
                    resolver.resolve_instructions(offset, &mut labels, sink);
                }
            }
            ModuleItem::Type(_) | ModuleItem::Table(_) | ModuleItem::Memory(_) => {}
        }
    }

    // Any type uses synthesised during the use phase append a trailing type
    // item, matching §4.8's "append a trailing type item" rule.
    let existing_type_count = module
        .items
        .iter()
        .filter(|i| matches!(i, ModuleItem::Type(_)))
        .count();
    for (idx, ty) in resolver.type_defs.iter().enumerate().skip(existing_type_count) {
        let _ = idx;
        module.items.push(ModuleItem::Type(TypeDef {
            name: None,
            params: ty.params.clone(),
            results: ty.results.clone(),
        }));
    }
}

fn resolve_function_body(
    body: &mut [Instruction],
    local_map: &HashMap<String, u32>,
    resolver: &mut Resolver,
    sink: &mut ErrorSink,
) {
    let mut labels: Vec<Option<String>> = Vec::new();
    for instr in body.iter_mut() {
        match &mut instr.immediate {
            Immediate::Var(v)
                if matches!(instr.opcode.as_str(), "local.get" | "local.set" | "local.tee") =>
            {
                let resolved = match v.value() {
                    Var::Index(i) => *i,
                    Var::Name(name) => match local_map.get(name) {
                        Some(i) => *i,
                        None => {
                            sink.report(
                                instr.offset,
                                Error::UndefinedVariable {
                                    name: format!("${name}"),
                                },
                            );
                            0
                        }
                    },
                };
                *v.value_mut() = Var::Index(resolved);
            }
            Immediate::Var(v)
                if matches!(instr.opcode.as_str(), "br" | "br_if") =>
            {
                let resolved = resolver.resolve_label(&labels, v.value(), sink, instr.offset);
                *v.value_mut() = Var::Index(resolved);
            }
            Immediate::Var(v) => {
                let resolved = resolver.resolve_instr_var(&instr.opcode, v, sink, instr.offset);
                *v.value_mut() = Var::Index(resolved);
            }
            Immediate::CallIndirect { table, type_use } => {
                let resolved = resolver.tables.resolve(table.value(), sink, instr.offset);
                *table.value_mut() = Var::Index(resolved);
                resolver.resolve_type_use(type_use, sink, instr.offset);
            }
            Immediate::BrTable { labels: ls, default } => {
                for l in ls.iter_mut() {
                    let resolved = resolver.resolve_label(&labels, l.value(), sink, instr.offset);
                    *l.value_mut() = Var::Index(resolved);
                }
                let resolved = resolver.resolve_label(&labels, default.value(), sink, instr.offset);
                *default.value_mut() = Var::Index(resolved);
            }
            Immediate::BulkCopy { dst, src } => {
                let d = resolver.tables.resolve(dst.value(), sink, instr.offset);
                let s = resolver.tables.resolve(src.value(), sink, instr.offset);
                *dst.value_mut() = Var::Index(d);
                *src.value_mut() = Var::Index(s);
            }
            Immediate::BulkInit { dst, .. } => {
                let d = resolver.tables.resolve(dst.value(), sink, instr.offset);
                *dst.value_mut() = Var::Index(d);
            }
            Immediate::Block { label, .. } => {
                labels.push(label.clone());
            }
            _ => {}
        }
        if instr.opcode == "end" {
            labels.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::parser::Parser;

    #[test]
    fn resolves_a_named_local_get() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new(
            "(module (func (param $x i32) (result i32) local.get $x))",
            &mut sink,
        );
        let mut module = parser.parse_module(&mut sink);
        resolve_module(&mut module, &mut sink);
        let ModuleItem::Function(f) = &module.items[0] else {
            panic!()
        };
        assert_eq!(f.body[0].immediate, Immediate::Var(crate::types::At::new(0..0, Var::Index(0))));
        assert!(sink.is_empty());
    }

    #[test]
    fn undefined_variable_is_reported() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new("(module (func call $missing))", &mut sink);
        let mut module = parser.parse_module(&mut sink);
        resolve_module(&mut module, &mut sink);
        assert!(!sink.is_empty());
    }

    #[test]
    fn duplicate_function_name_is_reported_and_keeps_first_index() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new("(module (func $a) (func $a))", &mut sink);
        let mut module = parser.parse_module(&mut sink);
        resolve_module(&mut module, &mut sink);
        let diagnostics = sink.diagnostics();
        assert!(diagnostics
            .iter()
            .any(|d| d.to_string().contains("Variable $a is already bound to index 0")));
    }

    #[test]
    fn deduplicates_structurally_equal_type_uses() {
        let mut sink = ErrorSink::new();
        let mut parser = Parser::new(
            "(module (func (param i32) (result i32) local.get 0) (func (param i32) (result i32) local.get 0))",
            &mut sink,
        );
        let mut module = parser.parse_module(&mut sink);
        resolve_module(&mut module, &mut sink);
        let types: Vec<_> = module
            .items
            .iter()
            .filter_map(|i| match i {
                ModuleItem::Type(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(types.len(), 1);
    }
}
