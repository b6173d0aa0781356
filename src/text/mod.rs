// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The text-format pipeline (C6-C9): tokenize, parse, resolve names, then
//! desugar. [`parse_and_resolve`] runs all four stages and returns a module
//! in canonical form, matching the shape a binary-decoded module has.

pub mod ast;
pub mod desugar;
pub mod parser;
pub mod resolve;
pub mod token;

use crate::error::ErrorSink;
use ast::Module;

/// Runs the full text pipeline over `src`: tokenize, parse (C7), resolve
/// names (C8), desugar (C9). Diagnostics from every stage accumulate in
/// `sink`; the returned module is always fully formed, even if some names
/// failed to resolve (unresolved `Var`s are left as index `0`, per C11's
/// "collect diagnostics, keep going" discipline).
pub fn parse_and_resolve(src: &str, sink: &mut ErrorSink) -> Module {
    let mut parser = parser::Parser::new(src, sink);
    let mut module = parser.parse_module(sink);
    resolve::resolve_module(&mut module, sink);
    desugar::desugar_module(&mut module);
    module
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_parses_resolves_and_desugars() {
        let mut sink = ErrorSink::new();
        let module = parse_and_resolve(
            r#"(module
                (func $add (export "add") (param $a i32) (param $b i32) (result i32)
                    local.get $a
                    local.get $b
                    i32.add))"#,
            &mut sink,
        );
        assert!(sink.is_empty());
        let has_export = module
            .items
            .iter()
            .any(|i| matches!(i, ast::ModuleItem::Export(_)));
        assert!(has_export);
    }
}
