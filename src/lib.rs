// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A lazy WebAssembly binary decoder, a `.wat` text tokenizer/parser, a
//! name-resolution pass, a desugaring pass, and a binary-to-text converter.
//!
//! The binary decoder never copies: every decoded entity borrows sub-slices
//! of the input buffer it was given. Decoding a module is forward-only and
//! lazy — sections and their elements are produced on demand by iterators
//! that hold onto a remaining span, not by building an owned tree up front.

pub mod convert;
pub mod error;
pub mod features;
pub mod leb128;
pub mod types;

pub mod binary;
pub mod text;

pub use error::{Diagnostic, Error, ErrorSink};
pub use features::Features;
