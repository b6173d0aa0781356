// Copyright (c) 2025 wazm contributors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The feature-flag bitset (C2, §9 "Feature flags"). Checked at opcode-decode
//! time, value-type-decode time, and reference-type-decode time: an opcode or
//! keyword gated by a disabled feature is treated as unknown/reserved rather
//! than as a distinguished "feature disabled" parse error at the token level.

use bitflags::bitflags;

bitflags! {
    /// A per-context set of enabled WebAssembly proposal extensions.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Features: u32 {
        const SIMD                   = 1 << 0;
        const THREADS                = 1 << 1;
        const BULK_MEMORY            = 1 << 2;
        const REFERENCE_TYPES        = 1 << 3;
        const EXCEPTIONS             = 1 << 4;
        const TAIL_CALL              = 1 << 5;
        const FUNCTION_REFERENCES    = 1 << 6;
        const GC                     = 1 << 7;
        const SIGN_EXTENSION         = 1 << 8;
        const SATURATING_FLOAT_TO_INT = 1 << 9;
        const MULTI_VALUE            = 1 << 10;
    }
}

impl Features {
    /// No proposals beyond the WebAssembly 1.0 MVP.
    pub const MVP: Features = Features::empty();

    /// Every proposal this crate understands.
    pub fn all_known() -> Features {
        Features::all()
    }

    pub fn name(self) -> &'static str {
        match self {
            Features::SIMD => "simd",
            Features::THREADS => "threads",
            Features::BULK_MEMORY => "bulk-memory",
            Features::REFERENCE_TYPES => "reference-types",
            Features::EXCEPTIONS => "exceptions",
            Features::TAIL_CALL => "tail-call",
            Features::FUNCTION_REFERENCES => "function-references",
            Features::GC => "gc",
            Features::SIGN_EXTENSION => "sign-extension",
            Features::SATURATING_FLOAT_TO_INT => "saturating-float-to-int",
            Features::MULTI_VALUE => "multi-value",
            _ => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mvp_has_no_proposals_enabled() {
        assert!(!Features::MVP.contains(Features::SIMD));
        assert!(!Features::MVP.contains(Features::REFERENCE_TYPES));
    }

    #[test]
    fn enabling_a_feature_is_observable() {
        let features = Features::SIMD | Features::BULK_MEMORY;
        assert!(features.contains(Features::SIMD));
        assert!(!features.contains(Features::THREADS));
    }
}
