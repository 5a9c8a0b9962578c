//! Runtime support for runic evaluators.
//!
//! Both the interpreter and the code emitted by `runic-codegen` go through
//! this crate for every access to the target: a bounded random-access
//! reader, the flag-driven string matcher, and the bounded substring
//! search. Keeping the primitives here is what lets the two back-ends
//! share one set of semantics.

pub mod merge;
pub mod reader;
pub mod search;
pub mod string;

pub use merge::merge_descriptions;
pub use reader::{Endian, SliceReader};
pub use search::search_test;
pub use string::{
    string_test, StringFlags, COMPACT_WHITESPACE, FORCE_BINARY, FORCE_TEXT, LOWER_MATCHES_BOTH,
    OPTIONAL_BLANKS, UPPER_MATCHES_BOTH,
};
