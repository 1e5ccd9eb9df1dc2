//! Query interpretation: classifies raw query text and normalizes it into an
//! [`Invocation`] the store can execute.

mod literal;
mod parse;
mod types;

pub use literal::{LiteralError, parse_arguments, parse_value};
pub use parse::{classify, interpret, split_call_chain, strip_terminator};
pub use types::{
    CURSOR_MODIFIERS, CallSegment, DEFAULT_COLLECTION, FindSpec, Invocation, JsonDescriptor,
    QueryShape, SUPPORTED_METHODS,
};
