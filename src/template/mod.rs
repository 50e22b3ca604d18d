//! Template engine for `$variable` and `${function(args)}` tokens.
//!
//! - `literal` - argument text to scalar coercion
//! - `extract` - token scanning
//! - `call` - call text parsing
//! - `resolve` - evaluation against a binding scope

pub mod call;
pub mod extract;
pub mod literal;
pub mod resolve;

pub use call::{parse_function, FunctionCall};
pub use extract::{extract_functions, extract_variables, has_tokens};
pub use literal::coerce;
pub use resolve::{eval_functions_only, resolve, resolve_str, substitute_tokens};
