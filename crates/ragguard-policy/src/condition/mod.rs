//! Access-control condition language.
//!
//! Conditions are written as small boolean expressions over `user.*` and
//! `document.*` fields:
//!
//! ```text
//! user.department == document.department
//! document.category in ['public', 'internal']
//! document.reviewed_by exists AND document.level <= user.clearance
//! ```
//!
//! Each condition is tokenized and parsed exactly once, when its policy is
//! compiled. Field paths are pre-split so evaluation performs no string work.

pub mod ast;
mod lexer;
pub mod parser;

pub use ast::{CompareOp, CompiledCondition, Expr, FieldPath, Operand, Scope, compare};
pub use parser::compile_condition;
