//! Formula language for computed columns.
//!
//! # Responsibility
//! - Parse author formulas into an expression tree.
//! - Convert between author-facing and canonical formula forms.
//! - Evaluate canonical formulas per row.

pub mod eval;
pub mod parser;

pub use eval::{
    canonicalize_formula, display_formula, formula_references, CompiledFormula, EvalError,
    X_PLACEHOLDER,
};
pub use parser::{parse_formula, BinaryOp, Expr, FormulaError, UnaryOp};
