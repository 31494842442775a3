//! Formula evaluation and canonical/display form conversion.
//!
//! # Responsibility
//! - Evaluate parsed formulas against a variable lookup.
//! - Convert between author-facing formulas (first column by name) and
//!   canonical formulas (first column as `X_PLACEHOLDER`).
//! - Compute one computed-column cell from a first-column cell.
//!
//! # Invariants
//! - Per-cell evaluation never fails: errors become `CellValue::Error`.
//! - Empty first-column cells produce empty computed cells.

use crate::formula::parser::{parse_formula, BinaryOp, Expr, UnaryOp};
use crate::model::value::CellValue;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Synthetic variable standing for "the first column's value".
pub const X_PLACEHOLDER: &str = "__x__";

/// Evaluation failure for one parsed formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    UnknownVariable(String),
    WrongArity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    UnknownFunction(String),
}

impl Display for EvalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownVariable(name) => write!(f, "unknown variable: {name}"),
            Self::WrongArity {
                name,
                expected,
                got,
            } => write!(f, "function `{name}` expects {expected} argument(s), got {got}"),
            Self::UnknownFunction(name) => write!(f, "unknown function: {name}"),
        }
    }
}

impl Error for EvalError {}

impl Expr {
    /// Evaluates this expression. Variables resolve through `lookup` first,
    /// then through the constants `PI` and `E`.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, EvalError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Variable(name) => lookup(name)
                .or_else(|| constant(name))
                .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
            Self::Unary { op, operand } => {
                let value = operand.evaluate(lookup)?;
                Ok(match op {
                    UnaryOp::Plus => value,
                    UnaryOp::Minus => -value,
                })
            }
            Self::Binary { op, left, right } => {
                let lhs = left.evaluate(lookup)?;
                let rhs = right.evaluate(lookup)?;
                Ok(match op {
                    BinaryOp::Add => lhs + rhs,
                    BinaryOp::Sub => lhs - rhs,
                    BinaryOp::Mul => lhs * rhs,
                    BinaryOp::Div => lhs / rhs,
                    BinaryOp::Rem => lhs % rhs,
                    BinaryOp::Pow => lhs.powf(rhs),
                })
            }
            Self::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(lookup))
                    .collect::<Result<Vec<_>, _>>()?;
                call_function(name, &values)
            }
        }
    }

    /// Returns referenced variable names in first-occurrence order.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Self::Unary { operand, .. } => operand.collect_variables(names),
            Self::Binary { left, right, .. } => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(names);
                }
            }
        }
    }

    /// Returns a copy with every variable named `from` renamed to `to`.
    pub fn substitute(&self, from: &str, to: &str) -> Expr {
        match self {
            Self::Variable(name) if name == from => Self::Variable(to.to_string()),
            Self::Number(_) | Self::Variable(_) => self.clone(),
            Self::Unary { op, operand } => Self::Unary {
                op: *op,
                operand: Box::new(operand.substitute(from, to)),
            },
            Self::Binary { op, left, right } => Self::Binary {
                op: *op,
                left: Box::new(left.substitute(from, to)),
                right: Box::new(right.substitute(from, to)),
            },
            Self::Call { name, args } => Self::Call {
                name: name.clone(),
                args: args.iter().map(|arg| arg.substitute(from, to)).collect(),
            },
        }
    }

    fn render(&self, out: &mut String, nested: bool) {
        match self {
            Self::Number(value) => out.push_str(&value.to_string()),
            Self::Variable(name) => out.push_str(name),
            Self::Unary { op, operand } => {
                out.push(match op {
                    UnaryOp::Plus => '+',
                    UnaryOp::Minus => '-',
                });
                operand.render(out, true);
            }
            Self::Binary { op, left, right } => {
                if nested {
                    out.push('(');
                }
                left.render(out, true);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                right.render(out, true);
                if nested {
                    out.push(')');
                }
            }
            Self::Call { name, args } => {
                out.push_str(name);
                out.push('(');
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    arg.render(out, false);
                }
                out.push(')');
            }
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        self.render(&mut out, false);
        f.write_str(&out)
    }
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "PI" => Some(std::f64::consts::PI),
        "E" => Some(std::f64::consts::E),
        _ => None,
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, EvalError> {
    let unary = |f: fn(f64) -> f64| -> Result<f64, EvalError> {
        match args {
            [value] => Ok(f(*value)),
            _ => Err(EvalError::WrongArity {
                name: name.to_string(),
                expected: "1",
                got: args.len(),
            }),
        }
    };
    let binary = |f: fn(f64, f64) -> f64| -> Result<f64, EvalError> {
        match args {
            [a, b] => Ok(f(*a, *b)),
            _ => Err(EvalError::WrongArity {
                name: name.to_string(),
                expected: "2",
                got: args.len(),
            }),
        }
    };
    match name {
        "abs" => unary(f64::abs),
        "sqrt" => unary(f64::sqrt),
        "cbrt" => unary(f64::cbrt),
        "exp" => unary(f64::exp),
        "ln" | "log" => unary(f64::ln),
        "log10" => unary(f64::log10),
        "log2" => unary(f64::log2),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "asin" => unary(f64::asin),
        "acos" => unary(f64::acos),
        "atan" => unary(f64::atan),
        "sinh" => unary(f64::sinh),
        "cosh" => unary(f64::cosh),
        "tanh" => unary(f64::tanh),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "round" => unary(f64::round),
        "trunc" => unary(f64::trunc),
        "sign" => unary(|value| if value == 0.0 { 0.0 } else { value.signum() }),
        "pow" => binary(f64::powf),
        "atan2" => binary(f64::atan2),
        "hypot" => binary(f64::hypot),
        "min" | "max" => {
            if args.is_empty() {
                return Err(EvalError::WrongArity {
                    name: name.to_string(),
                    expected: "1 or more",
                    got: 0,
                });
            }
            let pick: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            Ok(args[1..].iter().fold(args[0], |acc, value| pick(acc, *value)))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

/// Rewrites an author formula so the first column is referenced through
/// `X_PLACEHOLDER`.
///
/// Unparsable formulas are returned verbatim; they evaluate to errors.
pub fn canonicalize_formula(raw: &str, x_name: &str) -> String {
    match parse_formula(raw) {
        Ok(expr) => expr.substitute(x_name, X_PLACEHOLDER).to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Rewrites a canonical formula into the author-facing form for `x_name`.
pub fn display_formula(canonical: &str, x_name: &str) -> String {
    match parse_formula(canonical) {
        Ok(expr) => expr.substitute(X_PLACEHOLDER, x_name).to_string(),
        Err(_) => canonical.to_string(),
    }
}

/// Returns whether `canonical` parses and references `variable`.
pub fn formula_references(canonical: &str, variable: &str) -> bool {
    parse_formula(canonical)
        .map(|expr| expr.variables().iter().any(|name| name == variable))
        .unwrap_or(false)
}

/// A canonical formula parsed once for repeated per-row evaluation.
#[derive(Debug, Clone)]
pub struct CompiledFormula {
    expr: Option<Expr>,
}

impl CompiledFormula {
    pub fn compile(canonical: &str) -> Self {
        Self {
            expr: parse_formula(canonical).ok(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.expr.is_some()
    }

    /// Computes one cell from the first-column cell `x`.
    ///
    /// - Empty `x` -> `Empty`.
    /// - Unparsable formula, non-numeric `x`, evaluation failure, or a
    ///   non-finite result -> `Error`.
    pub fn evaluate_cell(&self, x: &CellValue) -> CellValue {
        if x.is_empty() {
            return CellValue::Empty;
        }
        let (Some(expr), Some(x_value)) = (self.expr.as_ref(), x.as_number()) else {
            return CellValue::Error;
        };
        let lookup = move |name: &str| (name == X_PLACEHOLDER).then_some(x_value);
        match expr.evaluate(&lookup) {
            Ok(value) if value.is_finite() => CellValue::Number(value),
            _ => CellValue::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        canonicalize_formula, display_formula, formula_references, CompiledFormula, EvalError,
        X_PLACEHOLDER,
    };
    use crate::formula::parser::parse_formula;
    use crate::model::value::CellValue;

    fn eval(source: &str) -> Result<f64, EvalError> {
        parse_formula(source)
            .expect("formula should parse")
            .evaluate(&|_| None)
    }

    #[test]
    fn evaluates_operators_functions_and_constants() {
        assert_eq!(eval("1 + 2 * 3"), Ok(7.0));
        assert_eq!(eval("-2^2"), Ok(-4.0));
        assert_eq!(eval("7 % 4"), Ok(3.0));
        assert_eq!(eval("max(1, 5, 3) - min(4, 2)"), Ok(3.0));
        assert_eq!(eval("sqrt(16) + abs(-1)"), Ok(5.0));
        assert_eq!(eval("round(PI * 100) / 100"), Ok(3.14));
        assert!(matches!(
            eval("sqrt(1, 2)"),
            Err(EvalError::WrongArity { .. })
        ));
        assert_eq!(eval("y + 1"), Err(EvalError::UnknownVariable("y".to_string())));
    }

    #[test]
    fn canonical_and_display_forms_swap_first_column_name() {
        let canonical = canonicalize_formula("x*2+1", "x");
        assert_eq!(canonical, "(__x__ * 2) + 1");
        assert!(formula_references(&canonical, X_PLACEHOLDER));
        assert_eq!(display_formula(&canonical, "time"), "(time * 2) + 1");
    }

    #[test]
    fn unparsable_formula_is_kept_verbatim() {
        assert_eq!(canonicalize_formula("x +", "x"), "x +");
        assert!(!formula_references("x +", "x"));
    }

    #[test]
    fn evaluate_cell_distinguishes_empty_error_and_numbers() {
        let formula = CompiledFormula::compile(&canonicalize_formula("x + 1", "x"));
        assert!(formula.is_valid());
        assert_eq!(formula.evaluate_cell(&CellValue::Number(1.0)), CellValue::Number(2.0));
        assert_eq!(formula.evaluate_cell(&CellValue::from("2")), CellValue::Number(3.0));
        assert_eq!(formula.evaluate_cell(&CellValue::Empty), CellValue::Empty);
        assert_eq!(formula.evaluate_cell(&CellValue::from("abc")), CellValue::Error);

        let divide = CompiledFormula::compile(&canonicalize_formula("1 / x", "x"));
        assert_eq!(divide.evaluate_cell(&CellValue::Number(0.0)), CellValue::Error);

        let broken = CompiledFormula::compile("x +");
        assert!(!broken.is_valid());
        assert_eq!(broken.evaluate_cell(&CellValue::Number(1.0)), CellValue::Error);
    }
}
