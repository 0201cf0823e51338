//! Dense matrix and vector operations on top of `nalgebra`, with uniform
//! validation, formatting and error mapping.

use crate::equation_engine::parse;
use crate::error::{EngineError, EngineResult};
use crate::format::format_number;
use crate::symbolic::poly::constant_value;
use crate::text::split_top_level;
use nalgebra::{DMatrix, DVector, SVD};
use num_complex::Complex;
use serde::{Deserialize, Serialize};

pub const MATRIX_OPERATIONS: &[&str] = &[
    "det", "inv", "eig", "transpose", "trace", "rank", "add", "sub", "mul",
];
pub const VECTOR_OPERATIONS: &[&str] = &["dot", "cross", "norm", "normalize", "add", "sub", "angle"];

const SVD_MAX_ITERATIONS: usize = 1000;
const PIVOT_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

impl ComplexNumber {
    pub fn format(&self) -> String {
        if self.im.abs() < 1e-9 {
            return format_number(self.re);
        }
        let sign = if self.im < 0.0 { '-' } else { '+' };
        let imaginary = format_number(self.im.abs());
        let imaginary = if imaginary == "1" { String::new() } else { imaginary };
        if self.re.abs() < 1e-9 {
            let lead = if self.im < 0.0 { "-" } else { "" };
            return format!("{lead}{imaginary}i");
        }
        format!("{} {sign} {imaginary}i", format_number(self.re))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinalgValue {
    Scalar(f64),
    Vector(DVector<f64>),
    Matrix(DMatrix<f64>),
    Eigenvalues(Vec<ComplexNumber>),
}

impl LinalgValue {
    pub fn format(&self) -> String {
        match self {
            LinalgValue::Scalar(v) => format_number(*v),
            LinalgValue::Vector(v) => format_vector(v),
            LinalgValue::Matrix(m) => format_matrix(m),
            LinalgValue::Eigenvalues(values) => values
                .iter()
                .map(ComplexNumber::format)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub fn format_vector(v: &DVector<f64>) -> String {
    let entries: Vec<String> = v.iter().map(|x| format_number(*x)).collect();
    format!("[{}]", entries.join(", "))
}

pub fn format_matrix(m: &DMatrix<f64>) -> String {
    let rows: Vec<String> = m
        .row_iter()
        .map(|row| {
            let entries: Vec<String> = row.iter().map(|x| format_number(*x)).collect();
            format!("[{}]", entries.join(", "))
        })
        .collect();
    format!("[{}]", rows.join(", "))
}

fn strip_brackets(text: &str) -> EngineResult<&str> {
    text.trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| EngineError::InvalidInput(format!("expected brackets around '{}'", text.trim())))
}

fn parse_entry(text: &str) -> EngineResult<f64> {
    let expr = parse(text).map_err(EngineError::Parse)?;
    let value = constant_value(&expr)
        .ok_or_else(|| EngineError::InvalidInput(format!("'{text}' is not a finite number")))?;
    if !value.is_finite() {
        return Err(EngineError::NumericOverflow(format!("'{text}' is not finite")));
    }
    Ok(value)
}

fn parse_row(text: &str) -> EngineResult<Vec<f64>> {
    let inner = strip_brackets(text)?;
    if inner.trim().is_empty() {
        return Err(EngineError::InvalidInput("empty row".to_string()));
    }
    split_top_level(inner, &[',']).iter().map(|e| parse_entry(e)).collect()
}

/// Parses `[1, 2, 3]`. Entries may be constant expressions such as `pi/2`.
pub fn parse_vector(text: &str) -> EngineResult<DVector<f64>> {
    Ok(DVector::from_vec(parse_row(text)?))
}

/// Parses `[[1, 2], [3, 4]]`, rejecting jagged rows and non-finite entries.
pub fn parse_matrix(text: &str) -> EngineResult<DMatrix<f64>> {
    let inner = strip_brackets(text)?;
    let rows = split_top_level(inner, &[','])
        .iter()
        .map(|row| parse_row(row))
        .collect::<EngineResult<Vec<_>>>()?;
    let cols = rows.first().map(Vec::len).unwrap_or(0);
    if rows.is_empty() || cols == 0 {
        return Err(EngineError::InvalidInput("matrix is empty".to_string()));
    }
    if rows.iter().any(|r| r.len() != cols) {
        return Err(EngineError::InvalidInput(
            "matrix rows have different lengths".to_string(),
        ));
    }
    let data: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(DMatrix::from_row_slice(data.len() / cols, cols, &data))
}

fn require_square(m: &DMatrix<f64>, op: &str) -> EngineResult<()> {
    if m.is_square() {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "{op} needs a square matrix, got {}x{}",
            m.nrows(),
            m.ncols()
        )))
    }
}

fn require_same_shape(a: &DMatrix<f64>, b: &DMatrix<f64>, op: &str) -> EngineResult<()> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "{op} needs matrices of the same shape, got {}x{} and {}x{}",
            a.nrows(),
            a.ncols(),
            b.nrows(),
            b.ncols()
        )))
    }
}

fn finite_matrix(m: DMatrix<f64>, op: &str) -> EngineResult<LinalgValue> {
    if m.iter().all(|v| v.is_finite()) {
        Ok(LinalgValue::Matrix(m))
    } else {
        Err(EngineError::NumericOverflow(format!("{op} produced non-finite entries")))
    }
}

/// Numerical rank from the singular values, falling back to row reduction
/// when the decomposition does not converge.
pub fn rank(m: &DMatrix<f64>) -> usize {
    let svd = SVD::try_new(m.clone(), false, false, f64::EPSILON, SVD_MAX_ITERATIONS);
    match svd {
        Some(svd) if svd.singular_values.iter().all(|s| s.is_finite()) => {
            let largest = svd.singular_values.max();
            let tolerance = m.nrows().max(m.ncols()) as f64 * f64::EPSILON * largest;
            svd.singular_values.iter().filter(|s| **s > tolerance).count()
        }
        _ => {
            log::debug!("SVD unusable, ranking by elimination");
            gaussian_rank(m)
        }
    }
}

/// Row echelon rank with partial pivoting.
pub fn gaussian_rank(m: &DMatrix<f64>) -> usize {
    let mut a = m.clone();
    let (rows, cols) = a.shape();
    let mut rank = 0;
    for col in 0..cols {
        if rank == rows {
            break;
        }
        let Some(pivot) = (rank..rows).max_by(|&i, &j| a[(i, col)].abs().total_cmp(&a[(j, col)].abs()))
        else {
            break;
        };
        if a[(pivot, col)].abs() < PIVOT_EPS {
            continue;
        }
        a.swap_rows(rank, pivot);
        for row in rank + 1..rows {
            let factor = a[(row, col)] / a[(rank, col)];
            for k in col..cols {
                a[(row, k)] -= factor * a[(rank, k)];
            }
        }
        rank += 1;
    }
    rank
}

pub fn eigenvalues(m: &DMatrix<f64>) -> EngineResult<Vec<ComplexNumber>> {
    require_square(m, "eig")?;
    let mut values: Vec<ComplexNumber> = m
        .complex_eigenvalues()
        .iter()
        .map(|c| ComplexNumber::from(*c))
        .collect();
    if values.iter().any(|c| !c.re.is_finite() || !c.im.is_finite()) {
        return Err(EngineError::Convergence(
            "eigenvalue iteration did not converge".to_string(),
        ));
    }
    values.sort_by(|a, b| {
        if (a.re - b.re).abs() > 1e-9 {
            a.re.total_cmp(&b.re)
        } else {
            a.im.total_cmp(&b.im)
        }
    });
    Ok(values)
}

/// Applies a named matrix operation. Unary operations take one operand,
/// `add`, `sub` and `mul` take two.
pub fn matrix_operation(op: &str, operands: &[DMatrix<f64>]) -> EngineResult<LinalgValue> {
    let arity = match op {
        "add" | "sub" | "mul" => 2,
        _ if MATRIX_OPERATIONS.contains(&op) => 1,
        _ => return Err(EngineError::unsupported(op, MATRIX_OPERATIONS)),
    };
    if operands.len() != arity {
        return Err(EngineError::InvalidInput(format!(
            "{op} takes {arity} matrix operand(s), got {}",
            operands.len()
        )));
    }
    let a = &operands[0];
    match op {
        "det" => {
            require_square(a, op)?;
            Ok(LinalgValue::Scalar(a.determinant()))
        }
        "inv" => {
            require_square(a, op)?;
            let inverse = a
                .clone()
                .try_inverse()
                .ok_or_else(|| EngineError::Domain("matrix is singular".to_string()))?;
            finite_matrix(inverse, op)
        }
        "eig" => Ok(LinalgValue::Eigenvalues(eigenvalues(a)?)),
        "transpose" => Ok(LinalgValue::Matrix(a.transpose())),
        "trace" => {
            require_square(a, op)?;
            Ok(LinalgValue::Scalar(a.trace()))
        }
        "rank" => Ok(LinalgValue::Scalar(rank(a) as f64)),
        "add" | "sub" => {
            let b = &operands[1];
            require_same_shape(a, b, op)?;
            finite_matrix(if op == "add" { a + b } else { a - b }, op)
        }
        "mul" => {
            let b = &operands[1];
            if a.ncols() != b.nrows() {
                return Err(EngineError::InvalidInput(format!(
                    "cannot multiply {}x{} by {}x{}",
                    a.nrows(),
                    a.ncols(),
                    b.nrows(),
                    b.ncols()
                )));
            }
            finite_matrix(a * b, op)
        }
        _ => Err(EngineError::unsupported(op, MATRIX_OPERATIONS)),
    }
}

fn require_same_length(a: &DVector<f64>, b: &DVector<f64>, op: &str) -> EngineResult<()> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "{op} needs vectors of equal length, got {} and {}",
            a.len(),
            b.len()
        )))
    }
}

fn nonzero_norm(v: &DVector<f64>, op: &str) -> EngineResult<f64> {
    let norm = v.norm();
    if norm < PIVOT_EPS {
        Err(EngineError::Domain(format!("{op} is undefined for the zero vector")))
    } else {
        Ok(norm)
    }
}

pub fn vector_operation(op: &str, operands: &[DVector<f64>]) -> EngineResult<LinalgValue> {
    let arity = match op {
        "norm" | "normalize" => 1,
        _ if VECTOR_OPERATIONS.contains(&op) => 2,
        _ => return Err(EngineError::unsupported(op, VECTOR_OPERATIONS)),
    };
    if operands.len() != arity {
        return Err(EngineError::InvalidInput(format!(
            "{op} takes {arity} vector operand(s), got {}",
            operands.len()
        )));
    }
    let a = &operands[0];
    match op {
        "norm" => Ok(LinalgValue::Scalar(a.norm())),
        "normalize" => {
            let norm = nonzero_norm(a, op)?;
            Ok(LinalgValue::Vector(a / norm))
        }
        "dot" => {
            let b = &operands[1];
            require_same_length(a, b, op)?;
            Ok(LinalgValue::Scalar(a.dot(b)))
        }
        "cross" => {
            let b = &operands[1];
            if a.len() != 3 || b.len() != 3 {
                return Err(EngineError::InvalidInput(
                    "cross needs two 3-component vectors".to_string(),
                ));
            }
            Ok(LinalgValue::Vector(a.cross(b)))
        }
        "add" | "sub" => {
            let b = &operands[1];
            require_same_length(a, b, op)?;
            Ok(LinalgValue::Vector(if op == "add" { a + b } else { a - b }))
        }
        "angle" => {
            let b = &operands[1];
            require_same_length(a, b, op)?;
            let cos = a.dot(b) / (nonzero_norm(a, op)? * nonzero_norm(b, op)?);
            Ok(LinalgValue::Scalar(cos.clamp(-1.0, 1.0).acos()))
        }
        _ => Err(EngineError::unsupported(op, VECTOR_OPERATIONS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(text: &str) -> DMatrix<f64> {
        parse_matrix(text).expect("matrix")
    }

    fn v(text: &str) -> DVector<f64> {
        parse_vector(text).expect("vector")
    }

    #[test]
    fn determinant_and_inverse() {
        let value = matrix_operation("det", &[m("[[1,2],[3,4]]")]).expect("det");
        assert_eq!(value.format(), "-2");
        let inverse = matrix_operation("inv", &[m("[[2,0],[0,4]]")]).expect("inv");
        assert_eq!(inverse.format(), "[[0.5, 0], [0, 0.25]]");
    }

    #[test]
    fn singular_inverse_is_a_domain_error() {
        let err = matrix_operation("inv", &[m("[[1,2],[2,4]]")]).unwrap_err();
        assert!(matches!(err, EngineError::Domain(_)), "{err:?}");
    }

    #[test]
    fn rejects_jagged_and_non_finite_input() {
        assert!(matches!(parse_matrix("[[1,2],[3]]"), Err(EngineError::InvalidInput(_))));
        assert!(parse_matrix("[[1,2],[3,1/0]]").is_err());
        assert!(parse_matrix("[]").is_err());
        assert!(parse_vector("1, 2").is_err());
    }

    #[test]
    fn entries_may_be_constant_expressions() {
        let matrix = m("[[pi/2, -1], [2^3, sqrt(4)]]");
        assert!((matrix[(0, 0)] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(matrix[(1, 0)], 8.0);
    }

    #[test]
    fn eigenvalues_real_and_complex() {
        let real = matrix_operation("eig", &[m("[[2,0],[0,3]]")]).expect("eig");
        assert_eq!(real.format(), "2, 3");
        let rotation = matrix_operation("eig", &[m("[[0,-1],[1,0]]")]).expect("eig");
        assert_eq!(rotation.format(), "-i, i");
    }

    #[test]
    fn rank_transpose_trace_products() {
        assert_eq!(matrix_operation("rank", &[m("[[1,2],[2,4]]")]).expect("rank").format(), "1");
        assert_eq!(gaussian_rank(&m("[[1,2,3],[4,5,6],[7,8,9]]")), 2);
        assert_eq!(
            matrix_operation("transpose", &[m("[[1,2,3]]")]).expect("t").format(),
            "[[1], [2], [3]]"
        );
        assert_eq!(matrix_operation("trace", &[m("[[1,2],[3,4]]")]).expect("tr").format(), "5");
        let product = matrix_operation("mul", &[m("[[1,2]]"), m("[[3],[4]]")]).expect("mul");
        assert_eq!(product.format(), "[[11]]");
        assert!(matrix_operation("add", &[m("[[1,2]]"), m("[[1],[2]]")]).is_err());
    }

    #[test]
    fn unknown_operations_name_the_supported_set() {
        let err = matrix_operation("frobnicate", &[m("[[1]]")]).unwrap_err();
        assert!(err.to_string().contains("det, inv, eig"));
        let err = vector_operation("curl", &[v("[1,2,3]")]).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperation { .. }));
    }

    #[test]
    fn vector_operations() {
        assert_eq!(vector_operation("dot", &[v("[1,2,3]"), v("[4,5,6]")]).expect("dot").format(), "32");
        assert_eq!(
            vector_operation("cross", &[v("[1,0,0]"), v("[0,1,0]")]).expect("cross").format(),
            "[0, 0, 1]"
        );
        assert_eq!(vector_operation("norm", &[v("[3,4]")]).expect("norm").format(), "5");
        assert_eq!(
            vector_operation("normalize", &[v("[3,4]")]).expect("normalize").format(),
            "[0.6, 0.8]"
        );
        let angle = vector_operation("angle", &[v("[1,0]"), v("[0,2]")]).expect("angle");
        assert_eq!(angle, LinalgValue::Scalar(std::f64::consts::FRAC_PI_2));
    }

    #[test]
    fn zero_vector_normalize_is_a_domain_error() {
        let err = vector_operation("normalize", &[v("[0,0,0]")]).unwrap_err();
        assert!(matches!(err, EngineError::Domain(_)));
        assert!(vector_operation("angle", &[v("[0,0]"), v("[1,0]")]).is_err());
    }
}
