use crate::compiler::Notation;
use crate::context::EngineContext;
use crate::equation_engine::{Evaluator, Expr};
use crate::format::format_number;
use crate::text::{find_top_level, split_top_level};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

const MAX_UNKNOWNS: usize = 4;
const PIVOT_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearSolution {
    pub variables: Vec<String>,
    pub values: Vec<f64>,
}

impl LinearSolution {
    pub fn value(&self, variable: &str) -> Option<f64> {
        self.variables
            .iter()
            .position(|v| v == variable)
            .map(|i| self.values[i])
    }
}

impl fmt::Display for LinearSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.variables.iter().zip(&self.values).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name} = {}", format_number(*value))?;
        }
        Ok(())
    }
}

/// Solves the `n x n` system stored row-major in `matrix` by Gaussian
/// elimination with partial pivoting. `None` when a pivot vanishes.
pub fn gaussian_solve(mut matrix: Vec<f64>, mut rhs: Vec<f64>, n: usize) -> Option<Vec<f64>> {
    if n == 0 || matrix.len() != n * n || rhs.len() != n {
        return None;
    }
    for col in 0..n {
        let pivot_row = (col..n).max_by(|&a, &b| {
            matrix[a * n + col]
                .abs()
                .total_cmp(&matrix[b * n + col].abs())
        })?;
        let pivot = matrix[pivot_row * n + col];
        if !pivot.is_finite() || pivot.abs() < PIVOT_EPS {
            return None;
        }
        if pivot_row != col {
            for k in 0..n {
                matrix.swap(col * n + k, pivot_row * n + k);
            }
            rhs.swap(col, pivot_row);
        }
        for row in col + 1..n {
            let factor = matrix[row * n + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                matrix[row * n + k] -= factor * matrix[col * n + k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut solution = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n)
            .map(|k| matrix[row * n + k] * solution[k])
            .sum();
        solution[row] = (rhs[row] - tail) / matrix[row * n + row];
    }
    solution.iter().all(|v| v.is_finite()).then_some(solution)
}

/// Solves comma or semicolon separated linear equations such as
/// `x + 2*y = 5, 3*x - y = 1` in up to four single-letter unknowns.
///
/// Coefficients are recovered by sampling `lhs - rhs`; non-linear systems are
/// detected by a second sample along each axis and rejected.
pub fn solve_linear_system(ctx: &EngineContext, text: &str) -> Option<LinearSolution> {
    let mut residuals: Vec<Expr> = Vec::new();
    for piece in split_top_level(text, &[',', ';']) {
        if piece.is_empty() {
            continue;
        }
        let eq = find_top_level(&piece, '=')?;
        let lhs = ctx.prepare(&piece[..eq], Notation::Plain).ok()?;
        let rhs = ctx.prepare(&piece[eq + 1..], Notation::Plain).ok()?;
        residuals.push(Expr::binary(lhs, '-', rhs));
    }

    let unknowns: BTreeSet<String> = residuals
        .iter()
        .flat_map(|r| r.free_variables())
        .collect();
    let variables: Vec<String> = unknowns.into_iter().collect();
    let n = variables.len();
    if n == 0 || n > MAX_UNKNOWNS || residuals.len() != n {
        log::debug!(
            "linear system rejected: {} equations in {n} unknowns",
            residuals.len()
        );
        return None;
    }
    if variables.iter().any(|v| v.chars().count() != 1) {
        return None;
    }

    let names: Vec<&str> = variables.iter().map(String::as_str).collect();
    let mut matrix = vec![0.0; n * n];
    let mut rhs = vec![0.0; n];
    for (row, residual) in residuals.iter().enumerate() {
        let evaluator = Evaluator::new(residual).ok()?;
        let binding = evaluator.bind(&names);
        let mut point = vec![0.0; n];
        let base = evaluator.eval_bound(&binding, &point);
        if !base.is_finite() {
            return None;
        }
        rhs[row] = -base;
        for col in 0..n {
            point[col] = 1.0;
            let once = evaluator.eval_bound(&binding, &point);
            point[col] = 2.0;
            let twice = evaluator.eval_bound(&binding, &point);
            point[col] = 0.0;
            let coefficient = once - base;
            if !coefficient.is_finite() || (twice - base - 2.0 * coefficient).abs() > 1e-9 {
                return None;
            }
            matrix[row * n + col] = coefficient;
        }
    }

    let values = gaussian_solve(matrix, rhs, n)?;
    Some(LinearSolution { variables, values })
}

#[cfg(test)]
mod tests {
    use super::{gaussian_solve, solve_linear_system};
    use crate::context::EngineContext;

    #[test]
    fn solves_two_by_two() {
        let ctx = EngineContext::default();
        let solution = solve_linear_system(&ctx, "x+2*y=5,3*x-y=1").expect("solution");
        assert_eq!(solution.variables, vec!["x", "y"]);
        assert!((solution.value("x").unwrap() - 1.0).abs() < 1e-12);
        assert!((solution.value("y").unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(solution.to_string(), "x = 1, y = 2");
    }

    #[test]
    fn solves_three_unknowns_with_semicolons() {
        let ctx = EngineContext::default();
        let solution =
            solve_linear_system(&ctx, "a + b + c = 6; 2a - b = 0; c = 3").expect("solution");
        assert!((solution.value("a").unwrap() - 1.0).abs() < 1e-9);
        assert!((solution.value("b").unwrap() - 2.0).abs() < 1e-9);
        assert!((solution.value("c").unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_systems() {
        let ctx = EngineContext::default();
        // Count mismatch.
        assert!(solve_linear_system(&ctx, "x + y = 1").is_none());
        // Singular.
        assert!(solve_linear_system(&ctx, "x + y = 1, 2x + 2y = 2").is_none());
        // Non-linear.
        assert!(solve_linear_system(&ctx, "x*y = 1, x - y = 0").is_none());
        // No equals sign.
        assert!(solve_linear_system(&ctx, "x + y, x - y").is_none());
        // Too many unknowns.
        assert!(solve_linear_system(
            &ctx,
            "a=1, b=1, c=1, d=1, f=1"
        )
        .is_none());
    }

    #[test]
    fn pivots_on_the_largest_entry() {
        let solution = gaussian_solve(vec![0.0, 1.0, 1.0, 0.0], vec![3.0, 4.0], 2).expect("solve");
        assert_eq!(solution, vec![4.0, 3.0]);
        assert!(gaussian_solve(vec![1.0, 2.0, 2.0, 4.0], vec![1.0, 2.0], 2).is_none());
    }
}
