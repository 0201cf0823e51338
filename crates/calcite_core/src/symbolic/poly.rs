//! Dense univariate polynomials extracted from expression trees.

use crate::equation_engine::{Expr, Func, Func2};
use crate::format::as_fraction;

pub const MAX_DEGREE: usize = 12;

/// Coefficients, lowest degree first, with trailing zeros trimmed.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    pub coefficients: Vec<f64>,
}

impl Polynomial {
    pub fn constant(value: f64) -> Self {
        Self::from_coefficients(vec![value])
    }

    pub fn from_coefficients(mut coefficients: Vec<f64>) -> Self {
        while coefficients.len() > 1 && coefficients.last() == Some(&0.0) {
            coefficients.pop();
        }
        if coefficients.is_empty() {
            coefficients.push(0.0);
        }
        Self { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn coefficient(&self, k: usize) -> f64 {
        self.coefficients.get(k).copied().unwrap_or(0.0)
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    fn add(&self, other: &Self, sign: f64) -> Self {
        let len = self.coefficients.len().max(other.coefficients.len());
        Self::from_coefficients(
            (0..len)
                .map(|k| self.coefficient(k) + sign * other.coefficient(k))
                .collect(),
        )
    }

    fn mul(&self, other: &Self) -> Option<Self> {
        if self.degree() + other.degree() > MAX_DEGREE {
            return None;
        }
        let mut out = vec![0.0; self.coefficients.len() + other.coefficients.len() - 1];
        for (i, a) in self.coefficients.iter().enumerate() {
            for (j, b) in other.coefficients.iter().enumerate() {
                out[i + j] += a * b;
            }
        }
        Some(Self::from_coefficients(out))
    }

    fn scale(&self, factor: f64) -> Self {
        Self::from_coefficients(self.coefficients.iter().map(|c| c * factor).collect())
    }

    /// Reads `expr` as a polynomial in `var`, or `None` when it is not one
    /// (or its degree exceeds [`MAX_DEGREE`]).
    pub fn from_expr(expr: &Expr, var: &str) -> Option<Self> {
        if !expr.contains_var(var) {
            return constant_value(expr).map(Self::constant);
        }
        match expr {
            Expr::Variable(name) if name == var => Some(Self::from_coefficients(vec![0.0, 1.0])),
            Expr::Unary('-', operand) => Some(Self::from_expr(operand, var)?.scale(-1.0)),
            Expr::Binary(left, op, right) => {
                let l = Self::from_expr(left, var);
                match op {
                    '+' => Some(l?.add(&Self::from_expr(right, var)?, 1.0)),
                    '-' => Some(l?.add(&Self::from_expr(right, var)?, -1.0)),
                    '*' => l?.mul(&Self::from_expr(right, var)?),
                    '/' => {
                        let divisor = Self::from_expr(right, var)?;
                        if divisor.degree() != 0 || divisor.coefficient(0) == 0.0 {
                            return None;
                        }
                        Some(l?.scale(1.0 / divisor.coefficient(0)))
                    }
                    '^' => {
                        let n = constant_value(right)?;
                        if n < 0.0 || n.fract() != 0.0 || n as usize > MAX_DEGREE {
                            return None;
                        }
                        let base = l?;
                        let mut out = Self::constant(1.0);
                        for _ in 0..n as usize {
                            out = out.mul(&base)?;
                        }
                        Some(out)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Renders as an expression in `var`, highest degree first.
    pub fn to_expr(&self, var: &str) -> Expr {
        let mut result: Option<Expr> = None;
        for (k, &c) in self.coefficients.iter().enumerate().rev() {
            if c == 0.0 {
                continue;
            }
            let negative = c < 0.0;
            let term = monomial(c.abs(), k, var);
            result = Some(match result {
                None if negative => Expr::neg(term),
                None => term,
                Some(acc) => Expr::binary(acc, if negative { '-' } else { '+' }, term),
            });
        }
        result.unwrap_or(Expr::num(0.0))
    }

    /// Antiderivative with zero constant term.
    pub fn integrate(&self) -> Self {
        let mut out = vec![0.0];
        out.extend(
            self.coefficients
                .iter()
                .enumerate()
                .map(|(k, c)| c / (k as f64 + 1.0)),
        );
        Self::from_coefficients(out)
    }

    /// Real roots for degree 1 and 2, ascending, double roots once.
    /// `None` for other degrees.
    pub fn real_roots(&self) -> Option<Vec<f64>> {
        match self.degree() {
            1 => Some(vec![-self.coefficient(0) / self.coefficient(1)]),
            2 => {
                let (c, b, a) = (self.coefficient(0), self.coefficient(1), self.coefficient(2));
                let disc = b * b - 4.0 * a * c;
                if disc < -1e-12 {
                    return Some(Vec::new());
                }
                if disc.abs() <= 1e-12 {
                    return Some(vec![-b / (2.0 * a)]);
                }
                let sq = disc.sqrt();
                let mut roots = vec![(-b - sq) / (2.0 * a), (-b + sq) / (2.0 * a)];
                roots.sort_by(|x, y| x.total_cmp(y));
                Some(roots)
            }
            _ => None,
        }
    }
}

/// `c*var^k` for `c > 0`, with exact fractions where possible (`x^3/3`).
fn monomial(c: f64, k: usize, var: &str) -> Expr {
    let power = match k {
        0 => None,
        1 => Some(Expr::var(var)),
        _ => Some(Expr::binary(Expr::var(var), '^', Expr::num(k as f64))),
    };
    let Some(power) = power else {
        return match as_fraction(c, 1000) {
            Some((p, 1)) => Expr::num(p as f64),
            Some((p, d)) => Expr::binary(Expr::num(p as f64), '/', Expr::num(d as f64)),
            None => Expr::num(c),
        };
    };
    match as_fraction(c, 1000) {
        Some((1, 1)) => power,
        Some((p, 1)) => Expr::binary(Expr::num(p as f64), '*', power),
        Some((1, d)) => Expr::binary(power, '/', Expr::num(d as f64)),
        Some((p, d)) => Expr::binary(
            Expr::binary(Expr::num(p as f64), '*', power),
            '/',
            Expr::num(d as f64),
        ),
        None => Expr::binary(Expr::num(c), '*', power),
    }
}

/// Numeric value of a variable-free expression.
pub fn constant_value(expr: &Expr) -> Option<f64> {
    let value = match expr {
        Expr::Number(n) => *n,
        Expr::Variable(name) => Expr::constant_value(name)?,
        Expr::Unary('-', operand) => -constant_value(operand)?,
        Expr::Unary(_, operand) => Func::Factorial.apply(constant_value(operand)?),
        Expr::Binary(left, op, right) => {
            let (a, b) = (constant_value(left)?, constant_value(right)?);
            match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                '/' => a / b,
                '^' => a.powf(b),
                _ => return None,
            }
        }
        Expr::Call(name, args) => match args.as_slice() {
            [a] => Func::from_name(name)?.apply(constant_value(a)?),
            [a, b] => Func2::from_name(name)?.apply(constant_value(a)?, constant_value(b)?),
            _ => return None,
        },
    };
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::Polynomial;
    use crate::equation_engine::parse;
    use crate::symbolic::render::render;

    fn poly(text: &str) -> Option<Polynomial> {
        Polynomial::from_expr(&parse(text).expect("parse"), "x")
    }

    #[test]
    fn extracts_expanded_coefficients() {
        let p = poly("(x + 1)^2 - 3*x/2").expect("polynomial");
        assert_eq!(p.coefficients, vec![1.0, 0.5, 1.0]);
        assert!(poly("sin(x)").is_none());
        assert!(poly("1/x").is_none());
        assert!(poly("x^13").is_none());
    }

    #[test]
    fn integrates_with_exact_fractions() {
        let p = poly("x^2").expect("polynomial").integrate();
        assert_eq!(render(&p.to_expr("x")), "x^3/3");
        let q = poly("3*x^2 - 2").expect("polynomial").integrate();
        assert_eq!(render(&q.to_expr("x")), "x^3 - 2*x");
    }

    #[test]
    fn solves_linear_and_quadratic() {
        assert_eq!(poly("x^2 - 4").and_then(|p| p.real_roots()), Some(vec![-2.0, 2.0]));
        assert_eq!(poly("2*x + 6").and_then(|p| p.real_roots()), Some(vec![-3.0]));
        assert_eq!(poly("x^2 + 1").and_then(|p| p.real_roots()), Some(vec![]));
        assert_eq!(poly("x^3").and_then(|p| p.real_roots()), None);
    }
}
