//! Integrands whose antiderivatives are named special functions.
//!
//! Patterns and results are written with `@` standing for the integration
//! variable. `S`, `C`, `Ei`, `Si`, `Ci`, `li` and `Gamma` are placeholders the
//! evaluator does not know; only `erf` compiles.

use crate::equation_engine::{parse, Expr};
use crate::symbolic::simplify::simplify;

const TABLE: &[(&str, &str)] = &[
    ("exp(-@^2)", "sqrt(pi)/2*erf(@)"),
    ("e^(-@^2)", "sqrt(pi)/2*erf(@)"),
    ("sin(@^2)", "sqrt(pi/2)*S(sqrt(2/pi)*@)"),
    ("cos(@^2)", "sqrt(pi/2)*C(sqrt(2/pi)*@)"),
    ("exp(@)/@", "Ei(@)"),
    ("e^@/@", "Ei(@)"),
    ("sin(@)/@", "Si(@)"),
    ("cos(@)/@", "Ci(@)"),
    ("1/ln(@)", "li(@)"),
    ("exp(-@)/@", "-Gamma(0, @)"),
];

fn instantiate(template: &str, var: &str) -> Option<Expr> {
    let text = template.replace('@', &format!("({var})"));
    parse(&text).ok()
}

/// Exact table lookup after normalizing both sides.
pub fn lookup(expr: &Expr, var: &str) -> Option<Expr> {
    let target = simplify(expr);
    TABLE.iter().find_map(|(pattern, result)| {
        let pattern = simplify(&instantiate(pattern, var)?);
        (pattern == target).then(|| instantiate(result, var)).flatten()
    })
}

#[cfg(test)]
mod tests {
    use super::lookup;
    use crate::equation_engine::parse;
    use crate::symbolic::render::render;

    fn special(text: &str) -> Option<String> {
        lookup(&parse(text).expect("parse"), "x").map(|r| render(&r))
    }

    #[test]
    fn gaussian_maps_to_erf() {
        assert_eq!(special("exp(-x^2)").as_deref(), Some("sqrt(pi)/2*erf(x)"));
        assert_eq!(special("e^(-x^2)").as_deref(), Some("sqrt(pi)/2*erf(x)"));
    }

    #[test]
    fn named_placeholders() {
        assert_eq!(special("sin(x)/x").as_deref(), Some("Si(x)"));
        assert_eq!(special("exp(x)/x").as_deref(), Some("Ei(x)"));
        assert_eq!(special("1/ln(x)").as_deref(), Some("li(x)"));
    }

    #[test]
    fn only_exact_matches() {
        assert!(special("exp(-x^3)").is_none());
        assert!(special("sin(2x)/x").is_none());
    }
}
