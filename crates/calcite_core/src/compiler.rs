//! Text to evaluator pipeline: notation normalization, derivative notation,
//! user-function expansion, then bytecode compilation through the symbolic
//! engine. Caching lives in [`EngineContext`](crate::context::EngineContext).

use crate::equation_engine::{is_known_function, Evaluator, Expr};
use crate::error::{EngineError, EngineResult};
use crate::registry::FunctionRegistry;
use crate::symbolic::SymbolicEngine;
use serde::{Deserialize, Serialize};

const MAX_DERIVATIVE_ORDER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notation {
    #[default]
    Plain,
    /// LaTeX subset as produced by math input widgets.
    Markup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOptions {
    pub notation: Notation,
    pub allow_user_functions: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            notation: Notation::Plain,
            allow_user_functions: true,
        }
    }
}

impl CompileOptions {
    pub fn markup() -> Self {
        Self {
            notation: Notation::Markup,
            ..Self::default()
        }
    }

    pub fn without_user_functions(mut self) -> Self {
        self.allow_user_functions = false;
        self
    }
}

/// Compile-cache key. The registry version is present only when user
/// functions take part in compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileKey {
    pub text: String,
    pub notation: Notation,
    pub registry_version: Option<u64>,
}

/// Turns expression text into a fully expanded expression tree.
pub fn prepare(
    engine: &dyn SymbolicEngine,
    registry: Option<&FunctionRegistry>,
    text: &str,
    notation: Notation,
    max_depth: usize,
) -> EngineResult<Expr> {
    let normalized = match notation {
        Notation::Plain => text.to_string(),
        Notation::Markup => normalize_markup(text),
    };
    let body = strip_assignment(&normalized);
    if body.is_empty() {
        return Err(EngineError::Parse("empty expression".to_string()));
    }

    let (order, variable, body) = match split_derivative_head(body) {
        Some((order, variable, rest)) if !rest.trim().is_empty() => {
            (order, Some(variable), rest.trim())
        }
        _ => (0, None, body),
    };

    let mut expr = engine.parse(body)?;
    if let Some(registry) = registry.filter(|r| !r.is_empty()) {
        expr = registry.expand(&expr, max_depth);
    }
    expr = rewrite_implicit_calls(&expr, registry);

    if let Some(variable) = variable {
        for _ in 0..order {
            expr = engine.differentiate(&expr, &variable)?;
        }
    }
    Ok(expr)
}

/// [`prepare`] followed by compilation.
pub fn build_evaluator(
    engine: &dyn SymbolicEngine,
    registry: Option<&FunctionRegistry>,
    text: &str,
    notation: Notation,
    max_depth: usize,
) -> EngineResult<Evaluator> {
    let expr = prepare(engine, registry, text, notation, max_depth)?;
    engine.compile(&expr)
}

/// Drops a leading `y =` or `z =`.
pub fn strip_assignment(text: &str) -> &str {
    let trimmed = text.trim();
    for head in ['y', 'z'] {
        if let Some(rest) = trimmed.strip_prefix(head) {
            if let Some(body) = rest.trim_start().strip_prefix('=') {
                if !body.starts_with('=') {
                    return body.trim();
                }
            }
        }
    }
    trimmed
}

/// Splits `d/dx body` or `d^n/dx^n body` into `(n, "x", body)`.
pub fn split_derivative_head(text: &str) -> Option<(usize, String, &str)> {
    let rest = text.trim_start().strip_prefix('d')?;
    let (order, rest) = match rest.strip_prefix('^') {
        Some(after) => read_order(after)?,
        None => (1, rest),
    };
    let rest = rest.trim_start().strip_prefix('/')?.trim_start();
    let rest = rest.strip_prefix('d')?;
    let variable = rest.chars().next().filter(|c| c.is_ascii_alphabetic())?;
    let mut rest = &rest[variable.len_utf8()..];
    if rest.chars().next().map_or(false, |c| c.is_alphanumeric()) {
        return None;
    }
    if order > 1 {
        let (denominator_order, after) = read_order(rest.strip_prefix('^')?)?;
        if denominator_order != order {
            return None;
        }
        rest = after;
    }
    if order == 0 || order > MAX_DERIVATIVE_ORDER {
        return None;
    }
    Some((order, variable.to_string(), rest))
}

/// Reads `n` or `(n)` at the start of `text`.
fn read_order(text: &str) -> Option<(usize, &str)> {
    let (inner, rest) = match text.strip_prefix('(') {
        Some(after) => {
            let close = after.find(')')?;
            (&after[..close], &after[close + 1..])
        }
        None => {
            let end = text
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(text.len());
            (&text[..end], &text[end..])
        }
    };
    let order = inner.trim().parse().ok()?;
    Some((order, rest))
}

/// A single-letter call that is neither builtin nor registered is a product:
/// `a(x+1)` means `a*(x+1)`.
fn rewrite_implicit_calls(expr: &Expr, registry: Option<&FunctionRegistry>) -> Expr {
    match expr {
        Expr::Number(_) | Expr::Variable(_) => expr.clone(),
        Expr::Unary(op, operand) => {
            Expr::Unary(*op, Box::new(rewrite_implicit_calls(operand, registry)))
        }
        Expr::Binary(left, op, right) => Expr::binary(
            rewrite_implicit_calls(left, registry),
            *op,
            rewrite_implicit_calls(right, registry),
        ),
        Expr::Call(name, args) => {
            let args: Vec<Expr> = args
                .iter()
                .map(|a| rewrite_implicit_calls(a, registry))
                .collect();
            let registered = registry.map_or(false, |r| r.contains(name));
            match args.as_slice() {
                [arg] if name.chars().count() == 1 && !is_known_function(name) && !registered => {
                    Expr::binary(Expr::Variable(name.clone()), '*', arg.clone())
                }
                _ => Expr::Call(name.clone(), args),
            }
        }
    }
}

// --- Markup normalization ---

/// Rewrites the supported LaTeX subset to plain infix.
pub fn normalize_markup(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    normalize_chars(&chars)
}

fn skip_spaces(chars: &[char], mut i: usize) -> usize {
    while chars.get(i).map_or(false, |c| c.is_whitespace()) {
        i += 1;
    }
    i
}

/// The contents of a bracketed group starting at `start`, and the index
/// just past its closing bracket.
fn read_group(chars: &[char], start: usize, open: char, close: char) -> Option<(&[char], usize)> {
    if chars.get(start) != Some(&open) {
        return None;
    }
    let mut depth = 0;
    for (i, &c) in chars.iter().enumerate().skip(start) {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some((&chars[start + 1..i], i + 1));
            }
        }
    }
    None
}

/// `\frac{d^{2}}{dx^{2}}` becomes the plain operator `d^2/dx^2`.
fn derivative_operator(numerator: &[char], denominator: &[char]) -> Option<String> {
    let strip = |part: &[char]| -> String {
        part.iter()
            .filter(|c| !matches!(c, '{' | '}') && !c.is_whitespace())
            .collect()
    };
    let candidate = format!("{}/{}", strip(numerator), strip(denominator));
    match split_derivative_head(&candidate) {
        Some((_, _, rest)) if rest.is_empty() => Some(candidate),
        _ => None,
    }
}

/// After `\sin x`, wraps the bare argument: `sin(x)`.
fn wrap_bare_argument(chars: &[char], i: usize, out: &mut String) -> usize {
    let j = skip_spaces(chars, i);
    if !chars.get(j).map_or(false, |c| c.is_alphanumeric()) {
        return i;
    }
    let mut end = j;
    while chars.get(end).map_or(false, |c| c.is_alphanumeric() || *c == '.') {
        end += 1;
    }
    out.push('(');
    out.extend(&chars[j..end]);
    out.push(')');
    end
}

fn normalize_chars(chars: &[char]) -> String {
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(match c {
                '{' => '(',
                '}' => ')',
                other => other,
            });
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while chars.get(end).map_or(false, |c| c.is_ascii_alphabetic()) {
            end += 1;
        }
        if end == start {
            // Escaped symbol or spacing command: \{ \} \| \, \; \!
            match chars.get(start) {
                Some('{') => out.push('('),
                Some('}') => out.push(')'),
                Some('|') => out.push('|'),
                _ => out.push(' '),
            }
            i = start + 1;
            continue;
        }

        let name: String = chars[start..end].iter().collect();
        i = end;
        match name.as_str() {
            "left" | "right" | "big" | "Big" | "bigl" | "bigr" | "Bigl" | "Bigr" => {
                if chars.get(i) == Some(&'.') {
                    i += 1;
                }
            }
            "cdot" | "times" | "ast" => out.push('*'),
            "div" => out.push('/'),
            "pi" => out.push_str(" pi "),
            "le" | "leq" => out.push_str("<="),
            "ge" | "geq" => out.push_str(">="),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "frac" | "dfrac" | "tfrac" => {
                let numerator = read_group(chars, skip_spaces(chars, i), '{', '}');
                let denominator = numerator
                    .and_then(|(_, after)| read_group(chars, skip_spaces(chars, after), '{', '}'));
                match (numerator, denominator) {
                    (Some((num, _)), Some((den, after))) => {
                        i = after;
                        match derivative_operator(num, den) {
                            Some(operator) => {
                                out.push_str(&operator);
                                out.push(' ');
                            }
                            None => out.push_str(&format!(
                                "(({})/({}))",
                                normalize_chars(num),
                                normalize_chars(den)
                            )),
                        }
                    }
                    // Leave it to the parser to reject.
                    _ => out.push_str(" frac "),
                }
            }
            "sqrt" => {
                let mut j = skip_spaces(chars, i);
                let index = read_group(chars, j, '[', ']');
                if let Some((_, after)) = index {
                    j = skip_spaces(chars, after);
                }
                match (read_group(chars, j, '{', '}'), index) {
                    (Some((body, after)), Some((n, _))) => {
                        i = after;
                        out.push_str(&format!(
                            "(({})^(1/({})))",
                            normalize_chars(body),
                            normalize_chars(n)
                        ));
                    }
                    (Some((body, after)), None) => {
                        i = after;
                        out.push_str(&format!("sqrt({})", normalize_chars(body)));
                    }
                    _ => {
                        out.push_str(" sqrt");
                        i = wrap_bare_argument(chars, i, &mut out);
                    }
                }
            }
            "operatorname" | "mathrm" | "text" => {
                if let Some((inner, after)) = read_group(chars, skip_spaces(chars, i), '{', '}') {
                    out.push(' ');
                    out.extend(inner.iter().filter(|c| !c.is_whitespace()));
                    i = after;
                }
            }
            "log" if chars.get(i) == Some(&'_') => {
                // \log_{b} x  ->  (1/ln(b))*ln(x)
                let (base, after) = match read_group(chars, i + 1, '{', '}') {
                    Some((base, after)) => (normalize_chars(base), after),
                    None => match chars.get(i + 1) {
                        Some(c) => (c.to_string(), i + 2),
                        None => (String::new(), i + 1),
                    },
                };
                out.push_str(&format!(" (1/ln({base}))*ln"));
                i = wrap_bare_argument(chars, after, &mut out);
            }
            other => {
                out.push(' ');
                out.push_str(other);
                if is_known_function(other) {
                    i = wrap_bare_argument(chars, i, &mut out);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{normalize_markup, prepare, split_derivative_head, strip_assignment, Notation};
    use crate::equation_engine::{Evaluator, Scope};
    use crate::registry::{FunctionDefinition, FunctionRegistry};
    use crate::symbolic::BuiltinEngine;

    fn value_of(text: &str, notation: Notation, x: f64) -> f64 {
        let expr = prepare(&BuiltinEngine, None, text, notation, 16).expect("prepare");
        Evaluator::new(&expr)
            .expect("compile")
            .evaluate(&Scope::new().with("x", x))
    }

    #[test]
    fn strips_leading_assignment() {
        assert_eq!(strip_assignment("y = x^2"), "x^2");
        assert_eq!(strip_assignment("z=x+y"), "x+y");
        assert_eq!(strip_assignment("x = 3"), "x = 3");
    }

    #[test]
    fn recognizes_derivative_heads() {
        let (order, var, rest) = split_derivative_head("d^2/dx^2 (x^3)").expect("head");
        assert_eq!((order, var.as_str(), rest.trim()), (2, "x", "(x^3)"));
        assert_eq!(split_derivative_head("d/dt sin(t)").map(|h| h.0), Some(1));
        assert!(split_derivative_head("d/2").is_none());
        assert!(split_derivative_head("d^2/dx^3 x").is_none());
        assert!(split_derivative_head("d^11/dx^11 x").is_none());
    }

    #[test]
    fn normalizes_markup_constructs() {
        assert_eq!(
            value_of("\\frac{x^{2}}{2}+\\sqrt{x}\\cdot\\pi", Notation::Markup, 4.0),
            8.0 + 2.0 * std::f64::consts::PI
        );
        assert!((value_of("\\sqrt[3]{x}", Notation::Markup, 27.0) - 3.0).abs() < 1e-12);
        assert!((value_of("\\sin x", Notation::Markup, 1.0) - 1f64.sin()).abs() < 1e-12);
        assert!((value_of("\\log_{2} x", Notation::Markup, 8.0) - 3.0).abs() < 1e-12);
        assert_eq!(value_of("\\left|x\\right|", Notation::Markup, -3.0), 3.0);
    }

    #[test]
    fn markup_derivative_operator_survives_normalization() {
        let plain = normalize_markup("\\frac{d^{2}}{dx^{2}}\\left(x^{3}\\right)");
        assert!(plain.starts_with("d^2/dx^2"), "got {plain}");
        assert_eq!(value_of(&plain, Notation::Plain, 2.0), 12.0);
    }

    #[test]
    fn differentiates_repeatedly() {
        assert_eq!(value_of("d/dx (x^3)", Notation::Plain, 2.0), 12.0);
        assert_eq!(value_of("d^3/dx^3 x^4", Notation::Plain, 1.0), 24.0);
    }

    #[test]
    fn single_letter_calls_multiply_unless_registered() {
        assert_eq!(
            prepare(&BuiltinEngine, None, "a(x+1)", Notation::Plain, 16)
                .map(|e| e.free_variables().len())
                .expect("prepare"),
            2
        );
        let mut registry = FunctionRegistry::new();
        registry.rebuild(vec![FunctionDefinition::parse("a(t) = t^2").expect("definition")]);
        let expr = prepare(&BuiltinEngine, Some(&registry), "a(x+1)", Notation::Plain, 16)
            .expect("prepare");
        let value = Evaluator::new(&expr)
            .expect("compile")
            .evaluate(&Scope::new().with("x", 2.0));
        assert_eq!(value, 9.0);
    }

    #[test]
    fn empty_text_is_an_error() {
        assert!(prepare(&BuiltinEngine, None, "  ", Notation::Plain, 16).is_err());
        assert!(prepare(&BuiltinEngine, None, "y = ", Notation::Plain, 16).is_err());
    }
}
