//! Plain-infix and markup (LaTeX subset) rendering of [`Expr`] trees.
//!
//! Plain output re-parses to an equivalent tree.

use crate::equation_engine::Expr;
use crate::format::format_number;

/// Binding strength used to decide where parentheses are needed.
fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Number(n) if *n < 0.0 => 3,
        Expr::Number(_) | Expr::Variable(_) | Expr::Call(..) => 6,
        Expr::Binary(_, op, _) => match op {
            '+' | '-' => 1,
            '*' | '/' => 2,
            '^' => 4,
            _ => 0,
        },
        Expr::Unary('!', _) => 5,
        Expr::Unary(..) => 3,
    }
}

fn relation_text(op: char) -> &'static str {
    match op {
        '<' => "<",
        '>' => ">",
        '≤' => "<=",
        '≥' => ">=",
        _ => "?",
    }
}

pub fn render(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => format_number(*n),
        Expr::Variable(name) => name.clone(),
        Expr::Unary('!', operand) => format!("{}!", wrap(operand, precedence(operand) < 6)),
        Expr::Unary(_, operand) => format!("-{}", wrap(operand, precedence(operand) < 2)),
        Expr::Call(name, args) if name == "abs" && args.len() == 1 => {
            format!("|{}|", render(&args[0]))
        }
        Expr::Call(name, args) => {
            let rendered: Vec<String> = args.iter().map(render).collect();
            format!("{name}({})", rendered.join(", "))
        }
        Expr::Binary(left, op, right) => {
            let (lp, rp) = (precedence(left), precedence(right));
            match op {
                '+' => format!("{} + {}", wrap(left, lp < 1), wrap(right, rp < 1 || rp == 3)),
                '-' => format!("{} - {}", wrap(left, lp < 1), wrap(right, rp <= 1 || rp == 3)),
                '*' => format!("{}*{}", wrap(left, lp < 2), wrap(right, rp < 2 || rp == 3)),
                '/' => format!("{}/{}", wrap(left, lp < 2), wrap(right, rp <= 3)),
                '^' => format!("{}^{}", wrap(left, lp <= 5), wrap(right, rp < 6)),
                relation => format!(
                    "{} {} {}",
                    render(left),
                    relation_text(*relation),
                    render(right)
                ),
            }
        }
    }
}

fn wrap(expr: &Expr, parens: bool) -> String {
    if parens {
        format!("({})", render(expr))
    } else {
        render(expr)
    }
}

fn latex_function(name: &str) -> Option<&'static str> {
    let command = match name {
        "sin" => "\\sin",
        "cos" => "\\cos",
        "tan" => "\\tan",
        "sec" => "\\sec",
        "csc" => "\\csc",
        "cot" => "\\cot",
        "asin" | "arcsin" => "\\arcsin",
        "acos" | "arccos" => "\\arccos",
        "atan" | "arctan" => "\\arctan",
        "sinh" => "\\sinh",
        "cosh" => "\\cosh",
        "tanh" => "\\tanh",
        "coth" => "\\coth",
        "exp" => "\\exp",
        "ln" => "\\ln",
        "log" => "\\log",
        "min" => "\\min",
        "max" => "\\max",
        _ => return None,
    };
    Some(command)
}

pub fn render_markup(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => format_number(*n),
        Expr::Variable(name) if name == "pi" => "\\pi".to_string(),
        Expr::Variable(name) => name.clone(),
        Expr::Unary('!', operand) => format!("{}!", markup_wrap(operand, precedence(operand) < 6)),
        Expr::Unary(_, operand) => {
            format!("-{}", markup_wrap(operand, precedence(operand) < 2))
        }
        Expr::Call(name, args) => markup_call(name, args),
        Expr::Binary(left, op, right) => {
            let (lp, rp) = (precedence(left), precedence(right));
            match op {
                '+' => format!("{}+{}", render_markup(left), markup_wrap(right, rp == 3)),
                '-' => format!(
                    "{}-{}",
                    render_markup(left),
                    markup_wrap(right, rp <= 1 || rp == 3)
                ),
                '*' => {
                    let l = markup_wrap(left, lp < 2);
                    let r = markup_wrap(right, rp < 2 || rp == 3);
                    let implicit = matches!(**left, Expr::Number(n) if n >= 0.0)
                        && matches!(**right, Expr::Variable(_) | Expr::Call(..) | Expr::Binary(_, '^', _));
                    if implicit {
                        format!("{l}{r}")
                    } else {
                        format!("{l} \\cdot {r}")
                    }
                }
                '/' => format!("\\frac{{{}}}{{{}}}", render_markup(left), render_markup(right)),
                '^' => format!(
                    "{}^{{{}}}",
                    markup_wrap(left, lp <= 5),
                    render_markup(right)
                ),
                '≤' => format!("{} \\le {}", render_markup(left), render_markup(right)),
                '≥' => format!("{} \\ge {}", render_markup(left), render_markup(right)),
                relation => format!("{} {relation} {}", render_markup(left), render_markup(right)),
            }
        }
    }
}

fn markup_wrap(expr: &Expr, parens: bool) -> String {
    if parens {
        format!("\\left({}\\right)", render_markup(expr))
    } else {
        render_markup(expr)
    }
}

fn markup_call(name: &str, args: &[Expr]) -> String {
    match (name, args) {
        ("sqrt", [u]) => format!("\\sqrt{{{}}}", render_markup(u)),
        ("cbrt", [u]) => format!("\\sqrt[3]{{{}}}", render_markup(u)),
        ("abs", [u]) => format!("\\left|{}\\right|", render_markup(u)),
        ("exp", [u]) => format!("e^{{{}}}", render_markup(u)),
        ("log", [base, u]) => format!(
            "\\log_{{{}}}\\left({}\\right)",
            render_markup(base),
            render_markup(u)
        ),
        ("piecewise", _) => {
            let rows: Vec<String> = args
                .chunks(2)
                .map(|chunk| match chunk {
                    [value, cond] => format!("{} & {}", render_markup(value), render_markup(cond)),
                    [default] => format!("{} & \\text{{otherwise}}", render_markup(default)),
                    _ => String::new(),
                })
                .collect();
            format!("\\begin{{cases}} {} \\end{{cases}}", rows.join(" \\\\ "))
        }
        _ => {
            let head = latex_function(name)
                .map(str::to_string)
                .unwrap_or_else(|| format!("\\operatorname{{{name}}}"));
            let rendered: Vec<String> = args.iter().map(render_markup).collect();
            format!("{head}\\left({}\\right)", rendered.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{render, render_markup};
    use crate::equation_engine::parse;

    fn plain(text: &str) -> String {
        render(&parse(text).expect("parse"))
    }

    #[test]
    fn inserts_only_needed_parentheses() {
        assert_eq!(plain("x^3/3"), "x^3/3");
        assert_eq!(plain("(x+1)*(x-1)"), "(x + 1)*(x - 1)");
        assert_eq!(plain("a - (b - c)"), "a - (b - c)");
        assert_eq!(plain("(x^2)^3"), "(x^2)^3");
        assert_eq!(plain("e^(2*x)"), "e^(2*x)");
        assert_eq!(plain("-(x + 1)"), "-(x + 1)");
        assert_eq!(plain("x/(2*y)"), "x/(2*y)");
    }

    #[test]
    fn renders_absolute_value_with_bars() {
        assert_eq!(plain("ln(abs(x))"), "ln(|x|)");
    }

    #[test]
    fn plain_output_reparses_to_the_same_tree() {
        for text in ["x^3/3 - 2*sin(x)", "-(x^2)", "2^(3^2)", "x - (y + z)", "x^(-1)"] {
            let expr = parse(text).expect("parse");
            let again = parse(&render(&expr)).expect("reparse");
            assert_eq!(expr, again, "{text}");
        }
    }

    #[test]
    fn markup_uses_latex_constructs() {
        let expr = parse("sqrt(x)/2 + pi*sin(x)").expect("parse");
        assert_eq!(
            render_markup(&expr),
            "\\frac{\\sqrt{x}}{2}+\\pi \\cdot \\sin\\left(x\\right)"
        );
        assert_eq!(render_markup(&parse("3x^2").expect("parse")), "3x^{2}");
    }
}
