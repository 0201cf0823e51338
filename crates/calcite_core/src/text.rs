//! Bracket-aware helpers for splitting expression text.

fn depth_delta(c: char) -> i32 {
    match c {
        '(' | '[' | '{' => 1,
        ')' | ']' | '}' => -1,
        _ => 0,
    }
}

/// Splits `text` on any of `separators` that occur outside brackets.
/// Pieces are trimmed; empty pieces are kept so callers can reject them.
pub fn split_top_level(text: &str, separators: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        depth += depth_delta(c);
        if depth == 0 && separators.contains(&c) {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    parts.push(current.trim().to_string());
    parts
}

/// Byte index of the first `target` outside brackets.
pub fn find_top_level(text: &str, target: char) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, c) in text.char_indices() {
        if depth == 0 && c == target {
            return Some(idx);
        }
        depth += depth_delta(c);
    }
    None
}

/// Byte index of the last `target` outside brackets.
pub fn rfind_top_level(text: &str, target: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut found = None;
    for (idx, c) in text.char_indices() {
        if depth == 0 && c == target {
            found = Some(idx);
        }
        depth += depth_delta(c);
    }
    found
}

/// Byte index of the bracket closing the one opened at `open`.
pub fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, c) in text[open..].char_indices() {
        depth += depth_delta(c);
        if depth == 0 {
            return Some(open + idx);
        }
    }
    None
}

/// Removes one pair of parentheses wrapping the whole text, if present.
pub fn strip_outer_parens(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('(') && matching_close(trimmed, 0) == Some(trimmed.len() - 1) {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Parses `name(arg, arg, ...)` spanning the whole text.
pub fn split_call(text: &str) -> Option<(String, Vec<String>)> {
    let trimmed = text.trim();
    let open = trimmed.find('(')?;
    let name = trimmed[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    if matching_close(trimmed, open)? != trimmed.len() - 1 {
        return None;
    }
    let inner = &trimmed[open + 1..trimmed.len() - 1];
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        split_top_level(inner, &[','])
    };
    Some((name.to_string(), args))
}

/// Splits into signed top-level additive terms: `"3*x^2-sin(x)"` yields
/// `[(false, "3*x^2"), (true, "sin(x)")]`. Signs inside brackets, after an
/// operator, or in a decimal exponent (`2e-3`) do not split.
pub fn split_terms(text: &str) -> Vec<(bool, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut terms = Vec::new();
    let mut depth = 0i32;
    let mut negative = false;
    let mut current = String::new();
    for (idx, &c) in chars.iter().enumerate() {
        depth += depth_delta(c);
        if depth == 0 && (c == '+' || c == '-') {
            let prev = current.trim_end().chars().last();
            let is_exponent = matches!(prev, Some('e') | Some('E'))
                && current.trim_end().len() >= 2
                && current
                    .trim_end()
                    .chars()
                    .rev()
                    .nth(1)
                    .map_or(false, |p| p.is_ascii_digit())
                && chars.get(idx + 1).map_or(false, |n| n.is_ascii_digit());
            let after_operator = match prev {
                None => true,
                Some(p) => matches!(p, '^' | '*' | '/' | '(' | ',' | '<' | '>' | '='),
            };
            if after_operator {
                if current.trim().is_empty() && prev.is_none() {
                    if c == '-' {
                        negative = !negative;
                    }
                } else {
                    current.push(c);
                }
                continue;
            }
            if is_exponent {
                current.push(c);
                continue;
            }
            terms.push((negative, current.trim().to_string()));
            current.clear();
            negative = c == '-';
            continue;
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        terms.push((negative, current.trim().to_string()));
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::{find_top_level, split_call, split_terms, split_top_level, strip_outer_parens};

    #[test]
    fn splits_only_outside_brackets() {
        let parts = split_top_level("x+2*y=5, max(x,1)=3; [1, 2]", &[',', ';']);
        assert_eq!(parts, vec!["x+2*y=5", "max(x,1)=3", "[1, 2]"]);
    }

    #[test]
    fn finds_top_level_equals() {
        assert_eq!(find_top_level("f(a=1)=2", '='), Some(6));
        assert_eq!(find_top_level("x+1", '='), None);
    }

    #[test]
    fn strips_only_wrapping_parens() {
        assert_eq!(strip_outer_parens("(x+1)"), "x+1");
        assert_eq!(strip_outer_parens("(x+1)*(x-1)"), "(x+1)*(x-1)");
    }

    #[test]
    fn parses_calls() {
        let (name, args) = split_call("int(x^2, x, 0, 1)").expect("call");
        assert_eq!(name, "int");
        assert_eq!(args, vec!["x^2", "x", "0", "1"]);
        assert!(split_call("(x)+f(x)").is_none());
        assert!(split_call("f(x)+g(x)").is_none());
    }

    #[test]
    fn splits_signed_terms() {
        let terms = split_terms("-3*x^2+sin(x-1)-2e-3*x^-1");
        assert_eq!(
            terms,
            vec![
                (true, "3*x^2".to_string()),
                (false, "sin(x-1)".to_string()),
                (true, "2e-3*x^-1".to_string()),
            ]
        );
    }
}
