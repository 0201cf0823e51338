//! Uniform numeric formatting for solver output.

use std::f64::consts::PI;

/// Integers print unadorned, everything else is rounded to six decimals and
/// trimmed of trailing zeros.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let rounded = value.round();
    if (value - rounded).abs() < 1e-9 && rounded.abs() < 1e15 {
        if rounded == 0.0 {
            return "0".to_string();
        }
        return format!("{}", rounded as i64);
    }
    let text = format!("{value:.6}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" || trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Returns `(numerator, denominator)` when `value` is within `1e-9` of a
/// fraction whose denominator does not exceed `max_denominator`.
pub fn as_fraction(value: f64, max_denominator: i64) -> Option<(i64, i64)> {
    if !value.is_finite() {
        return None;
    }
    for denominator in 1..=max_denominator.max(1) {
        let numerator = (value * denominator as f64).round();
        if numerator.abs() > 1e9 {
            return None;
        }
        if (value - numerator / denominator as f64).abs() < 1e-9 {
            return Some((numerator as i64, denominator));
        }
    }
    None
}

/// Renders an angle as a multiple of pi when it sits within `1e-3` of
/// `k*pi/d` with `d <= 24`; otherwise as a decimal.
pub fn format_pi_multiple(value: f64) -> String {
    if !value.is_finite() {
        return format_number(value);
    }
    if value.abs() < 1e-9 {
        return "0".to_string();
    }
    for denominator in 1..=24i64 {
        let numerator = (value * denominator as f64 / PI).round();
        if numerator == 0.0 {
            continue;
        }
        if (value - numerator * PI / denominator as f64).abs() < 1e-3 {
            let numerator = numerator as i64;
            let head = match numerator {
                1 => "π".to_string(),
                -1 => "-π".to_string(),
                n => format!("{n}π"),
            };
            return if denominator == 1 {
                head
            } else {
                format!("{head}/{denominator}")
            };
        }
    }
    format_number(value)
}

/// Multiplies a rendered expression by a numeric factor, preferring exact
/// forms: `x^3/3`, `-2*x/5`, `3*sin(x)`.
///
/// `body_is_sum` must be set when `body` has a top-level `+` or `-`.
pub fn scaled_term(scale: f64, body: &str, body_is_sum: bool) -> String {
    if !scale.is_finite() {
        return format!("{}*{body}", format_number(scale));
    }
    if scale.abs() < 1e-12 {
        return "0".to_string();
    }
    let wrapped = if body_is_sum {
        format!("({body})")
    } else {
        body.to_string()
    };
    if (scale - 1.0).abs() < 1e-12 {
        return body.to_string();
    }
    if (scale + 1.0).abs() < 1e-12 {
        return format!("-{wrapped}");
    }
    match as_fraction(scale, 24) {
        Some((numerator, 1)) => format!("{numerator}*{wrapped}"),
        Some((1, denominator)) => format!("{wrapped}/{denominator}"),
        Some((-1, denominator)) => format!("-{wrapped}/{denominator}"),
        Some((numerator, denominator)) if numerator.abs() <= 1000 => {
            format!("{numerator}*{wrapped}/{denominator}")
        }
        _ => format!("{}*{wrapped}", format_number(scale)),
    }
}

#[cfg(test)]
mod tests {
    use super::{as_fraction, format_number, format_pi_multiple, scaled_term};
    use std::f64::consts::PI;

    #[test]
    fn integers_are_unadorned() {
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(4.000_000_000_01), "4");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn decimals_round_to_six_places_and_trim() {
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(-1.5), "-1.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn fractions_are_recovered() {
        assert_eq!(as_fraction(1.0 / 3.0, 24), Some((1, 3)));
        assert_eq!(as_fraction(-2.5, 24), Some((-5, 2)));
        assert_eq!(as_fraction(PI, 24), None);
    }

    #[test]
    fn angles_render_as_pi_fractions() {
        assert_eq!(format_pi_multiple(PI / 6.0), "π/6");
        assert_eq!(format_pi_multiple(5.0 * PI / 6.0), "5π/6");
        assert_eq!(format_pi_multiple(PI), "π");
        assert_eq!(format_pi_multiple(0.0), "0");
        assert_eq!(format_pi_multiple(0.5), "0.5");
        // 7π/22 lies within 1e-3 of 1.
        assert_eq!(format_pi_multiple(1.0), "7π/22");
    }

    #[test]
    fn scaled_terms_prefer_exact_forms() {
        assert_eq!(scaled_term(1.0, "x^3", false), "x^3");
        assert_eq!(scaled_term(1.0 / 3.0, "x^3", false), "x^3/3");
        assert_eq!(scaled_term(-1.0, "cos(x)", false), "-cos(x)");
        assert_eq!(scaled_term(0.4, "x", false), "2*x/5");
        assert_eq!(scaled_term(0.5, "x + 1", true), "(x + 1)/2");
    }
}
