//! Validation and rendering helpers for the Prometheus text exposition
//! format.
//!
//! Names are rejected, not sanitized: a metric that would serialize under a
//! different name than the caller asked for is a bug waiting to be graphed.

use std::fmt::Write as _;

use crate::error::Error;
use crate::label::LabelSet;

/// Checks a metric name against the Prometheus [data model].
///
/// [data model]: https://prometheus.io/docs/concepts/data_model/#metric-names-and-labels
pub fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if valid_name_start_character(c) => {}
        _ => return false,
    }
    chars.all(valid_name_character)
}

/// Checks a label name.
///
/// Label names share the metric name alphabet; names starting with `__` are
/// reserved for internal use by the exposition format.
pub fn valid_label_name(name: &str) -> bool {
    valid_metric_name(name) && !name.starts_with("__")
}

pub(crate) fn validate_metric_name(name: &str) -> Result<(), Error> {
    if valid_metric_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidMetricName(name.to_string()))
    }
}

pub(crate) fn validate_label_name(name: &str, reserved: Option<&str>) -> Result<(), Error> {
    if !valid_metric_name(name) {
        return Err(Error::InvalidLabelName(name.to_string()));
    }
    if name.starts_with("__") || Some(name) == reserved {
        return Err(Error::ReservedLabelName(name.to_string()));
    }
    Ok(())
}

#[inline]
fn valid_name_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_:].
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

#[inline]
fn valid_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_:].
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

/// Appends a label value with exposition-format escaping.
///
/// Backslashes and double quotes are escaped; LF, CR, and CRLF all become the
/// two-character sequence `\n` so that a metric line stays a single line.
pub(crate) fn escape_label_value(value: &str, out: &mut String) {
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            c => out.push(c),
        }
    }
}

/// Appends help text with exposition-format escaping.
///
/// Help text only escapes backslashes and line breaks; double quotes are
/// legal there.
pub(crate) fn escape_help(value: &str, out: &mut String) {
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            c => out.push(c),
        }
    }
}

/// Appends the decimal rendering of `value`.
///
/// Uses Rust's shortest-roundtrip formatting with a period decimal separator
/// regardless of locale; the three non-finite values use the spellings the
/// text format requires.
pub(crate) fn write_f64(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value == f64::INFINITY {
        out.push_str("+Inf");
    } else if value == f64::NEG_INFINITY {
        out.push_str("-Inf");
    } else {
        write!(out, "{value}").expect("writing to a String cannot fail");
    }
}

pub(crate) fn render_f64(value: f64) -> String {
    let mut out = String::new();
    write_f64(&mut out, value);
    out
}

/// Builds the precomputed wire identifier for one child metric line.
///
/// The shape is `name[_postfix]{k1="v1",…[,extra_name="extra_value"]}`, with
/// the braces omitted when there are no labels at all. `extra` carries the
/// serializer-owned label (`le` for histogram buckets, `quantile` for summary
/// objectives).
pub(crate) fn build_identifier(
    name: &str,
    postfix: Option<&str>,
    labels: &LabelSet,
    extra: Option<(&str, &str)>,
) -> String {
    let mut out = String::with_capacity(name.len() + 16);
    out.push_str(name);
    if let Some(postfix) = postfix {
        out.push('_');
        out.push_str(postfix);
    }

    if labels.is_empty() && extra.is_none() {
        return out;
    }

    out.push('{');
    labels.serialize_into(&mut out);
    if let Some((extra_name, extra_value)) = extra {
        if !labels.is_empty() {
            out.push(',');
        }
        out.push_str(extra_name);
        out.push_str("=\"");
        escape_label_value(extra_value, &mut out);
        out.push('"');
    }
    out.push('}');
    out
}

/// Appends one `identifier value\n` metric line.
pub(crate) fn write_metric_line(out: &mut String, identifier: &str, value: f64) {
    out.push_str(identifier);
    out.push(' ');
    write_f64(out, value);
    out.push('\n');
}

/// Appends one `identifier value\n` metric line with an integer value.
pub(crate) fn write_metric_line_u64(out: &mut String, identifier: &str, value: u64) {
    out.push_str(identifier);
    out.push(' ');
    write!(out, "{value}").expect("writing to a String cannot fail");
    out.push('\n');
}

/// Appends the `# HELP` / `# TYPE` header for a family.
pub(crate) fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    out.push_str("# HELP ");
    out.push_str(name);
    out.push(' ');
    escape_help(help, out);
    out.push('\n');
    out.push_str("# TYPE ");
    out.push_str(name);
    out.push(' ');
    out.push_str(kind);
    out.push('\n');
}
