//! Variable types and the widget fragments they materialize to.

use std::{borrow::Cow, fmt, str::FromStr};

use serde::{Serialize, Serializer};

const ELEMENT_ID_PREFIX: &str = "mds-";

/// Type of a placeholder variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VariableType {
    /// Button that invokes the entry point of the same name.
    Run,
    ShortText,
    Text,
    Checkbox,
    Options,
    /// Output written as raw HTML, only when raw output is allowed.
    OutRaw,
    /// Output rendered as markdown.
    OutMd,
    /// Anything else. Kept so positional substitution stays aligned, renders
    /// to nothing.
    Unknown(String),
}

impl VariableType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Run => "run",
            Self::ShortText => "shorttext",
            Self::Text => "text",
            Self::Checkbox => "checkbox",
            Self::Options => "options",
            Self::OutRaw => "outraw",
            Self::OutMd => "outmd",
            Self::Unknown(raw) => raw,
        }
    }

    /// Whether the widget's value is passed to entry points.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        matches!(
            self,
            Self::ShortText | Self::Text | Self::Checkbox | Self::Options
        )
    }

    #[must_use]
    pub const fn is_output(&self) -> bool {
        matches!(self, Self::OutRaw | Self::OutMd)
    }

    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl FromStr for VariableType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "run" => Self::Run,
            "shorttext" => Self::ShortText,
            "text" => Self::Text,
            "checkbox" => Self::Checkbox,
            "options" => Self::Options,
            "outraw" => Self::OutRaw,
            "outmd" => Self::OutMd,
            other => Self::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for VariableType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Parsed placeholder, immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    #[serde(rename = "type")]
    pub ty: VariableType,
    pub data: String,
    pub fragment: String,
    pub element_id: String,
}

impl Descriptor {
    #[must_use]
    pub fn new(name: &str, ty: VariableType, data: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            fragment: fragment(name, &ty, &data),
            element_id: element_id(name),
            ty,
            data,
        }
    }
}

/// Element id of the widget for `name`.
#[must_use]
pub fn element_id(name: &str) -> String {
    format!("{ELEMENT_ID_PREFIX}{name}")
}

/// HTML fragment for one variable.
#[must_use]
pub fn fragment(name: &str, ty: &VariableType, data: &str) -> String {
    let id = escape_attr(&element_id(name)).into_owned();
    match ty {
        VariableType::Run => format!(r#"<button id="{id}">{data}</button>"#),
        VariableType::ShortText => {
            format!(
                r#"<input type="text" id="{id}" value="{}">"#,
                escape_attr(data)
            )
        }
        VariableType::Text => format!(r#"<textarea id="{id}">{data}</textarea>"#),
        VariableType::Checkbox => {
            let checked = if is_checked_seed(data) { " checked" } else { "" };
            format!(r#"<input type="checkbox" id="{id}"{checked}>"#)
        }
        VariableType::Options => {
            let mut html = format!(r#"<select id="{id}">"#);
            if !data.is_empty() {
                for option in data.split(',') {
                    let value = escape_attr(option);
                    html.push_str(&format!(r#"<option value="{value}">{option}</option>"#));
                }
            }
            html.push_str("</select>");
            html
        }
        VariableType::OutRaw | VariableType::OutMd => {
            format!(r#"<div id="{id}">{data}</div>"#)
        }
        VariableType::Unknown(_) => String::new(),
    }
}

/// Checkbox seed: checked when the data reads as a non-zero number.
fn is_checked_seed(data: &str) -> bool {
    let n = js_number(data);
    n != 0.0 && !n.is_nan()
}

/// Numeric value of a string the way JavaScript's `Number()` reads it:
/// blank is zero, `0x`/`0o`/`0b` prefixes select a radix, `Infinity` is
/// spelled out and anything else that is not a decimal literal is `NaN`.
fn js_number(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s.strip_prefix(['+', '-']).unwrap_or(s) {
        "Infinity" if s.starts_with('-') => return f64::NEG_INFINITY,
        "Infinity" => return f64::INFINITY,
        _ => {}
    }
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        let digits = s
            .strip_prefix(prefix)
            .or_else(|| s.strip_prefix(&prefix.to_uppercase()));
        if let Some(digits) = digits {
            if digits.is_empty() {
                return f64::NAN;
            }
            return digits
                .chars()
                .try_fold(0.0, |acc, c| {
                    c.to_digit(radix)
                        .map(|d| acc * f64::from(radix) + f64::from(d))
                })
                .unwrap_or(f64::NAN);
        }
    }
    // Rust also accepts `inf` and `nan`, which `Number()` does not.
    if !s
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    s.parse().unwrap_or(f64::NAN)
}

pub(crate) fn escape_attr(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['&', '"', '<', '>']) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

pub(crate) fn unescape_attr(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    Cow::Owned(
        raw.replace("&quot;", "\"")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}
