//! Placeholder extraction: `{{type:name:data}}` tokens to descriptors.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::{
    error::{Error, Result},
    variable::{Descriptor, VariableType},
};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{.*?\}\}").expect("placeholder pattern is valid"));

/// Descriptors of one document, in first-occurrence order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Variables(IndexMap<String, Descriptor>);

impl Variables {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Descriptor> {
        self.0.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Name/descriptor pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Descriptor)> {
        self.0.iter().map(|(name, desc)| (name.as_str(), desc))
    }

    /// Names of all `run` variables, in document order. These are the entry
    /// points the logic section has to expose.
    #[must_use]
    pub fn entry_points(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, desc)| desc.ty == VariableType::Run)
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Fragments in document order, one per placeholder occurrence.
    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        self.0.values().map(|desc| desc.fragment.as_str())
    }

    fn insert(&mut self, name: String, desc: Descriptor) -> Result<()> {
        if self.0.contains_key(&name) {
            return Err(Error::DuplicateVariable { name });
        }
        self.0.insert(name, desc);
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Variables {
    type Item = (&'a String, &'a Descriptor);
    type IntoIter = indexmap::map::Iter<'a, String, Descriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parse every placeholder in `markup`.
///
/// # Errors
/// [`Error::DuplicateVariable`] when two placeholders share a name and
/// [`Error::MalformedPlaceholder`] when a token has no name.
pub fn extract(markup: &str) -> Result<Variables> {
    let mut vars = Variables::default();
    for token in tokens(markup) {
        let (ty, name, data) = split_token(token)?;
        let ty: VariableType = ty.parse().unwrap_or_else(|e| match e {});
        if !ty.is_known() {
            debug!(%name, %ty, "unknown variable type, widget will be empty");
        }
        let desc = Descriptor::new(name, ty, data);
        vars.insert(name.to_string(), desc)?;
    }
    Ok(vars)
}

/// All placeholder tokens, delimiters included, left to right.
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER.find_iter(text).map(|m| m.as_str())
}

fn split_token(token: &str) -> Result<(&str, &str, &str)> {
    let inner = token
        .strip_prefix("{{")
        .and_then(|t| t.strip_suffix("}}"))
        .unwrap_or(token);
    // Stray braces inside the delimiters (`{{{text:a}}}`) are not part of the fields.
    let inner = inner.trim_matches(|c| c == '{' || c == '}');

    let mut fields = inner.splitn(3, ':');
    let ty = fields.next().unwrap_or_default();
    let name = fields.next().unwrap_or_default();
    let data = fields.next().unwrap_or_default();
    if name.is_empty() {
        return Err(Error::MalformedPlaceholder {
            token: token.to_string(),
        });
    }
    Ok((ty, name, data))
}

/// Replace placeholder occurrences in `rendered` with `fragments`, pairing the
/// i-th remaining occurrence with the i-th fragment.
///
/// Scanning resumes after each inserted fragment, so a fragment that happens
/// to contain placeholder syntax is never substituted again. Occurrences left
/// over once `fragments` is exhausted are kept as-is.
#[must_use]
pub fn substitute<'a>(rendered: &str, fragments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::with_capacity(rendered.len());
    let mut cursor = 0;
    for fragment in fragments {
        let Some(m) = PLACEHOLDER.find_at(rendered, cursor) else {
            break;
        };
        out.push_str(&rendered[cursor..m.start()]);
        out.push_str(fragment);
        cursor = m.end();
    }
    out.push_str(&rendered[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_in_first_occurrence_order() {
        let vars = extract("a {{text:zeta}} b {{run:go:Go}} c {{outmd:alpha}}").expect("parse");
        let names: Vec<_> = vars.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["zeta", "go", "alpha"]);
        assert_eq!(vars.entry_points(), ["go"]);
    }

    #[test]
    fn n_placeholders_give_n_distinct_ids() {
        let markup = (0..25)
            .map(|i| format!("{{{{shorttext:v{i}:x}}}}"))
            .collect::<Vec<_>>()
            .join(" ");
        let vars = extract(&markup).expect("parse");
        assert_eq!(vars.len(), 25);
        let mut ids: Vec<_> = vars.iter().map(|(_, d)| d.element_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 25);
    }

    #[test]
    fn duplicate_names_fail_regardless_of_type() {
        for doc in [
            "{{text:a}} {{text:a}}",
            "{{run:a:Go}} {{outmd:a}}",
            "{{bogus:a}} {{checkbox:a:1}}",
        ] {
            let err = extract(doc).expect_err("duplicate");
            assert!(
                matches!(&err, Error::DuplicateVariable { name } if name == "a"),
                "{doc}: {err}"
            );
            assert!(err.is_parse_error());
        }
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let vars = extract("{{outmd:result}}").expect("parse");
        let desc = vars.get("result").expect("result");
        assert_eq!(desc.ty, VariableType::OutMd);
        assert_eq!(desc.data, "");
    }

    #[test]
    fn data_may_contain_colons() {
        let vars = extract("{{outraw:link:<a href=\"https://x\">x</a>}}").expect("parse");
        assert_eq!(
            vars.get("link").expect("link").data,
            "<a href=\"https://x\">x</a>"
        );
    }

    #[test]
    fn tokens_without_name_are_malformed() {
        for doc in ["{{text}}", "{{}}", "{{text::x}}"] {
            assert!(
                matches!(extract(doc), Err(Error::MalformedPlaceholder { .. })),
                "{doc}"
            );
        }
    }

    #[test]
    fn unknown_types_still_produce_descriptors() {
        let vars = extract("{{slider:s:5}}").expect("parse");
        let desc = vars.get("s").expect("s");
        assert_eq!(desc.ty, VariableType::Unknown("slider".into()));
        assert!(desc.fragment.is_empty());
    }

    #[test]
    fn no_placeholders_is_empty() {
        assert!(extract("plain *markdown*").expect("parse").is_empty());
    }

    #[test]
    fn substitution_is_positional() {
        let out = substitute("<p>{{x:1}} and {{y:2}}</p>", ["A", "B"]);
        assert_eq!(out, "<p>A and B</p>");
    }

    #[test]
    fn substitution_ignores_token_text() {
        // Rendering may escape token contents; only position matters.
        let out = substitute("{{text:q:&quot;a&quot;}}|{{run:go}}", ["first", "second"]);
        assert_eq!(out, "first|second");
    }

    #[test]
    fn substitution_does_not_rescan_fragments() {
        let out = substitute("{{a:1}} {{b:2}}", ["<i>{{z:z}}</i>", "B"]);
        assert_eq!(out, "<i>{{z:z}}</i> B");
    }

    #[test]
    fn substitution_keeps_extra_occurrences() {
        assert_eq!(substitute("{{a:1}} {{a:1}}", ["X"]), "X {{a:1}}");
        assert_eq!(substitute("none here", ["X"]), "none here");
    }
}
