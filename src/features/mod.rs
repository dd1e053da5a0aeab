pub mod html;
pub mod url;

use std::fmt;

pub const FETCH_STATUS: &str = "fetch_status";
pub const SEMANTIC_STATUS: &str = "semantic_status";
pub const PROCESSED_AT: &str = "processed_at";

/// Written into text columns when a value could not be derived.
pub const TEXT_DEFAULT: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureColumn {
    pub name: &'static str,
    pub kind: FeatureKind,
}

const fn numeric(name: &'static str) -> FeatureColumn {
    FeatureColumn { name, kind: FeatureKind::Numeric }
}

const fn text(name: &'static str) -> FeatureColumn {
    FeatureColumn { name, kind: FeatureKind::Text }
}

impl FeatureColumn {
    pub fn default_value(&self) -> FeatureValue {
        match self.kind {
            FeatureKind::Numeric => FeatureValue::Number(0.0),
            FeatureKind::Text => FeatureValue::Text(TEXT_DEFAULT.to_string()),
        }
    }
}

/// Bookkeeping columns, recorded for every attempted row.
pub const STATUS_COLUMNS: &[&str] = &[FETCH_STATUS, SEMANTIC_STATUS, PROCESSED_AT];

pub const URL_COLUMNS: &[FeatureColumn] = &[
    numeric("length_url"),
    numeric("length_hostname"),
    numeric("ip"),
    numeric("nb_dots"),
    numeric("nb_hyphens"),
    numeric("nb_at"),
    numeric("nb_qm"),
    numeric("nb_and"),
    numeric("nb_or"),
    numeric("nb_eq"),
    numeric("nb_underscore"),
    numeric("nb_tilde"),
    numeric("nb_percent"),
    numeric("nb_slash"),
    numeric("nb_star"),
    numeric("nb_colon"),
    numeric("nb_comma"),
    numeric("nb_semicolumn"),
    numeric("nb_dollar"),
    numeric("nb_space"),
    numeric("nb_www"),
    numeric("nb_com"),
    numeric("nb_dslash"),
    numeric("http_in_path"),
    numeric("https_token"),
    numeric("ratio_digits_url"),
    numeric("ratio_digits_host"),
    numeric("punycode"),
    numeric("port"),
    numeric("tld_in_path"),
    numeric("tld_in_subdomain"),
    numeric("abnormal_subdomain"),
    numeric("nb_subdomains"),
    numeric("prefix_suffix"),
    numeric("path_extension"),
    numeric("length_words_raw"),
    numeric("char_repeat"),
    numeric("shortest_word_host"),
    numeric("shortest_word_path"),
    numeric("longest_words_raw"),
    numeric("longest_word_host"),
    numeric("longest_word_path"),
    numeric("avg_words_raw"),
    numeric("avg_word_host"),
    numeric("avg_word_path"),
];

pub const HTML_COLUMNS: &[FeatureColumn] = &[
    numeric("phish_hints"),
    numeric("domain_in_brand"),
    numeric("nb_hyperlinks"),
    numeric("ratio_intHyperlinks"),
    numeric("ratio_extHyperlinks"),
    numeric("ratio_extRedirection"),
    numeric("ratio_extErrors"),
    numeric("external_favicon"),
    numeric("links_in_tags"),
    numeric("ratio_extMedia"),
    numeric("safe_anchor"),
    numeric("empty_title"),
    numeric("domain_in_title"),
    numeric("domain_with_copyright"),
    numeric("has_meta_refresh"),
    numeric("has_js_redirect"),
    numeric("feature_extracted"),
];

pub const SEMANTIC_COLUMNS: &[FeatureColumn] = &[
    numeric("creates_urgency"),
    numeric("uses_threats"),
    numeric("requests_sensitive_info"),
    numeric("offers_unrealistic_rewards"),
    numeric("has_spelling_grammar_errors"),
    text("impersonated_brand"),
    numeric("language_professionalism_score"),
    numeric("overall_phishing_likelihood_score"),
    text("summary_of_intent"),
];

/// Every column the pipeline adds to a dataset, in the order they are appended.
pub fn schema_columns() -> Vec<&'static str> {
    STATUS_COLUMNS
        .iter()
        .copied()
        .chain(URL_COLUMNS.iter().map(|c| c.name))
        .chain(HTML_COLUMNS.iter().map(|c| c.name))
        .chain(SEMANTIC_COLUMNS.iter().map(|c| c.name))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Text(String),
}

impl FeatureValue {
    pub fn flag(on: bool) -> Self {
        FeatureValue::Number(if on { 1.0 } else { 0.0 })
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            FeatureValue::Text(_) => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Number(n) => write!(f, "{}", n),
            FeatureValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<usize> for FeatureValue {
    fn from(n: usize) -> Self {
        FeatureValue::Number(n as f64)
    }
}

impl From<f64> for FeatureValue {
    fn from(n: f64) -> Self {
        FeatureValue::Number(n)
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        FeatureValue::Text(s.to_string())
    }
}

impl From<bool> for FeatureValue {
    fn from(on: bool) -> Self {
        FeatureValue::flag(on)
    }
}

/// A fixed set of named values. Built from a column group's defaults, so every
/// vector of the same group has the same keys in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<(&'static str, FeatureValue)>,
}

impl FeatureVector {
    pub fn defaults(columns: &[FeatureColumn]) -> Self {
        FeatureVector {
            values: columns.iter().map(|c| (c.name, c.default_value())).collect(),
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<FeatureValue>) {
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value.into(),
            None => debug_assert!(false, "unknown feature column: {}", name),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FeatureValue)> {
        self.values.iter().map(|(n, v)| (*n, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn schema_has_no_duplicate_columns() {
        let cols = schema_columns();
        let unique: HashSet<_> = cols.iter().collect();
        assert_eq!(cols.len(), unique.len());
    }

    #[test]
    fn defaults_follow_column_kind() {
        let v = FeatureVector::defaults(SEMANTIC_COLUMNS);
        assert_eq!(v.get("uses_threats"), Some(&FeatureValue::Number(0.0)));
        assert_eq!(
            v.get("impersonated_brand"),
            Some(&FeatureValue::Text("N/A".into()))
        );
        assert_eq!(v.len(), SEMANTIC_COLUMNS.len());
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(FeatureValue::Number(0.0).to_string(), "0");
        assert_eq!(FeatureValue::Number(0.25).to_string(), "0.25");
        assert_eq!(FeatureValue::flag(true).to_string(), "1");
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut v = FeatureVector::defaults(HTML_COLUMNS);
        v.set("nb_hyperlinks", 7usize);
        assert_eq!(v.get("nb_hyperlinks").and_then(FeatureValue::as_number), Some(7.0));
        assert_eq!(v.iter().next().map(|(n, _)| n), Some("phish_hints"));
    }
}
