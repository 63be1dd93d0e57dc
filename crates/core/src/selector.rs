//! Equality-based label selectors.
//!
//! A selector is either *absent* (selects nothing) or a set of required
//! `key=value` pairs. An empty pair set selects everything. The two are kept
//! apart on purpose: an absent selector must never widen into a wildcard.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kubernetes labels as an ordered key/value map.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Selector {
    /// Absent selector: matches no labels at all.
    Nothing,
    /// Required pairs; every pair must be present in the target labels.
    Equals(Labels),
}

impl Selector {
    /// Selector with no requirements (matches everything).
    pub fn everything() -> Self { Selector::Equals(Labels::new()) }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Selector::Equals(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Map an optional label map (as found on API objects) into a selector.
    /// `None` stays absent; `Some(map)` keeps its pairs, even when empty.
    pub fn from_optional(labels: Option<&Labels>) -> Self {
        match labels {
            Some(l) => Selector::Equals(l.clone()),
            None => Selector::Nothing,
        }
    }

    pub fn is_nothing(&self) -> bool { matches!(self, Selector::Nothing) }

    pub fn matches(&self, labels: &Labels) -> bool { matches(labels, self) }

    /// Render in label-selector query syntax (`k1=v1,k2=v2`).
    /// Returns `None` for the absent selector, which has no query form.
    pub fn to_query(&self) -> Option<String> {
        match self {
            Selector::Nothing => None,
            Selector::Equals(req) => Some(
                req.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(","),
            ),
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_query() {
            None => write!(f, "<none>"),
            Some(q) if q.is_empty() => write!(f, "<all>"),
            Some(q) => write!(f, "{}", q),
        }
    }
}

/// Decide whether `labels` satisfy `selector`.
pub fn matches(labels: &Labels, selector: &Selector) -> bool {
    match selector {
        Selector::Nothing => false,
        Selector::Equals(req) => is_superset_of(labels, req),
    }
}

/// True when `labels` carry every pair of `required` with an equal value.
pub fn is_superset_of(labels: &Labels, required: &Labels) -> bool {
    required.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_selector_matches_any_labels() {
        assert!(matches(&Labels::new(), &Selector::everything()));
        assert!(matches(&labels(&[("app", "x"), ("tier", "web")]), &Selector::everything()));
    }

    #[test]
    fn absent_selector_matches_nothing() {
        assert!(!matches(&Labels::new(), &Selector::Nothing));
        assert!(!matches(&labels(&[("app", "x")]), &Selector::Nothing));
    }

    #[test]
    fn requires_every_pair_and_ignores_extra_keys() {
        let sel = Selector::from_pairs([("app", "x"), ("tier", "web")]);
        assert!(sel.matches(&labels(&[("app", "x"), ("tier", "web"), ("extra", "1")])));
        assert!(!sel.matches(&labels(&[("app", "x")])));
        assert!(!sel.matches(&labels(&[("app", "x"), ("tier", "db")])));
    }

    #[test]
    fn value_comparison_is_exact() {
        let sel = Selector::from_pairs([("app", "x")]);
        assert!(!sel.matches(&labels(&[("app", "X")])));
        assert!(!sel.matches(&labels(&[("app", "")])));
    }

    #[test]
    fn from_optional_keeps_absent_and_empty_apart() {
        assert_eq!(Selector::from_optional(None), Selector::Nothing);
        assert_eq!(Selector::from_optional(Some(&Labels::new())), Selector::everything());
    }

    #[test]
    fn query_rendering() {
        assert_eq!(Selector::Nothing.to_query(), None);
        assert_eq!(Selector::everything().to_query().as_deref(), Some(""));
        let sel = Selector::from_pairs([("tier", "web"), ("app", "x")]);
        assert_eq!(sel.to_query().as_deref(), Some("app=x,tier=web"));
        assert_eq!(sel.to_string(), "app=x,tier=web");
        assert_eq!(Selector::Nothing.to_string(), "<none>");
    }

    #[test]
    fn superset_relation() {
        let a = labels(&[("app", "x"), ("tier", "web")]);
        assert!(is_superset_of(&a, &labels(&[("app", "x")])));
        assert!(is_superset_of(&a, &Labels::new()));
        assert!(!is_superset_of(&labels(&[("app", "x")]), &a));
    }
}
