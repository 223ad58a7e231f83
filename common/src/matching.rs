//! Request evaluation against an HTTPRoute
//!
//! Applies Gateway API matching precedence and request header filters to a
//! route spec without a data plane. Used to check that a synthesized route
//! sends a given request where the Ingress intends it to go.

use crate::route::{
    HTTPRouteRules, HTTPRouteRulesMatches, HTTPRouteRulesMatchesHeadersType,
    HTTPRouteRulesMatchesPathType, HTTPRouteSpec,
};
use std::collections::BTreeMap;

/// Minimal request view: host, path, and headers in arrival order
#[derive(Debug, Clone, Default)]
pub struct RequestView {
    pub host: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RequestView {
    pub fn new(host: &str, path: &str) -> Self {
        Self {
            host: host.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Check a request host against route hostnames (exact or `*.` wildcard)
pub fn host_matches(hostnames: &[String], host: &str) -> bool {
    if hostnames.is_empty() {
        return true;
    }
    let host = host.to_ascii_lowercase();
    hostnames.iter().any(|h| match h.strip_prefix("*.") {
        Some(suffix) => host
            .strip_suffix(suffix)
            .map(|label| label.len() > 1 && label.ends_with('.'))
            .unwrap_or(false),
        None => h.eq_ignore_ascii_case(&host),
    })
}

/// Element-wise prefix match: `/foo` matches `/foo` and `/foo/bar`, not `/foobar`
fn path_prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Ranking key for a matched predicate; greater wins
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Precedence {
    exact_path: bool,
    path_len: usize,
    header_count: usize,
}

fn evaluate_match(m: &HTTPRouteRulesMatches, req: &RequestView) -> Option<Precedence> {
    let (exact_path, path_len) = match &m.path {
        Some(p) => {
            // Unset fields take the API server defaults
            let value = p.value.as_deref().unwrap_or("/");
            let ok = match p.r#type {
                Some(HTTPRouteRulesMatchesPathType::Exact) => value == req.path,
                None | Some(HTTPRouteRulesMatchesPathType::PathPrefix) => {
                    path_prefix_matches(value, &req.path)
                }
                // Regex paths are never synthesized
                Some(HTTPRouteRulesMatchesPathType::RegularExpression) => false,
            };
            if !ok {
                return None;
            }
            let exact = matches!(p.r#type, Some(HTTPRouteRulesMatchesPathType::Exact));
            (exact, value.len())
        }
        None => (false, 1),
    };

    let headers = m.headers.as_deref().unwrap_or_default();
    for h in headers {
        let value = req.header_value(&h.name)?;
        let ok = match h.r#type {
            None | Some(HTTPRouteRulesMatchesHeadersType::Exact) => value == h.value,
            Some(HTTPRouteRulesMatchesHeadersType::RegularExpression) => false,
        };
        if !ok {
            return None;
        }
    }

    Some(Precedence {
        exact_path,
        path_len,
        header_count: headers.len(),
    })
}

/// Select the rule that serves `req`, following Gateway API precedence
///
/// Exact paths beat prefixes, longer prefixes beat shorter ones, more header
/// predicates beat fewer; remaining ties go to the earlier rule.
pub fn select_rule<'a>(spec: &'a HTTPRouteSpec, req: &RequestView) -> Option<&'a HTTPRouteRules> {
    if !host_matches(spec.hostnames.as_deref().unwrap_or_default(), &req.host) {
        return None;
    }

    let rules = spec.rules.as_deref().unwrap_or_default();
    let mut best: Option<(Precedence, usize)> = None;
    for (idx, rule) in rules.iter().enumerate() {
        let matches = rule.matches.as_deref().unwrap_or_default();
        let candidates: Vec<Precedence> = if matches.is_empty() {
            vec![Precedence {
                exact_path: false,
                path_len: 1,
                header_count: 0,
            }]
        } else {
            matches
                .iter()
                .filter_map(|m| evaluate_match(m, req))
                .collect()
        };

        for candidate in candidates {
            let better = match &best {
                None => true,
                Some((current, _)) => candidate > *current,
            };
            if better {
                best = Some((candidate, idx));
            }
        }
    }

    best.map(|(_, idx)| &rules[idx])
}

/// Headers as seen by the backend at `backend_idx` after filters ran
///
/// Rule filters apply first, then the backend's own filters. Names are
/// lowercased; each entry keeps every value the header carries.
pub fn forwarded_headers(
    rule: &HTTPRouteRules,
    backend_idx: usize,
    req: &RequestView,
) -> BTreeMap<String, Vec<String>> {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &req.headers {
        headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.clone());
    }

    // Route and backend filters are distinct generated types with the same
    // shape; flatten both to (set, add, remove) lists in application order.
    let mut modifiers: Vec<HeaderEdits> = Vec::new();
    for filter in rule.filters.as_deref().unwrap_or_default() {
        if let Some(m) = &filter.request_header_modifier {
            modifiers.push(HeaderEdits {
                set: pairs(m.set.iter().flatten().map(|h| (&h.name, &h.value))),
                add: pairs(m.add.iter().flatten().map(|h| (&h.name, &h.value))),
                remove: m.remove.clone().unwrap_or_default(),
            });
        }
    }
    let backend = rule
        .backend_refs
        .as_deref()
        .unwrap_or_default()
        .get(backend_idx);
    for filter in backend.and_then(|b| b.filters.as_deref()).unwrap_or_default() {
        if let Some(m) = &filter.request_header_modifier {
            modifiers.push(HeaderEdits {
                set: pairs(m.set.iter().flatten().map(|h| (&h.name, &h.value))),
                add: pairs(m.add.iter().flatten().map(|h| (&h.name, &h.value))),
                remove: m.remove.clone().unwrap_or_default(),
            });
        }
    }

    for edits in modifiers {
        for (name, value) in edits.set {
            headers.insert(name.to_ascii_lowercase(), vec![value]);
        }
        for (name, value) in edits.add {
            headers
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value);
        }
        for name in edits.remove {
            headers.remove(&name.to_ascii_lowercase());
        }
    }

    headers
}

struct HeaderEdits {
    set: Vec<(String, String)>,
    add: Vec<(String, String)>,
    remove: Vec<String>,
}

fn pairs<'a>(iter: impl Iterator<Item = (&'a String, &'a String)>) -> Vec<(String, String)> {
    iter.map(|(n, v)| (n.clone(), v.clone())).collect()
}
