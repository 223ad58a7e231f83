// Route contract tests
//
// The HTTPRoute and Ingress documents here are shaped like what the API
// server returns. They pin the wire format the controller writes and the
// request outcome a conformant gateway derives from it.

use common::matching::{forwarded_headers, select_rule, RequestView};
use common::route::{parent_condition, refers_to_same, HTTPRouteRules};
use common::{route_name, HTTPRoute, Ingress, Visibility, TAG_HEADER};
use serde_json::json;

fn tagged_route() -> HTTPRoute {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "HTTPRoute",
        "metadata": {
            "name": "hello-ext-0123456789abcdef",
            "namespace": "default",
            "labels": {
                "ingress.netgate.dev/name": "hello",
                "ingress.netgate.dev/namespace": "default"
            }
        },
        "spec": {
            "parentRefs": [{
                "group": "gateway.networking.k8s.io",
                "kind": "Gateway",
                "namespace": "gw-system",
                "name": "external",
                "sectionName": "http"
            }],
            "hostnames": ["hello.example.com"],
            "rules": [
                {
                    "matches": [{
                        "path": {"type": "PathPrefix", "value": "/"},
                        "headers": [{"type": "Exact", "name": TAG_HEADER, "value": "canary"}]
                    }],
                    "backendRefs": [{
                        "group": "", "kind": "Service",
                        "name": "hello-00002", "namespace": "default", "port": 80, "weight": 100
                    }]
                },
                {
                    "matches": [{"path": {"type": "PathPrefix", "value": "/"}}],
                    "filters": [{
                        "type": "RequestHeaderModifier",
                        "requestHeaderModifier": {"set": [{"name": "K-Serving-Revision", "value": "split"}]}
                    }],
                    "backendRefs": [
                        {
                            "group": "", "kind": "Service",
                            "name": "hello-00001", "namespace": "default", "port": 80, "weight": 90,
                            "filters": [{
                                "type": "RequestHeaderModifier",
                                "requestHeaderModifier": {"set": [{"name": "K-Serving-Revision", "value": "hello-00001"}]}
                            }]
                        },
                        {
                            "group": "", "kind": "Service",
                            "name": "hello-00002", "namespace": "default", "port": 80, "weight": 10
                        }
                    ]
                }
            ]
        },
        "status": {
            "parents": [{
                "parentRef": {"namespace": "gw-system", "name": "external", "sectionName": "http"},
                "controllerName": "vendor-x.io/gateway",
                "conditions": [{
                    "type": "Accepted", "status": "True", "reason": "Accepted",
                    "message": "", "observedGeneration": 3,
                    "lastTransitionTime": "2026-01-01T00:00:00Z"
                }]
            }]
        }
    }))
    .expect("HTTPRoute document")
}

fn backend_names(rule: &HTTPRouteRules) -> Vec<&str> {
    rule.backend_refs
        .iter()
        .flatten()
        .map(|b| b.name.as_str())
        .collect()
}

#[test]
fn test_tag_header_selects_tagged_rule() {
    let route = tagged_route();

    let tagged = RequestView::new("hello.example.com", "/api").header(TAG_HEADER, "canary");
    let rule = select_rule(&route.spec, &tagged).expect("tagged request matches");
    assert_eq!(backend_names(rule), vec!["hello-00002"]);

    let untagged = RequestView::new("hello.example.com", "/api");
    let rule = select_rule(&route.spec, &untagged).expect("untagged request matches");
    assert_eq!(backend_names(rule), vec!["hello-00001", "hello-00002"]);

    let unknown_tag = RequestView::new("hello.example.com", "/").header(TAG_HEADER, "blue");
    let rule = select_rule(&route.spec, &unknown_tag).expect("unknown tag falls through");
    assert_eq!(backend_names(rule)[0], "hello-00001");
}

#[test]
fn test_other_hosts_do_not_match() {
    let route = tagged_route();
    assert!(select_rule(&route.spec, &RequestView::new("bye.example.com", "/")).is_none());
}

#[test]
fn test_backend_filter_overrides_rule_filter() {
    let route = tagged_route();
    let req = RequestView::new("hello.example.com", "/").header("K-Serving-Revision", "client");
    let rule = select_rule(&route.spec, &req).unwrap();

    let first = forwarded_headers(rule, 0, &req);
    assert_eq!(first["k-serving-revision"], vec!["hello-00001".to_string()]);

    let second = forwarded_headers(rule, 1, &req);
    assert_eq!(second["k-serving-revision"], vec!["split".to_string()]);
}

#[test]
fn test_route_status_parses_observed_generation() {
    let route = tagged_route();
    let parent = &route.status.as_ref().unwrap().parents[0];
    let accepted = parent_condition(parent, "Accepted").unwrap();
    assert_eq!(accepted.status, "True");
    assert_eq!(accepted.observed_generation, Some(3));
    let desired = &route.spec.parent_refs.as_ref().unwrap()[0];
    assert!(refers_to_same(desired, &parent.parent_ref, "default"));
}

#[test]
fn test_route_serializes_gateway_api_field_names() {
    let value = serde_json::to_value(tagged_route()).unwrap();
    let rule = &value["spec"]["rules"][1];
    assert_eq!(rule["filters"][0]["type"], "RequestHeaderModifier");
    assert_eq!(
        rule["filters"][0]["requestHeaderModifier"]["set"][0]["name"],
        "K-Serving-Revision"
    );
    assert_eq!(rule["backendRefs"][0]["weight"], 90);
    assert_eq!(value["spec"]["parentRefs"][0]["sectionName"], "http");
}

#[test]
fn test_ingress_document_parses() {
    let ingress: Ingress = serde_json::from_value(json!({
        "apiVersion": "networking.internal.knative.dev/v1alpha1",
        "kind": "Ingress",
        "metadata": {"name": "hello", "namespace": "default", "generation": 2},
        "spec": {
            "httpOption": "Redirected",
            "rules": [{
                "hosts": ["hello.default", "hello.default.svc.cluster.local"],
                "visibility": "ClusterLocal",
                "paths": [{
                    "appendHeaders": {"K-Network-Hash": "abc"},
                    "timeout": "30s",
                    "splits": [{
                        "backendRef": {"namespace": "default", "name": "hello-00001", "port": 80},
                        "percent": 100,
                        "appProtocol": "h2c"
                    }]
                }]
            }]
        },
        "status": {
            "observedGeneration": 1,
            "conditions": [{"type": "Ready", "status": "Unknown", "reason": "RouteNotCreated"}]
        }
    }))
    .expect("Ingress document");

    let rule = &ingress.spec.rules[0];
    assert_eq!(rule.visibility, Visibility::ClusterLocal);
    assert_eq!(rule.paths[0].timeout.as_deref(), Some("30s"));
    assert!(!ingress.status.as_ref().unwrap().is_ready());

    // Child names only depend on the host set
    let mut reversed = rule.hosts.clone();
    reversed.reverse();
    assert_eq!(
        route_name("hello", rule.visibility, &rule.hosts),
        route_name("hello", rule.visibility, &reversed)
    );
}
