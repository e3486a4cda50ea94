use super::*;
use pretty_assertions::assert_eq;
use rstest::rstest;
use varnish_gateway_controller_k8s_api::gateway::{
    self as api, GatewaySpec, HttpBackendRef, HttpHeaderMatch, HttpPathMatch, HttpQueryParamMatch,
    HttpRouteRule, HttpRouteSpec, ParentReference,
};

fn backend(name: &str) -> HttpBackendRef {
    HttpBackendRef {
        name: name.to_string(),
        ..Default::default()
    }
}

fn path(type_: Option<PathMatchType>, value: Option<&str>) -> HttpRouteMatch {
    HttpRouteMatch {
        path: Some(HttpPathMatch {
            type_,
            value: value.map(Into::into),
        }),
        ..Default::default()
    }
}

fn route(ns: &str, hostnames: &[&str], rules: Vec<HttpRouteRule>) -> Route {
    let mut route = api::HttpRoute::new(
        "web",
        HttpRouteSpec {
            parent_refs: Some(vec![ParentReference {
                namespace: Some("infra".to_string()),
                name: "gw".to_string(),
                ..Default::default()
            }]),
            hostnames: Some(hostnames.iter().map(ToString::to_string).collect()),
            rules: Some(rules),
        },
    );
    route.metadata.namespace = Some(ns.to_string());
    Route::from_resource(&route)
}

fn hosts(hs: &[&str]) -> Vec<String> {
    hs.iter().map(ToString::to_string).collect()
}

#[rstest]
#[case::exact(path(Some(PathMatchType::Exact), Some("/login")), 10_000)]
#[case::prefix(path(Some(PathMatchType::PathPrefix), Some("/api")), 1_040)]
#[case::default_prefix(path(None, None), 1_010)]
#[case::regex(path(Some(PathMatchType::RegularExpression), Some("/v[0-9]+")), 100)]
#[case::no_path(HttpRouteMatch::default(), 0)]
#[case::method(
    HttpRouteMatch { method: Some("GET".to_string()), ..path(Some(PathMatchType::Exact), Some("/")) },
    15_000,
)]
#[case::headers_and_query(
    HttpRouteMatch {
        headers: Some(vec![
            HttpHeaderMatch { type_: None, name: "x-a".to_string(), value: "1".to_string() },
            HttpHeaderMatch { type_: None, name: "x-b".to_string(), value: "2".to_string() },
        ]),
        query_params: Some(vec![HttpQueryParamMatch {
            type_: Some("RegularExpression".to_string()),
            name: "q".to_string(),
            value: ".*".to_string(),
        }]),
        ..Default::default()
    },
    2_500,
)]
fn priority(#[case] m: HttpRouteMatch, #[case] expected: i32) {
    assert_eq!(Match::from_resource(&m).priority(), expected);
}

#[test]
fn priority_caps_match_counts() {
    let headers = (0..20)
        .map(|i| HttpHeaderMatch {
            type_: None,
            name: format!("x-{i}"),
            value: "v".to_string(),
        })
        .collect();
    let m = HttpRouteMatch {
        headers: Some(headers),
        ..Default::default()
    };
    assert_eq!(Match::from_resource(&m).priority(), 16_000);
}

#[test]
fn collect_defaults() {
    let rt = route(
        "apps",
        &[],
        vec![HttpRouteRule {
            matches: None,
            backend_refs: Some(vec![backend("web"), backend("")]),
        }],
    );
    let entries = collect([(&rt, vec![])], "infra");
    assert_eq!(
        entries,
        vec![RouteEntry {
            hostname: None,
            path_match: Some(PathMatch {
                type_: PathMatchType::PathPrefix,
                value: "/".to_string(),
            }),
            method: None,
            headers: vec![],
            query_params: vec![],
            service: "web".to_string(),
            namespace: "apps".to_string(),
            port: 80,
            weight: 100,
            priority: 1_010,
        }]
    );
}

#[test]
fn collect_orders_by_priority_then_hostname() {
    let rt = route(
        "apps",
        &[],
        vec![
            HttpRouteRule {
                matches: Some(vec![path(Some(PathMatchType::PathPrefix), Some("/"))]),
                backend_refs: Some(vec![backend("catch-all")]),
            },
            HttpRouteRule {
                matches: Some(vec![
                    path(Some(PathMatchType::Exact), Some("/login")),
                    path(Some(PathMatchType::PathPrefix), Some("/api")),
                ]),
                backend_refs: Some(vec![HttpBackendRef {
                    namespace: Some("shared".to_string()),
                    port: Some(8080),
                    weight: Some(5),
                    ..backend("api")
                }]),
            },
        ],
    );
    let entries = collect([(&rt, hosts(&["b.example.com", "a.example.com"]))], "infra");
    let summary = entries
        .iter()
        .map(|e| {
            (
                e.priority,
                e.hostname.clone().unwrap_or_default(),
                e.service.clone(),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![
            (10_000, "a.example.com".to_string(), "api".to_string()),
            (10_000, "b.example.com".to_string(), "api".to_string()),
            (1_040, "a.example.com".to_string(), "api".to_string()),
            (1_040, "b.example.com".to_string(), "api".to_string()),
            (1_010, "a.example.com".to_string(), "catch-all".to_string()),
            (1_010, "b.example.com".to_string(), "catch-all".to_string()),
        ]
    );
    assert_eq!(entries[0].namespace, "shared");
    assert_eq!(entries[0].port, 8080);
    assert_eq!(entries[0].weight, 5);
}

#[test]
fn document_groups_by_host() {
    let rt = route(
        "apps",
        &[],
        vec![HttpRouteRule {
            matches: None,
            backend_refs: Some(vec![backend("web")]),
        }],
    );
    let config = RoutingConfig::from_entries(collect(
        [(&rt, hosts(&["a.example.com"])), (&rt, vec![])],
        "infra",
    ));
    assert_eq!(config.version, VERSION);
    assert_eq!(config.vhosts.len(), 1);
    assert_eq!(config.vhosts["a.example.com"].routes.len(), 1);
    assert_eq!(config.default.as_ref().map(|d| d.routes.len()), Some(1));
    assert_eq!(config.route_count(), 2);
}

#[test]
fn serialized_form() {
    let rt = route(
        "apps",
        &["a.example.com"],
        vec![HttpRouteRule {
            matches: Some(vec![HttpRouteMatch {
                method: Some("POST".to_string()),
                headers: Some(vec![HttpHeaderMatch {
                    type_: None,
                    name: "x-env".to_string(),
                    value: "canary".to_string(),
                }]),
                ..path(Some(PathMatchType::Exact), Some("/submit"))
            }]),
            backend_refs: Some(vec![backend("web")]),
        }],
    );
    let config = RoutingConfig::from_entries(collect([(&rt, hosts(&["a.example.com"]))], "infra"));
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "version": 2,
            "vhosts": {
                "a.example.com": {
                    "routes": [{
                        "hostname": "a.example.com",
                        "path_match": {"type": "Exact", "value": "/submit"},
                        "method": "POST",
                        "headers": [{"name": "x-env", "value": "canary", "type": "Exact"}],
                        "service": "web",
                        "namespace": "apps",
                        "port": 80,
                        "weight": 100,
                        "priority": 16_000,
                    }],
                },
            },
        })
    );
}

#[test]
fn empty_document() {
    assert_eq!(
        RoutingConfig::empty().to_json_pretty().unwrap(),
        "{\n  \"version\": 2,\n  \"vhosts\": {}\n}"
    );
}

#[test]
fn for_gateway_filters_hostnames() {
    let mut gw = api::Gateway::new(
        "gw",
        GatewaySpec {
            gateway_class_name: "varnish".to_string(),
            listeners: vec![api::Listener {
                name: "http".to_string(),
                hostname: Some("*.example.com".to_string()),
                port: 80,
                protocol: "HTTP".to_string(),
                tls: None,
                allowed_routes: None,
            }],
        },
    );
    gw.metadata.namespace = Some("infra".to_string());
    let gw = Gateway::from_resource(&gw);

    let rule = HttpRouteRule {
        matches: None,
        backend_refs: Some(vec![backend("web")]),
    };
    let scoped = route("infra", &["api.example.com", "www.other.org"], vec![rule.clone()]);
    let unnamed = route("infra", &[], vec![rule.clone()]);
    let disjoint = route("infra", &["www.other.org"], vec![rule]);

    let config = RoutingConfig::for_gateway(&gw, [&scoped, &unnamed, &disjoint]);
    assert_eq!(
        config.vhosts.keys().cloned().collect::<Vec<_>>(),
        vec!["*.example.com".to_string(), "api.example.com".to_string()]
    );
    assert_eq!(config.default, None);
}

#[test]
fn digest_is_stable() {
    let a = content_digest("{}");
    assert_eq!(a, content_digest("{}"));
    assert_ne!(a, content_digest("{ }"));
    assert_eq!(a.len(), 64);
}
