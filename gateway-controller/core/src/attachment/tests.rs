use super::*;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::collections::BTreeMap;
use varnish_gateway_controller_k8s_api::{
    gateway::{
        AllowedRoutes, GatewaySpec, GatewayTlsConfig, HttpRouteSpec, ParentReference,
        RouteNamespaces, SecretObjectReference, TlsModeType,
    },
    labels::{Expression, Operator},
};

#[derive(Default)]
struct FakeNamespaces(BTreeMap<String, Labels>);

#[async_trait::async_trait]
impl NamespaceLabels for FakeNamespaces {
    async fn namespace_labels(&self, namespace: &str) -> Result<Labels> {
        self.0
            .get(namespace)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("namespace {namespace} not found"))
    }
}

fn listener(name: &str, hostname: Option<&str>) -> api::Listener {
    api::Listener {
        name: name.to_string(),
        hostname: hostname.map(Into::into),
        port: 80,
        protocol: "HTTP".to_string(),
        tls: None,
        allowed_routes: None,
    }
}

fn with_namespaces(mut l: api::Listener, from: api::FromNamespaces, selector: Option<Selector>) -> api::Listener {
    l.allowed_routes = Some(AllowedRoutes {
        namespaces: Some(RouteNamespaces {
            from: Some(from),
            selector,
        }),
        kinds: None,
    });
    l
}

fn gateway(listeners: Vec<api::Listener>) -> Gateway {
    let mut gw = api::Gateway::new(
        "gw",
        GatewaySpec {
            gateway_class_name: "varnish".to_string(),
            listeners,
        },
    );
    gw.metadata.namespace = Some("infra".to_string());
    Gateway::from_resource(&gw)
}

fn route(ns: &str, hostnames: &[&str], parents: Vec<ParentReference>) -> Route {
    let mut route = api::HttpRoute::new(
        "web",
        HttpRouteSpec {
            parent_refs: Some(parents),
            hostnames: Some(hostnames.iter().map(ToString::to_string).collect()),
            rules: None,
        },
    );
    route.metadata.namespace = Some(ns.to_string());
    Route::from_resource(&route)
}

fn parent(section: Option<&str>) -> ParentReference {
    ParentReference {
        namespace: Some("infra".to_string()),
        name: "gw".to_string(),
        section_name: section.map(Into::into),
        ..Default::default()
    }
}

#[test]
fn parent_ref_defaults() {
    let r = ParentRef::from_resource(
        &ParentReference {
            name: "gw".to_string(),
            ..Default::default()
        },
        "apps",
    );
    assert_eq!(r.group, api::GROUP);
    assert_eq!(r.kind, GATEWAY_KIND);
    assert_eq!(r.namespace, "apps");
    assert!(r.targets("apps", "gw"));
    assert!(!r.targets("infra", "gw"));
    assert_eq!(r.to_string(), "apps/gw");
}

#[test]
fn parent_ref_to_other_kind_does_not_target() {
    let r = ParentRef::from_resource(
        &ParentReference {
            kind: Some("Service".to_string()),
            name: "gw".to_string(),
            ..Default::default()
        },
        "infra",
    );
    assert!(!r.is_gateway());
    assert!(!r.targets("infra", "gw"));
}

#[tokio::test]
async fn no_listeners() {
    let gw = gateway(vec![]);
    let rt = route("infra", &[], vec![parent(None)]);
    let denied = gw
        .check_route(&rt, &FakeNamespaces::default())
        .await
        .unwrap_err();
    assert_eq!(denied, Denied::NoListeners);
    assert_eq!(denied.reason(), "NotAllowedByListeners");
    assert_eq!(denied.message(&gw), "Gateway has no listeners");
}

#[rstest]
#[case::same_namespace("infra", api::FromNamespaces::Same, Ok(()))]
#[case::other_namespace("apps", api::FromNamespaces::Same, Err(Denied::NotAllowedByListeners))]
#[case::all_namespaces("apps", api::FromNamespaces::All, Ok(()))]
#[tokio::test]
async fn namespace_policy(
    #[case] route_ns: &str,
    #[case] from: api::FromNamespaces,
    #[case] expected: Result<(), Denied>,
) {
    let gw = gateway(vec![with_namespaces(listener("http", None), from, None)]);
    let rt = route(route_ns, &[], vec![parent(None)]);
    assert_eq!(
        gw.check_route(&rt, &FakeNamespaces::default()).await,
        expected
    );
}

#[tokio::test]
async fn selector_policy() {
    let namespaces = FakeNamespaces(btreemap! {
        "apps".to_string() => Labels::from_iter(Some(("team", "web"))),
        "batch".to_string() => Labels::from_iter(Some(("team", "data"))),
    });
    let selector = Selector::from_iter(Some(("team", "web")));
    let gw = gateway(vec![with_namespaces(
        listener("http", None),
        api::FromNamespaces::Selector,
        Some(selector),
    )]);

    let allowed = route("apps", &[], vec![parent(None)]);
    assert_eq!(gw.check_route(&allowed, &namespaces).await, Ok(()));

    let denied = route("batch", &[], vec![parent(None)]);
    assert_eq!(
        gw.check_route(&denied, &namespaces).await,
        Err(Denied::NotAllowedByListeners)
    );
}

#[tokio::test]
async fn selector_policy_without_selector_denies() {
    let gw = gateway(vec![with_namespaces(
        listener("http", None),
        api::FromNamespaces::Selector,
        None,
    )]);
    let rt = route("infra", &[], vec![parent(None)]);
    assert_eq!(
        gw.check_route(&rt, &FakeNamespaces::default()).await,
        Err(Denied::NotAllowedByListeners)
    );
}

#[tokio::test]
async fn invalid_selector_skips_listener() {
    let invalid = Selector::from_iter(Some(Expression::new("team", Operator::In, [])));
    let gw = gateway(vec![
        with_namespaces(listener("bad", None), api::FromNamespaces::Selector, Some(invalid)),
        with_namespaces(listener("good", Some("*.example.com")), api::FromNamespaces::All, None),
    ]);
    let rt = route("apps", &["api.example.com"], vec![parent(None)]);
    assert_eq!(gw.check_route(&rt, &FakeNamespaces::default()).await, Ok(()));
}

#[tokio::test]
async fn unresolvable_namespace_skips_listener() {
    let gw = gateway(vec![with_namespaces(
        listener("http", None),
        api::FromNamespaces::Selector,
        Some(Selector::from_iter(Some(("team", "web")))),
    )]);
    let rt = route("missing", &[], vec![parent(None)]);
    assert_eq!(
        gw.check_route(&rt, &FakeNamespaces::default()).await,
        Err(Denied::NotAllowedByListeners)
    );
}

#[tokio::test]
async fn hostname_mismatch() {
    let gw = gateway(vec![listener("http", Some("*.example.com"))]);
    let rt = route("infra", &["www.other.org"], vec![parent(None)]);
    let denied = gw
        .check_route(&rt, &FakeNamespaces::default())
        .await
        .unwrap_err();
    assert_eq!(denied, Denied::NoMatchingListenerHostname);
    assert_eq!(
        denied.message(&gw),
        "No matching listener hostname on Gateway infra/gw"
    );
}

#[tokio::test]
async fn attached_routes_require_target_and_admission() {
    let gw = gateway(vec![listener("http", Some("*.example.com"))]);
    let routes = vec![
        route("infra", &["api.example.com"], vec![parent(None)]),
        route("infra", &["www.other.org"], vec![parent(None)]),
        route(
            "infra",
            &["api.example.com"],
            vec![ParentReference {
                name: "other".to_string(),
                ..Default::default()
            }],
        ),
    ];
    let attached = gw
        .attached_routes(&routes, &FakeNamespaces::default())
        .await;
    assert_eq!(attached, vec![&routes[0]]);
}

#[test]
fn count_attached_by_section() {
    let gw = gateway(vec![
        listener("http", Some("*.example.com")),
        listener("admin", Some("admin.example.com")),
    ]);
    let routes = vec![
        route("infra", &["api.example.com"], vec![parent(None)]),
        route("infra", &["admin.example.com"], vec![parent(Some("admin"))]),
        route("infra", &[], vec![parent(Some("http"))]),
    ];
    let http = gw.listener("http").unwrap();
    let admin = gw.listener("admin").unwrap();
    assert_eq!(gw.count_attached(&routes, http), 2);
    assert_eq!(gw.count_attached(&routes, admin), 1);
}

#[test]
fn route_hostnames() {
    let gw = gateway(vec![
        listener("http", Some("*.example.com")),
        listener("any", None),
    ]);

    let scoped = route("infra", &[], vec![parent(Some("http"))]);
    assert_eq!(
        gw.route_hostnames(&scoped),
        Some(Hostnames::Only(vec!["*.example.com".to_string()]))
    );

    let catch_all = route("infra", &[], vec![parent(None)]);
    assert_eq!(gw.route_hostnames(&catch_all), Some(Hostnames::Any));

    let disjoint = route("infra", &["www.other.org"], vec![parent(Some("http"))]);
    assert_eq!(gw.route_hostnames(&disjoint), None);
}

#[rstest]
#[case::default(None, vec![http_route_kind()], false)]
#[case::empty(Some(vec![]), vec![http_route_kind()], false)]
#[case::http_route(
    Some(vec![RouteGroupKind { group: None, kind: "HTTPRoute".to_string() }]),
    vec![http_route_kind()],
    false,
)]
#[case::mixed(
    Some(vec![
        RouteGroupKind { group: Some(api::GROUP.to_string()), kind: "HTTPRoute".to_string() },
        RouteGroupKind { group: None, kind: "TCPRoute".to_string() },
    ]),
    vec![http_route_kind()],
    true,
)]
#[case::only_invalid(
    Some(vec![RouteGroupKind { group: Some("example.com".to_string()), kind: "HTTPRoute".to_string() }]),
    vec![],
    true,
)]
fn route_kinds(
    #[case] kinds: Option<Vec<RouteGroupKind>>,
    #[case] supported: Vec<RouteGroupKind>,
    #[case] has_invalid: bool,
) {
    let mut l = listener("http", None);
    l.allowed_routes = Some(AllowedRoutes {
        namespaces: None,
        kinds,
    });
    let gw = gateway(vec![l]);
    assert_eq!(
        gw.listeners[0].route_kinds,
        RouteKinds {
            supported,
            has_invalid
        }
    );
}

#[test]
fn certificate_refs() {
    let mut https = listener("https", None);
    https.protocol = "HTTPS".to_string();
    https.tls = Some(GatewayTlsConfig {
        mode: Some(TlsModeType::Terminate),
        certificate_refs: Some(vec![
            SecretObjectReference {
                name: "local".to_string(),
                ..Default::default()
            },
            SecretObjectReference {
                name: "shared".to_string(),
                namespace: Some("certs".to_string()),
                ..Default::default()
            },
        ]),
    });
    let gw = gateway(vec![https]);

    let tls = gw.listeners[0].terminated_tls().unwrap();
    assert_eq!(tls.certificate_refs[0].namespace, "infra");
    assert!(!tls.certificate_refs[0].cross_namespace);
    assert!(tls.certificate_refs[1].cross_namespace);

    assert!(gw.references_secret("infra", "local"));
    assert!(gw.references_secret("certs", "shared"));
    assert!(!gw.references_secret("certs", "local"));
    assert!(gw.references_secrets_in("certs"));
    assert!(!gw.references_secrets_in("infra"));
}
