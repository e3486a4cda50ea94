//! Hostname intersection between listeners and routes.
//!
//! Listener hostnames are optional; an absent hostname places no restriction
//! on the routes that may attach. Either side may use a single leading
//! wildcard label (`*.example.com`).

/// The set of hostnames a route serves through a gateway.
///
/// `Any` is distinct from an empty `Only` set: the former places no
/// restriction on the Host header, while the latter serves nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Hostnames {
    Any,
    Only(Vec<String>),
}

/// Returns true if a route hostname and a listener hostname intersect.
pub fn matches(listener: &str, route: &str) -> bool {
    effective(listener, route).is_some()
}

/// Returns the more specific hostname of the intersection of a listener
/// hostname and a route hostname, or `None` if they do not intersect.
pub fn effective(listener: &str, route: &str) -> Option<String> {
    if route == listener {
        return Some(route.to_string());
    }

    // *.example.com matches foo.example.com and foo.bar.example.com.
    if let Some(suffix) = wildcard_suffix(listener) {
        if route.ends_with(suffix) {
            return Some(route.to_string());
        }
    }

    if let Some(suffix) = wildcard_suffix(route) {
        if listener.ends_with(suffix) || listener == &suffix[1..] {
            return Some(listener.to_string());
        }
    }

    None
}

/// Returns true if any route hostname intersects the listener hostname.
///
/// An absent listener hostname or an empty set of route hostnames matches
/// everything.
pub fn intersects(listener: Option<&str>, route: &[String]) -> bool {
    let listener = match listener {
        Some(l) => l,
        None => return true,
    };
    route.is_empty() || route.iter().any(|rh| matches(listener, rh))
}

/// Computes the hostnames a route serves through the given set of listener
/// hostnames (already filtered to the listeners the route targets).
pub fn effective_hostnames<'l>(
    route: &[String],
    listeners: impl IntoIterator<Item = Option<&'l str>>,
) -> Hostnames {
    let mut out = Vec::new();
    let mut push = |h: String| {
        if !out.contains(&h) {
            out.push(h);
        }
    };

    let listeners = listeners.into_iter().collect::<Vec<_>>();

    if route.is_empty() {
        for lh in listeners {
            match lh {
                None => return Hostnames::Any,
                Some(h) => push(h.to_string()),
            }
        }
        return Hostnames::Only(out);
    }

    for rh in route {
        for lh in &listeners {
            match lh {
                None => push(rh.clone()),
                Some(lh) => {
                    if let Some(h) = effective(lh, rh) {
                        push(h);
                    }
                }
            }
        }
    }
    Hostnames::Only(out)
}

// === impl Hostnames ===

impl Hostnames {
    /// Merges another set into this one. `Any` absorbs everything.
    pub fn union(self, other: Hostnames) -> Hostnames {
        match (self, other) {
            (Hostnames::Any, _) | (_, Hostnames::Any) => Hostnames::Any,
            (Hostnames::Only(mut a), Hostnames::Only(b)) => {
                for h in b {
                    if !a.contains(&h) {
                        a.push(h);
                    }
                }
                Hostnames::Only(a)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Hostnames::Only(hs) if hs.is_empty())
    }
}

fn wildcard_suffix(hostname: &str) -> Option<&str> {
    hostname.strip_prefix('*').filter(|s| s.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn hosts(hs: &[&str]) -> Vec<String> {
        hs.iter().map(ToString::to_string).collect()
    }

    #[rstest]
    #[case::exact("foo.example.com", "foo.example.com", Some("foo.example.com"))]
    #[case::listener_wildcard("*.example.com", "api.example.com", Some("api.example.com"))]
    #[case::listener_wildcard_deep("*.example.com", "a.b.example.com", Some("a.b.example.com"))]
    #[case::listener_wildcard_apex("*.example.com", "example.com", None)]
    #[case::route_wildcard("api.example.com", "*.example.com", Some("api.example.com"))]
    #[case::route_wildcard_apex("example.com", "*.example.com", Some("example.com"))]
    #[case::both_wildcards("*.example.com", "*.example.com", Some("*.example.com"))]
    #[case::nested_wildcards("*.example.com", "*.api.example.com", Some("*.api.example.com"))]
    #[case::mismatch("foo.example.com", "bar.example.com", None)]
    #[case::other_domain("*.example.com", "api.example.org", None)]
    fn effective_hostname(
        #[case] listener: &str,
        #[case] route: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(effective(listener, route).as_deref(), expected);
        assert_eq!(matches(listener, route), expected.is_some());
    }

    #[test]
    fn intersection_defaults() {
        assert!(intersects(None, &hosts(&["foo.example.com"])));
        assert!(intersects(Some("foo.example.com"), &[]));
        assert!(intersects(
            Some("*.example.com"),
            &hosts(&["other.org", "api.example.com"])
        ));
        assert!(!intersects(Some("*.example.com"), &hosts(&["other.org"])));
    }

    #[test]
    fn effective_hostnames_catch_all() {
        assert_eq!(effective_hostnames(&[], [None]), Hostnames::Any);
        assert_eq!(
            effective_hostnames(&[], [Some("a.example.com"), None]),
            Hostnames::Any
        );
    }

    #[test]
    fn effective_hostnames_from_listeners() {
        assert_eq!(
            effective_hostnames(&[], [Some("a.example.com"), Some("a.example.com"), Some("b.example.com")]),
            Hostnames::Only(hosts(&["a.example.com", "b.example.com"]))
        );
    }

    #[test]
    fn effective_hostnames_intersected() {
        let route = hosts(&["api.example.com", "www.other.org"]);
        assert_eq!(
            effective_hostnames(&route, [Some("*.example.com")]),
            Hostnames::Only(hosts(&["api.example.com"]))
        );
        assert_eq!(
            effective_hostnames(&route, [None]),
            Hostnames::Only(route.clone())
        );
    }

    #[test]
    fn effective_hostnames_disjoint_is_empty() {
        let route = hosts(&["www.other.org"]);
        let hs = effective_hostnames(&route, [Some("*.example.com")]);
        assert!(hs.is_empty());
        assert_ne!(hs, Hostnames::Any);
    }

    #[test]
    fn union() {
        let a = Hostnames::Only(hosts(&["a"]));
        let b = Hostnames::Only(hosts(&["b", "a"]));
        assert_eq!(a.clone().union(b), Hostnames::Only(hosts(&["a", "b"])));
        assert_eq!(a.union(Hostnames::Any), Hostnames::Any);
    }
}
