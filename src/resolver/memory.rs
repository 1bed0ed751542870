use std::collections::HashMap;

use regex::Regex;

use crate::error::GatewayError;

/// `/<service>(<path>)?(<query>)?` — the service name is the first path
/// segment, `path` is everything after it up to the query string, and
/// `query` is the literal `?...` suffix if present.
fn url_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/(?P<service>[^/?]+)(?P<path>[^?]+)?(?P<query>\?.*)?$").unwrap())
}

/// A fixed, in-memory service-name-to-base-URL routing table.
///
/// Built once at startup from configuration; lookups never block and never
/// change the table, so a single `HashMap` behind a shared reference is
/// enough — no interior mutability is needed.
pub struct InMemoryResolver {
    routes: HashMap<String, String>,
}

impl InMemoryResolver {
    pub fn new(routes: HashMap<String, String>) -> Self {
        Self { routes }
    }
}

impl super::Resolver for InMemoryResolver {
    fn resolve(&self, url: &str) -> Result<String, GatewayError> {
        let caps = url_regex()
            .captures(url)
            .ok_or_else(|| GatewayError::not_found("URL does not contain service route."))?;

        let service = caps.name("service").unwrap().as_str();
        let base = self.routes.get(service).ok_or_else(|| {
            GatewayError::bad_gateway(format!(
                "Unable to satisfy routes for service: {service}"
            ))
        })?;

        let mut out = String::with_capacity(base.len() + url.len());
        out.push_str(base);
        if let Some(path) = caps.name("path") {
            out.push_str(path.as_str());
        }
        if let Some(query) = caps.name("query") {
            out.push_str(query.as_str());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Resolver;
    use super::*;

    fn resolver() -> InMemoryResolver {
        let mut routes = HashMap::new();
        routes.insert("foo".to_string(), "http://10.0.0.1:9000".to_string());
        InMemoryResolver::new(routes)
    }

    #[test]
    fn bare_service_resolves_to_base_url() {
        assert_eq!(
            resolver().resolve("/foo").unwrap(),
            "http://10.0.0.1:9000"
        );
    }

    #[test]
    fn trailing_slash_is_preserved_as_path() {
        assert_eq!(
            resolver().resolve("/foo/").unwrap(),
            "http://10.0.0.1:9000/"
        );
    }

    #[test]
    fn query_string_with_no_path_is_appended() {
        assert_eq!(
            resolver().resolve("/foo?x=1").unwrap(),
            "http://10.0.0.1:9000?x=1"
        );
    }

    #[test]
    fn path_and_query_are_both_appended_in_order() {
        assert_eq!(
            resolver().resolve("/foo/bar/baz?x=1").unwrap(),
            "http://10.0.0.1:9000/bar/baz?x=1"
        );
    }

    #[test]
    fn root_path_has_no_service_segment() {
        let err = resolver().resolve("/").unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[test]
    fn unknown_service_is_bad_gateway() {
        let err = resolver().resolve("/bar").unwrap_err();
        assert!(matches!(err, GatewayError::BadGateway(_)));
    }
}
