//! Request classification.

use crate::http::GatewayRequest;

/// Which caching strategy a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Build output, icons, fonts: cache-first
  StaticAsset,
  /// Backend calls: network-first
  Api,
  /// Pages: network-first with offline fallback
  Navigable,
  /// Everything else: stale-while-revalidate
  Other,
}

const STATIC_DIRS: &[&str] = &["/_next/static/", "/icons/"];
const STATIC_EXTENSIONS: &[&str] = &[".css", ".js", ".png", ".jpg", ".svg", ".woff", ".woff2"];

/// Routing rules; classification itself is a pure function of the request.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefixes: Vec<String>,
  admin_routes: Vec<String>,
}

impl Classifier {
  pub fn new(api_prefixes: Vec<String>, admin_routes: Vec<String>) -> Self {
    Self {
      api_prefixes,
      admin_routes,
    }
  }

  /// Classify a request. Rules are checked in a fixed order and the first
  /// match wins; no match means [`RequestClass::Other`].
  pub fn classify(&self, request: &GatewayRequest) -> RequestClass {
    let path = request.path();

    if is_static_asset(path) {
      RequestClass::StaticAsset
    } else if self.is_api(path) {
      RequestClass::Api
    } else if self.is_navigable(path, request.accept()) {
      RequestClass::Navigable
    } else {
      RequestClass::Other
    }
  }

  fn is_api(&self, path: &str) -> bool {
    self.api_prefixes.iter().any(|p| path.starts_with(p.as_str()))
  }

  fn is_navigable(&self, path: &str, accept: Option<&str>) -> bool {
    let wants_html = accept.is_some_and(|a| a.contains("text/html"));
    wants_html || self.admin_routes.iter().any(|route| is_under(path, route))
  }
}

fn is_static_asset(path: &str) -> bool {
  STATIC_DIRS.iter().any(|d| path.contains(d)) || STATIC_EXTENSIONS.iter().any(|e| path.ends_with(e))
}

/// `path` equals `section` or is nested below it.
pub fn is_under(path: &str, section: &str) -> bool {
  let section = section.trim_end_matches('/');
  if section.is_empty() {
    return true;
  }
  path == section
    || path
      .strip_prefix(section)
      .is_some_and(|rest| rest.starts_with('/'))
}
