//! # Remote Service Registry and Route Resolution
//!
//! Static name to base URL mapping plus the conventional mapping from an action
//! name to an HTTP method and path.

use reqwest::{Method, Url};
use std::collections::HashMap;
use tracing::warn;

use crate::config::InvokerConfig;

/// Static registry of remote services
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Url>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[invoker.services]` table; malformed URLs are skipped
    pub fn from_config(config: &InvokerConfig) -> Self {
        let mut registry = Self::new();
        for (name, base_url) in &config.services {
            match Url::parse(base_url) {
                Ok(url) => {
                    registry.services.insert(name.clone(), url);
                }
                Err(error) => {
                    warn!(service = %name, base_url = %base_url, error = %error, "Skipping service with invalid base URL");
                }
            }
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, base_url: Url) {
        self.services.insert(name.into(), base_url);
    }

    pub fn resolve(&self, name: &str) -> Option<&Url> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// HTTP method and path derived for an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
}

/// Derives routes by naming convention
///
/// | action          | route                      |
/// |-----------------|----------------------------|
/// | `createFooBar`  | `POST /api/foo-bars`       |
/// | `updateFooBar`  | `PUT /api/foo-bars`        |
/// | `deleteFooBar`  | `DELETE /api/foo-bars`     |
/// | anything else   | `POST /api/actions/<name>` |
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteResolver;

impl RouteResolver {
    pub fn resolve(&self, action: &str) -> Route {
        for prefix in ["create", "update", "delete"] {
            if let Some(resource) = resource_after_prefix(action, prefix) {
                let method = match prefix {
                    "create" => Method::POST,
                    "update" => Method::PUT,
                    _ => Method::DELETE,
                };
                return Route {
                    method,
                    path: format!("/api/{}", pluralize(&to_kebab_case(resource))),
                };
            }
        }

        Route {
            method: Method::POST,
            path: format!("/api/actions/{action}"),
        }
    }

    /// Absolute URL for `action` beneath `base`
    pub fn url_for(&self, base: &Url, action: &str) -> Option<(Method, Url)> {
        let route = self.resolve(action);
        let url = append_path(base, &route.path)?;
        Some((route.method, url))
    }
}

/// `path` appended to whatever path `base` already carries
///
/// `http://gateway/user-service` + `/api/users` is
/// `http://gateway/user-service/api/users`.
pub fn append_path(base: &Url, path: &str) -> Option<Url> {
    if base.cannot_be_a_base() {
        return None;
    }
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    Some(url)
}

/// `createFooBar` with prefix `create` yields `FooBar`; `created` yields nothing
fn resource_after_prefix<'a>(action: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = action.strip_prefix(prefix)?;
    rest.chars()
        .next()
        .filter(|first| first.is_ascii_uppercase())
        .map(|_| rest)
}

fn to_kebab_case(name: &str) -> String {
    let mut kebab = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                kebab.push('-');
            }
            kebab.push(ch.to_ascii_lowercase());
        } else {
            kebab.push(ch);
        }
    }
    kebab
}

fn pluralize(word: &str) -> String {
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with('z')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        return format!("{word}es");
    }

    let mut chars = word.chars().rev();
    if let (Some('y'), Some(before)) = (chars.next(), chars.next()) {
        if !"aeiou".contains(before) {
            return format!("{}ies", &word[..word.len() - 1]);
        }
    }

    format!("{word}s")
}
