//! Endpoint descriptors and path templates
//!
//! An [`EndpointDescriptor`] is the immutable metadata attached to one
//! declared integration method: HTTP verb, path template, version label and
//! an optional link to the upstream documentation. A [`MethodId`] is the
//! stable identity of a declared method and is what mock rules are keyed by.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, Result};

/// HTTP verbs an endpoint can be declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Stable identity of a declared integration method: `Integration.method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    integration: Arc<str>,
    method: Arc<str>,
}

impl MethodId {
    pub fn new(integration: impl Into<Arc<str>>, method: impl Into<Arc<str>>) -> Self {
        Self {
            integration: integration.into(),
            method: method.into(),
        }
    }

    pub fn integration(&self) -> &str {
        &self.integration
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.integration, self.method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A path such as `/users/{user_id}/posts/{post_id}`.
///
/// Placeholders are filled from [`PathArgs`] at call time; values are
/// percent-encoded so they always stay inside one path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(IntegrationError::configuration(format!(
                                    "nested '{{' in path template {raw:?}"
                                )))
                            }
                            c => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(IntegrationError::configuration(format!(
                            "unterminated placeholder in path template {raw:?}"
                        )));
                    }
                    let name = name.trim().to_string();
                    if name.is_empty() {
                        return Err(IntegrationError::configuration(format!(
                            "empty placeholder in path template {raw:?}"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                '}' => {
                    return Err(IntegrationError::configuration(format!(
                        "unmatched '}}' in path template {raw:?}"
                    )))
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { raw, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholder names in declaration order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Fill every placeholder; unfilled placeholders are a configuration error.
    pub fn resolve(&self, args: &PathArgs) -> Result<String> {
        let missing: Vec<&str> = self
            .placeholders()
            .filter(|name| args.get(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(IntegrationError::configuration(format!(
                "path {:?} is missing values for: {}",
                self.raw,
                missing.join(", ")
            )));
        }

        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some(value) = args.get(name) {
                        out.push_str(&urlencoding::encode(value));
                    }
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Values for path placeholders supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathArgs(BTreeMap<String, String>);

impl PathArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.0.insert(name.into(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for PathArgs
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = PathArgs::new();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}

/// Immutable metadata for one declared integration method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    method: HttpMethod,
    path: PathTemplate,
    version: String,
    doc_url: Option<String>,
}

impl EndpointDescriptor {
    /// Create a descriptor; fails if the path template is malformed.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Result<Self> {
        Ok(Self {
            method,
            path: PathTemplate::parse(path)?,
            version: String::new(),
            doc_url: None,
        })
    }

    pub fn get(path: impl Into<String>) -> Result<Self> {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Result<Self> {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Result<Self> {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Result<Self> {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Result<Self> {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_doc_url(mut self, doc_url: impl Into<String>) -> Self {
        self.doc_url = Some(doc_url.into());
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &PathTemplate {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn doc_url(&self) -> Option<&str> {
        self.doc_url.as_deref()
    }

    /// The `(method, path, version)` triple used to spot duplicate declarations.
    pub(crate) fn route_key(&self) -> (HttpMethod, &str, &str) {
        (self.method, self.path.as_str(), &self.version)
    }
}
