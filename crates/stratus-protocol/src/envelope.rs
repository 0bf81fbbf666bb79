//! [`RequestEnvelope`] — the transport-neutral view of one inbound request.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use stratus_types::Dialect;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    /// `GET`
    Get,
    /// `HEAD`
    Head,
    /// `PUT`
    Put,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
    /// `PATCH`
    Patch,
    /// Anything else (`OPTIONS`, `TRACE`, extensions). Never routed.
    Other,
}

impl Method {
    /// Parse a method name (case-sensitive, as on the wire).
    pub fn parse(name: &str) -> Self {
        match name {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "PUT" => Self::Put,
            "POST" => Self::Post,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            _ => Self::Other,
        }
    }

    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound request, immutable once built.
///
/// Header names are lower-cased; repeated headers are joined with `", "`.
/// The dialect comes from the listener that accepted the request.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    dialect: Dialect,
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl RequestEnvelope {
    /// Build an envelope. `raw_query` is the undecoded query string (without `?`).
    pub fn new(
        dialect: Dialect,
        method: Method,
        path: impl Into<String>,
        raw_query: Option<&str>,
        headers: impl IntoIterator<Item = (String, String)>,
        body: Bytes,
    ) -> Self {
        let query = raw_query
            .map(|q| {
                form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            merged
                .entry(name.to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        Self {
            dialect,
            method,
            path: path.into(),
            query,
            headers: merged,
            body,
        }
    }

    /// Dialect of the listener that received the request.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Request method.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Raw (still percent-encoded) path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded query parameters in wire order.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// First value of query parameter `name`.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether query parameter `name` is present (with or without a value).
    pub fn has_query(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers, lower-cased names.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the body is a form (`application/x-www-form-urlencoded`).
    pub fn is_form(&self) -> bool {
        self.header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
    }

    /// Decoded form fields of the body, in wire order.
    pub fn form(&self) -> Vec<(String, String)> {
        form_urlencoded::parse(&self.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }
}
