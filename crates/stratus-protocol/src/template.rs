//! [`PathTemplate`] — parsed route patterns and their matching rules.
//!
//! Syntax, one pattern per `/`-separated segment:
//!
//! - `literal` matches exactly;
//! - `{name}` matches one non-empty segment;
//! - `{name}:suffix` matches one segment ending in `:suffix` and binds the
//!   part before it (e.g. `{topic}:publish`);
//! - `{*name}` matches the non-empty rest of the path, slashes included.
//!   It must be the last segment.
//!
//! Bound values are percent-decoded. A trailing `/` on the request path is
//! ignored unless the template ends in a greedy segment.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::percent_decode_str;

use crate::error::TableError;

/// Values bound by a successful match, keyed by parameter name.
pub type PathParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    ParamSuffix { name: String, suffix: String },
    Greedy(String),
}

impl Segment {
    /// Whether this segment accepts the raw request segment `raw`.
    fn accepts(&self, raw: &str) -> bool {
        match self {
            Self::Literal(lit) => lit == raw,
            Self::Param(_) => !raw.is_empty(),
            Self::ParamSuffix { suffix, .. } => {
                raw.len() > suffix.len() + 1
                    && raw.ends_with(suffix.as_str())
                    && raw.as_bytes()[raw.len() - suffix.len() - 1] == b':'
            }
            Self::Greedy(_) => !raw.is_empty(),
        }
    }
}

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template such as `/storage/v1/b/{bucket}/o/{*object}`.
    pub fn parse(source: &str) -> Result<Self, TableError> {
        let invalid = |reason: &str| TableError::InvalidTemplate {
            template: source.to_string(),
            reason: reason.to_string(),
        };

        let rest = source
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;
        let mut segments = Vec::new();
        if !rest.is_empty() {
            let parts: Vec<&str> = rest.split('/').collect();
            for (i, part) in parts.iter().enumerate() {
                let segment = parse_segment(part).map_err(|r| invalid(r))?;
                if matches!(segment, Segment::Greedy(_)) && i + 1 != parts.len() {
                    return Err(invalid("greedy segment must be last"));
                }
                segments.push(segment);
            }
        }

        let mut names: Vec<&str> = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(n) | Segment::Greedy(n) => Some(n.as_str()),
                Segment::ParamSuffix { name, .. } => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect();
        let bound = names.len();
        names.sort_unstable();
        names.dedup();
        if names.len() != bound {
            return Err(invalid("duplicate parameter name"));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a raw request path, returning decoded parameters.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let rest = path.strip_prefix('/')?;
        let mut raw: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };
        let greedy_tail = matches!(self.segments.last(), Some(Segment::Greedy(_)));
        if !greedy_tail && raw.last() == Some(&"") {
            raw.pop();
        }

        let mut params = PathParams::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Greedy(name) => {
                    let tail = raw.get(i..)?.join("/");
                    if tail.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), decode(&tail));
                    return Some(params);
                }
                other => {
                    let value = *raw.get(i)?;
                    if !other.accepts(value) {
                        return None;
                    }
                    match other {
                        Segment::Param(name) => {
                            params.insert(name.clone(), decode(value));
                        }
                        Segment::ParamSuffix { name, suffix } => {
                            let head = &value[..value.len() - suffix.len() - 1];
                            params.insert(name.clone(), decode(head));
                        }
                        _ => {}
                    }
                }
            }
        }
        (raw.len() == self.segments.len()).then_some(params)
    }

    /// Whether some path could match both templates.
    pub fn overlaps(&self, other: &PathTemplate) -> bool {
        overlap(&self.segments, &other.segments)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_segment(part: &str) -> Result<Segment, &'static str> {
    let Some(inner) = part.strip_prefix('{') else {
        if part.contains(['{', '}']) {
            return Err("braces must wrap a whole segment");
        }
        if part.is_empty() {
            return Err("empty segment");
        }
        return Ok(Segment::Literal(part.to_string()));
    };
    let (name, after) = inner.split_once('}').ok_or("unclosed '{'")?;
    if let Some(greedy) = name.strip_prefix('*') {
        if !after.is_empty() {
            return Err("greedy segment cannot have a suffix");
        }
        return valid_name(greedy).map(|n| Segment::Greedy(n.to_string()));
    }
    let name = valid_name(name)?.to_string();
    if after.is_empty() {
        return Ok(Segment::Param(name));
    }
    let suffix = after.strip_prefix(':').ok_or("suffix must start with ':'")?;
    if suffix.is_empty() || suffix.contains(['{', '}', ':']) {
        return Err("invalid suffix");
    }
    Ok(Segment::ParamSuffix {
        name,
        suffix: suffix.to_string(),
    })
}

fn valid_name(name: &str) -> Result<&str, &'static str> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        Ok(name)
    } else {
        Err("invalid parameter name")
    }
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn overlap(a: &[Segment], b: &[Segment]) -> bool {
    match (a.first(), b.first()) {
        (None, None) => true,
        // Greedy matches one or more segments; the other side must have at
        // least one left, and any concrete segment is accepted.
        (Some(Segment::Greedy(_)), Some(_)) | (Some(_), Some(Segment::Greedy(_))) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(x), Some(y)) => segments_overlap(x, y) && overlap(&a[1..], &b[1..]),
    }
}

fn segments_overlap(x: &Segment, y: &Segment) -> bool {
    use Segment::*;
    match (x, y) {
        (Literal(l), Literal(r)) => l == r,
        (Literal(l), other) | (other, Literal(l)) => other.accepts(l),
        (Param(_), _) | (_, Param(_)) => true,
        // Suffixes never contain ':', so only equal suffixes collide.
        (ParamSuffix { suffix: s1, .. }, ParamSuffix { suffix: s2, .. }) => s1 == s2,
        (Greedy(_), _) | (_, Greedy(_)) => true,
    }
}
