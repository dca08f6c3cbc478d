//! URI templates for resource routing.
//!
//! Templates alternate literal segments with named `{param}` slots, split on
//! `/`. A trailing `{param*}` wildcard captures the rest of the URI. A
//! parameter slot matches exactly one non-empty segment; a wildcard matches
//! one or more. Registration keeps templates unambiguous: two templates that
//! can match a common URI are rejected (see [`UriTemplate::overlaps`]).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One parsed segment of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// `{name}`: one URI segment
    Param(String),
    /// `{name*}`: the remaining segments, joined with `/`
    Wildcard(String),
}

/// A parsed URI template such as `users/{userId}/posts/{postId}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    pattern: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(pattern: &str) -> Result<Self, UriTemplateError> {
        if pattern.is_empty() {
            return Err(UriTemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut seen = Vec::new();
        let raw_segments: Vec<&str> = pattern.split('/').collect();
        let last = raw_segments.len() - 1;

        for (index, raw) in raw_segments.iter().enumerate() {
            if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                let (name, wildcard) = match inner.strip_suffix('*') {
                    Some(name) => (name, true),
                    None => (inner, false),
                };
                if name.is_empty()
                    || !name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(UriTemplateError::BadParamName(raw.to_string()));
                }
                if seen.contains(&name.to_string()) {
                    return Err(UriTemplateError::DuplicateParam(name.to_string()));
                }
                seen.push(name.to_string());
                if wildcard {
                    if index != last {
                        return Err(UriTemplateError::WildcardNotLast(name.to_string()));
                    }
                    segments.push(Segment::Wildcard(name.to_string()));
                } else {
                    segments.push(Segment::Param(name.to_string()));
                }
            } else if raw.contains('{') || raw.contains('}') {
                return Err(UriTemplateError::UnbalancedBrace(raw.to_string()));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of the template's parameters, in order of appearance.
    pub fn param_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) | Segment::Wildcard(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Match a concrete URI, returning extracted parameter bindings.
    pub fn matches(&self, uri: &str) -> Option<TemplateBindings> {
        let parts: Vec<&str> = uri.split('/').collect();
        let mut values = HashMap::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(index) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => match parts.get(index) {
                    Some(part) if !part.is_empty() => {
                        values.insert(name.clone(), (*part).to_string());
                    }
                    _ => return None,
                },
                Segment::Wildcard(name) => {
                    if index >= parts.len() || parts[index..].iter().any(|p| p.is_empty()) {
                        return None;
                    }
                    values.insert(name.clone(), parts[index..].join("/"));
                    return Some(TemplateBindings { values });
                }
            }
        }

        if parts.len() == self.segments.len() {
            Some(TemplateBindings { values })
        } else {
            None
        }
    }

    /// Whether some concrete URI would match both templates.
    ///
    /// Literal segments must agree; a parameter slot unifies with anything;
    /// a wildcard unifies with any non-empty remainder.
    pub fn overlaps(&self, other: &UriTemplate) -> bool {
        let a = &self.segments;
        let b = &other.segments;
        let mut i = 0;

        loop {
            match (a.get(i), b.get(i)) {
                (Some(Segment::Wildcard(_)), Some(_)) => return true,
                (Some(_), Some(Segment::Wildcard(_))) => return true,
                (Some(Segment::Literal(x)), Some(Segment::Literal(y))) => {
                    if x != y {
                        return false;
                    }
                }
                (Some(_), Some(_)) => {} // Param unifies with literal or param
                (None, None) => return true,
                (Some(Segment::Wildcard(_)), None) | (None, Some(Segment::Wildcard(_))) => {
                    return false;
                }
                (Some(_), None) | (None, Some(_)) => return false,
            }
            i += 1;
        }
    }
}

impl std::fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl Serialize for UriTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for UriTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        UriTemplate::parse(&pattern).map_err(serde::de::Error::custom)
    }
}

/// Parameter values extracted from a matched URI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateBindings {
    values: HashMap<String, String>,
}

impl TemplateBindings {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Parameters bind as strings; numeric and boolean conversions are on
    /// demand.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.parse().ok()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.parse().ok()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum UriTemplateError {
    #[error("template pattern is empty")]
    Empty,
    #[error("bad parameter name in segment: {0}")]
    BadParamName(String),
    #[error("duplicate parameter: {0}")]
    DuplicateParam(String),
    #[error("wildcard parameter {0} must be the last segment")]
    WildcardNotLast(String),
    #[error("unbalanced brace in segment: {0}")]
    UnbalancedBrace(String),
}
