//! Header model and recursive value rewriting.
//!
//! # Responsibilities
//! - Keep headers as ordered name/value entries, with repeated names grouped
//!   into nested lists
//! - Apply a text transform to every textual leaf, bounded in depth
//! - Convert to and from the wire representation
//!
//! # Design Decisions
//! - Rewriting never adds, removes or renames an entry
//! - Non-UTF-8 values travel as opaque bytes and are never transformed
//! - Traversal deeper than [`MAX_HEADER_DEPTH`] fails the session instead of
//!   recursing without limit

use std::borrow::Cow;

use axum::body::Bytes;
use axum::http::{self, HeaderMap, HeaderName};
use tracing::warn;

use crate::error::ProxyError;

pub const MAX_HEADER_DEPTH: usize = 8;

/// A header value: text, a list of values, or bytes that are not UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    List(Vec<HeaderValue>),
    Opaque(Bytes),
}

impl HeaderValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// First textual leaf, depth-first.
    pub fn first_text(&self) -> Option<&str> {
        let mut current = self;
        loop {
            match current {
                HeaderValue::Text(text) => return Some(text),
                HeaderValue::List(items) => current = items.first()?,
                HeaderValue::Opaque(_) => return None,
            }
        }
    }

    /// Every textual leaf in wire order.
    pub fn texts_mut(&mut self) -> Vec<&mut String> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(value) = stack.pop() {
            match value {
                HeaderValue::Text(text) => out.push(text),
                HeaderValue::List(items) => stack.extend(items.iter_mut().rev()),
                HeaderValue::Opaque(_) => {}
            }
        }
        out
    }

    fn from_wire(value: &http::HeaderValue) -> Self {
        match value.to_str() {
            Ok(text) => HeaderValue::Text(text.to_string()),
            Err(_) => HeaderValue::Opaque(Bytes::copy_from_slice(value.as_bytes())),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(text: &str) -> Self {
        HeaderValue::Text(text.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(text: String) -> Self {
        HeaderValue::Text(text)
    }
}

/// Ordered header entries. Lookups ignore case; stored names keep theirs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut set = HeaderSet::new();
        for name in map.keys() {
            let mut values: Vec<HeaderValue> =
                map.get_all(name).iter().map(HeaderValue::from_wire).collect();
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                HeaderValue::List(values)
            };
            set.entries.push((name.as_str().to_string(), value));
        }
        set
    }

    /// Flatten back to the wire. Entries that cannot be represented are
    /// dropped with a warning.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(header = %name, "dropping header with invalid name");
                continue;
            };
            let mut stack = vec![value];
            while let Some(value) = stack.pop() {
                let wire = match value {
                    HeaderValue::List(items) => {
                        stack.extend(items.iter().rev());
                        continue;
                    }
                    HeaderValue::Text(text) => http::HeaderValue::from_str(text).ok(),
                    HeaderValue::Opaque(bytes) => http::HeaderValue::from_bytes(bytes).ok(),
                };
                match wire {
                    Some(wire) => {
                        map.append(header.clone(), wire);
                    }
                    None => warn!(header = %name, "dropping invalid header value"),
                }
            }
        }
        map
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut HeaderValue> {
        self.position(name).map(|i| &mut self.entries[i].1)
    }

    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HeaderValue::first_text)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replace the value in place, or append a new entry.
    pub fn insert(&mut self, name: &str, value: impl Into<HeaderValue>) -> Option<HeaderValue> {
        let value = value.into();
        match self.position(name) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((name.to_ascii_lowercase(), value));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<HeaderValue> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// Applies a text transform to every header value.
#[derive(Debug, Clone, Copy)]
pub struct HeaderRewriter {
    max_depth: usize,
}

impl Default for HeaderRewriter {
    fn default() -> Self {
        HeaderRewriter::new(MAX_HEADER_DEPTH)
    }
}

impl HeaderRewriter {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Rewrite in place. Returns how many leaves changed.
    pub fn rewrite<F>(&self, headers: &mut HeaderSet, transform: F) -> Result<usize, ProxyError>
    where
        F: for<'a> Fn(&'a str) -> Cow<'a, str>,
    {
        let mut changed = 0;
        for (name, value) in headers.entries.iter_mut() {
            rewrite_value(value, 1, self.max_depth, &transform, &mut changed).map_err(|()| {
                ProxyError::HeaderDepthExceeded {
                    name: name.clone(),
                    limit: self.max_depth,
                }
            })?;
        }
        Ok(changed)
    }
}

fn rewrite_value<F>(
    value: &mut HeaderValue,
    depth: usize,
    limit: usize,
    transform: &F,
    changed: &mut usize,
) -> Result<(), ()>
where
    F: for<'a> Fn(&'a str) -> Cow<'a, str>,
{
    if depth > limit {
        return Err(());
    }
    match value {
        HeaderValue::Text(text) => {
            let replaced = match transform(text) {
                Cow::Owned(new) => Some(new),
                Cow::Borrowed(_) => None,
            };
            if let Some(new) = replaced {
                if new != *text {
                    *text = new;
                    *changed += 1;
                }
            }
        }
        HeaderValue::List(items) => {
            for item in items {
                rewrite_value(item, depth + 1, limit, transform, changed)?;
            }
        }
        HeaderValue::Opaque(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(text: &str) -> Cow<'_, str> {
        if text.bytes().any(|b| b.is_ascii_lowercase()) {
            Cow::Owned(text.to_ascii_uppercase())
        } else {
            Cow::Borrowed(text)
        }
    }

    fn nested(depth: usize) -> HeaderValue {
        let mut value = HeaderValue::from("leaf");
        for _ in 1..depth {
            value = HeaderValue::List(vec![value]);
        }
        value
    }

    #[test]
    fn groups_repeated_names() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        map.insert("host", "example.com".parse().unwrap());

        let set = HeaderSet::from_header_map(&map);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.get("Set-Cookie"),
            Some(&HeaderValue::List(vec!["a=1".into(), "b=2".into()]))
        );
        assert_eq!(set.to_header_map(), map);
    }

    #[test]
    fn opaque_values_survive_untouched() {
        let mut map = HeaderMap::new();
        map.insert("x-raw", http::HeaderValue::from_bytes(b"caf\xe9").unwrap());
        let mut set = HeaderSet::from_header_map(&map);
        assert!(matches!(set.get("x-raw"), Some(HeaderValue::Opaque(_))));

        HeaderRewriter::default().rewrite(&mut set, upper).unwrap();
        assert_eq!(set.to_header_map(), map);
    }

    #[test]
    fn rewrite_keeps_names_and_count() {
        let mut set = HeaderSet::new();
        set.insert("Host", "a.example.com");
        set.insert("accept", HeaderValue::List(vec!["text/html".into(), "*/*".into()]));
        set.insert("x-upper", "DONE");
        let names: Vec<String> = set.names().map(str::to_string).collect();

        let changed = HeaderRewriter::default().rewrite(&mut set, upper).unwrap();
        assert_eq!(changed, 2);
        assert_eq!(set.names().collect::<Vec<_>>(), names);
        assert_eq!(set.first_text("host"), Some("A.EXAMPLE.COM"));
        assert_eq!(set.first_text("accept"), Some("TEXT/HTML"));
    }

    #[test]
    fn depth_limit_is_inclusive() {
        let mut set = HeaderSet::new();
        set.insert("x-deep", nested(MAX_HEADER_DEPTH));
        assert!(HeaderRewriter::default().rewrite(&mut set, upper).is_ok());

        set.insert("x-deep", nested(MAX_HEADER_DEPTH + 1));
        let err = HeaderRewriter::default().rewrite(&mut set, upper).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::HeaderDepthExceeded { ref name, limit: MAX_HEADER_DEPTH } if name == "x-deep"
        ));
    }

    #[test]
    fn insert_overwrites_and_remove_deletes() {
        let mut set = HeaderSet::new();
        assert!(set.insert("X-Test", "1").is_none());
        assert_eq!(set.insert("x-test", "2"), Some("1".into()));
        assert_eq!(set.len(), 1);
        assert_eq!(set.remove("X-TEST"), Some("2".into()));
        assert!(set.is_empty());
    }
}
