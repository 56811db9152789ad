//! Header sets for requests and responses.
//!
//! A [`HeaderSet`] carries the HTTP/2 pseudo-headers (`:method`, `:path`,
//! `:scheme`, `:authority` for requests, `:status` for responses) apart from
//! the ordinary name/value fields. Field names are normalized to lowercase on
//! insert, lookups are case-insensitive, and repeated names keep their
//! insertion order.
//!
//! HPACK encoding/decoding is the frame transport's job; this type is the
//! decoded form exchanged across the transport boundary.

use std::fmt;

/// Pseudo-header fields describing a request target or a response status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PseudoHeaders {
    method: Option<String>,
    path: Option<String>,
    scheme: Option<String>,
    authority: Option<String>,
    status: Option<u16>,
}

impl PseudoHeaders {
    /// Request method, e.g. `GET` or `POST`.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Request path.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Request scheme, e.g. `http` or `https`.
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Request authority (host and optional port).
    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Response status code.
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

/// Ordered header collection with pseudo-header fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    pseudo: PseudoHeaders,
    fields: Vec<(String, String)>,
}

impl HeaderSet {
    /// Create an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request header set with method, path and scheme.
    pub fn request(method: &str, path: &str, scheme: &str) -> Self {
        Self {
            pseudo: PseudoHeaders {
                method: Some(method.to_string()),
                path: Some(path.to_string()),
                scheme: Some(scheme.to_string()),
                authority: None,
                status: None,
            },
            fields: Vec::new(),
        }
    }

    /// Create a response header set carrying a status code.
    pub fn response(status: u16) -> Self {
        Self {
            pseudo: PseudoHeaders {
                status: Some(status),
                ..PseudoHeaders::default()
            },
            fields: Vec::new(),
        }
    }

    /// Set the request authority. Returns `self` for builder-style chaining.
    pub fn with_authority(mut self, authority: &str) -> Self {
        self.pseudo.authority = Some(authority.to_string());
        self
    }

    /// The pseudo-header fields.
    pub fn pseudo(&self) -> &PseudoHeaders {
        &self.pseudo
    }

    /// Response status code, if this is a response header set.
    pub fn status(&self) -> Option<u16> {
        self.pseudo.status
    }

    /// Append a field. The name is normalized to lowercase; repeated names
    /// are kept in insertion order.
    pub fn append(&mut self, name: &str, value: &str) {
        self.fields
            .push((name.to_ascii_lowercase(), value.to_string()));
    }

    /// Append a field, builder-style.
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.append(name, value);
        self
    }

    /// First value for a name, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values for a name in insertion order, case-insensitive.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        let name = name.to_ascii_lowercase();
        self.fields
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate all fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of ordinary fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when there are no ordinary fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rough pre-HPACK size of the block, for watermark accounting.
    pub fn encoded_len_estimate(&self) -> usize {
        let pseudo = [
            self.pseudo.method.as_deref(),
            self.pseudo.path.as_deref(),
            self.pseudo.scheme.as_deref(),
            self.pseudo.authority.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|v| v.len() + 8)
        .sum::<usize>()
            + if self.pseudo.status.is_some() { 11 } else { 0 };

        pseudo
            + self
                .fields
                .iter()
                .map(|(n, v)| n.len() + v.len() + 2)
                .sum::<usize>()
    }
}

impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut sep = |f: &mut fmt::Formatter<'_>| -> fmt::Result {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            Ok(())
        };
        if let Some(m) = self.pseudo.method() {
            sep(f)?;
            write!(f, ":method={m}")?;
        }
        if let Some(p) = self.pseudo.path() {
            sep(f)?;
            write!(f, ":path={p}")?;
        }
        if let Some(s) = self.pseudo.scheme() {
            sep(f)?;
            write!(f, ":scheme={s}")?;
        }
        if let Some(a) = self.pseudo.authority() {
            sep(f)?;
            write!(f, ":authority={a}")?;
        }
        if let Some(s) = self.pseudo.status() {
            sep(f)?;
            write!(f, ":status={s}")?;
        }
        for (n, v) in self.iter() {
            sep(f)?;
            write!(f, "{n}={v}")?;
        }
        Ok(())
    }
}
