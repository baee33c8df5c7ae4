//! An ordered, case-insensitive header list

use std::slice;
use std::str;

/// A list of HTTP headers
///
/// Names keep the case they arrived in and lookups ignore case. Repeated
/// headers stay separate entries, in the order they were added, so nothing a
/// client or a script sent is merged or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    /// Adds a header after any existing ones, even of the same name
    pub fn append(&mut self, name: &str, value: Vec<u8>) {
        self.entries.push((String::from(name), value));
    }

    /// Replaces every header called `name` with a single one
    pub fn set(&mut self, name: &str, value: Vec<u8>) {
        self.remove(name);
        self.append(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// The first value of `name`
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_slice())
    }

    /// The first value of `name`, if it is valid UTF-8
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| str::from_utf8(v).ok())
    }

    pub fn get_all<'a>(&'a self, name: &'a str)
                       -> impl Iterator<Item = &'a [u8]> + 'a
    {
        self.entries.iter()
            .filter(move |&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any comma-separated element of `name` equals `token`,
    /// ignoring case. Meant for `Connection` and similar list headers.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(|&b| b == b','))
            .any(|item| trim(item).eq_ignore_ascii_case(token.as_bytes()))
    }

    pub fn iter(&self) -> Iter {
        Iter { inner: self.entries.iter() }
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start .. end]
}

/// Iterator over `(name, value)` pairs in insertion order
pub struct Iter<'a> {
    inner: slice::Iter<'a, (String, Vec<u8>)>
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|&(ref n, ref v)| (n.as_str(), v.as_slice()))
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a str, &'a [u8]);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
