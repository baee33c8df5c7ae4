//! Helpers for request-target manipulations

use crate::errors::{Error, Result};

/// Splits an origin-form request-target into its path and query.
///
/// The query is returned raw, without the `'?'`. A target without a query
/// gets an empty one.
pub fn split_target(target: &str) -> (&str, &str) {
    match target.find('?') {
        Some(i) => (&target[.. i], &target[i + 1 ..]),
        None => (target, "")
    }
}

/// Normalizes a request path.
///
/// The following operations are performed:
///
/// 1. The path must lead with a `'/'`, otherwise it is not in origin form
///    and we return an `Err`. The leading slash is kept.
/// 2. Sequences of multiple `'/'` characters are collapsed into a single `'/'`.
/// 3. Percent-encoded bytes are decoded. Bogus percent-encoding, like `b"%bo"`,
///    or an encoded NUL, will return `Err`.
pub fn normalize_path(path: &[u8]) -> Result<Vec<u8>> {
    if path.first() != Some(&b'/') {
        return Err(Error::PathNotInOriginForm);
    }

    let mut buffer = Vec::with_capacity(path.len());
    let mut i = 0;

    while i < path.len() {
        match path[i] {
            b'/' => {
                buffer.push(b'/');
                while i < path.len() && path[i] == b'/' {
                    i += 1;
                }
            },
            b'%' => {
                if path.len() < i + 3 {
                    return Err(Error::IllegalPercentEncoding);
                }

                let decoded = match (from_hexit(path[i + 1]),
                                     from_hexit(path[i + 2])) {
                    (Some(high), Some(low)) => high << 4 | low,
                    _ => return Err(Error::IllegalPercentEncoding)
                };

                // Ends up in an environment variable
                if decoded == 0 {
                    return Err(Error::IllegalPercentEncoding);
                }

                buffer.push(decoded);
                i += 3;
            },
            b => {
                buffer.push(b);
                i += 1;
            }
        }
    }

    Ok(buffer)
}

/// Strips a mount prefix off a decoded path, on segment boundaries.
///
/// Returns the remainder (the CGI `PATH_INFO`), or `None` if the path is not
/// under the prefix. A prefix of `"/"` matches everything.
pub fn strip_mount<'a>(path: &'a [u8], mount: &str) -> Option<&'a [u8]> {
    let mount = mount.trim_end_matches('/').as_bytes();

    if !path.starts_with(mount) {
        return None;
    }

    let rest = &path[mount.len() ..];
    if rest.is_empty() || rest[0] == b'/' {
        Some(rest)
    }
    else {
        None
    }
}

/// Converts from a hexadecimal digit to its value
fn from_hexit(x: u8) -> Option<u8> {
    match x {
        b'0' ..= b'9' => Some(x - b'0'),
        b'A' ..= b'F' => Some(x - b'A' + 10),
        b'a' ..= b'f' => Some(x - b'a' + 10),
        _ => None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_keeps_leading_slash() {
        assert_eq!(normalize_path(b"/blah").unwrap(), b"/blah");
        assert_eq!(normalize_path(b"//bleh").unwrap(), b"/bleh");
    }

    #[test]
    fn normalize_collapses_embedded_slash_sequences() {
        assert_eq!(normalize_path(b"/foo//bar").unwrap(), b"/foo/bar");
    }

    #[test]
    fn normalize_decodes_percents() {
        assert_eq!(normalize_path(b"/foo%20bar").unwrap(), b"/foo bar");
    }

    #[test]
    fn normalize_handles_trailing_percents_correctly() {
        assert_eq!(normalize_path(b"/trail%20").unwrap(), b"/trail ");
        assert!(normalize_path(b"/trail%2").is_err());
    }

    #[test]
    fn normalize_errors_on_bogus_percent() {
        assert!(normalize_path(b"/bog%us").is_err());
    }

    #[test]
    fn normalize_errors_on_encoded_nul() {
        assert!(normalize_path(b"/a%00b").is_err());
    }

    #[test]
    fn normalize_errors_without_leading_slash() {
        assert!(normalize_path(b"bogus").is_err());
        assert!(normalize_path(b"").is_err());
    }

    #[test]
    fn split_target_separates_query() {
        assert_eq!(split_target("/a/b?x=1&y"), ("/a/b", "x=1&y"));
        assert_eq!(split_target("/a/b"), ("/a/b", ""));
        assert_eq!(split_target("/?"), ("/", ""));
    }

    #[test]
    fn strip_mount_root_matches_everything() {
        assert_eq!(strip_mount(b"/inbox/msg", "/"), Some(&b"/inbox/msg"[..]));
        assert_eq!(strip_mount(b"/", "/"), Some(&b"/"[..]));
    }

    #[test]
    fn strip_mount_respects_segments() {
        assert_eq!(strip_mount(b"/cgi/x", "/cgi"), Some(&b"/x"[..]));
        assert_eq!(strip_mount(b"/cgi", "/cgi/"), Some(&b""[..]));
        assert_eq!(strip_mount(b"/cgix", "/cgi"), None);
        assert_eq!(strip_mount(b"/other", "/cgi"), None);
    }
}

#[test]
fn from_hexit_works() {
    use std::char;

    for x in 0x0 .. 0x10 {
        let digit = char::from_digit(x, 16).unwrap();
        assert_eq!(from_hexit(digit as u8), Some(x as u8));
        assert_eq!(from_hexit(digit.to_ascii_uppercase() as u8),
                   Some(x as u8));
    }
    assert_eq!(from_hexit(b'g'), None);
}
