//! Parsers for CGI/1.1 responses

use crate::cgi::{CgiResponse, Header, Status};
use crate::errors::{Error, Result};

use nom::bytes::complete::{tag, take_till, take_till1, take_while_m_n};
use nom::character::complete::{line_ending, space0};
use nom::character::is_digit;
use nom::combinator::{all_consuming, map_res};
use nom::multi::many0;
use nom::sequence::terminated;
use nom::IResult;

use std::str;

fn cr_or_lf(x: u8) -> bool {
    x == b'\n' || x == b'\r'
}

fn code(input: &[u8]) -> IResult<&[u8], u16> {
    map_res(
        map_res(take_while_m_n(3, 3, is_digit), str::from_utf8),
        |digits: &str| digits.parse::<u16>())(input)
}

/// The value of a `Status` header: a code, then an optional reason phrase
pub fn status(input: &[u8]) -> IResult<&[u8], Status> {
    let (input, code) = code(input)?;
    let (input, _) = space0(input)?;
    let (input, phrase) = take_till(cr_or_lf)(input)?;

    Ok((input, Status { code, reason_phrase: Vec::from(phrase) }))
}

/// One `Name: value` line, line ending included
pub fn header(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, name) = take_till1(|b: u8| b == b':' || cr_or_lf(b))(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, _) = space0(input)?;
    let (input, content) = take_till(cr_or_lf)(input)?;
    let (input, _) = line_ending(input)?;

    Ok((input, Header { name: Vec::from(name), content: Vec::from(content) }))
}

/// Header lines up to and including the blank line that ends them
pub fn headers(input: &[u8]) -> IResult<&[u8], Vec<Header>> {
    terminated(many0(header), line_ending)(input)
}

/// Splits a script's complete output into a `CgiResponse`.
///
/// The `Status` header is lifted out of the header list; a malformed one,
/// a malformed header line or a missing blank line is a protocol error.
pub fn parse_document(output: &[u8]) -> Result<CgiResponse> {
    let (body, mut hdrs) = match headers(output) {
        Ok(parsed) => parsed,
        Err(_) => return Err(Error::CgiProtocol(
            String::from("no header block terminated by a blank line")))
    };

    let mut status = None;
    if let Some(i) = hdrs.iter()
        .position(|h| h.name.eq_ignore_ascii_case(b"Status"))
    {
        let Header { content, .. } = hdrs.remove(i);
        let parsed = all_consuming(status_value)(&content[..])
            .map(|(_, parsed)| parsed);
        match parsed {
            Ok(parsed) => status = Some(parsed),
            Err(_) => return Err(Error::CgiProtocol(format!(
                "bad Status header {:?}", String::from_utf8_lossy(&content))))
        }
    }

    if hdrs.iter().any(|h| h.name.eq_ignore_ascii_case(b"Status")) {
        return Err(Error::CgiProtocol(String::from("repeated Status header")));
    }

    Ok(CgiResponse {
        status,
        headers: hdrs,
        body: Vec::from(body)
    })
}

fn status_value(input: &[u8]) -> IResult<&[u8], Status> {
    let (rest, parsed) = status(input)?;
    if parsed.code < 100 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input, nom::error::ErrorKind::Verify)));
    }
    Ok((rest, parsed))
}

#[cfg(test)]
mod test {
    use super::*;

    fn hdr(name: &str, content: &str) -> Header {
        Header {
            name: Vec::from(name.as_bytes()),
            content: Vec::from(content.as_bytes())
        }
    }

    #[test]
    fn header_works() {
        let input: &[u8] = b"Foo: bar\r\n\r\n";

        match header(input) {
            Ok((rest, res)) => {
                assert_eq!(hdr("Foo", "bar"), res);
                assert_eq!(b"\r\n", rest);
            },
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn header_without_space_or_value() {
        assert_eq!(header(b"Foo:bar\n").unwrap().1, hdr("Foo", "bar"));
        assert_eq!(header(b"Foo:\n").unwrap().1, hdr("Foo", ""));
    }

    #[test]
    fn header_needs_a_colon() {
        assert!(header(b"<html>\n").is_err());
        assert!(header(b"\r\n").is_err());
    }

    #[test]
    fn test_headers() {
        let input: &[u8] = b"Foo: bar\r\nBaz: buz\r\n\r\n";

        match headers(input) {
            Ok((rest, hdrs)) => {
                assert_eq!(vec![hdr("Foo", "bar"), hdr("Baz", "buz")], hdrs);
                assert_eq!(b"", rest);
            },
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn status_values() {
        let (_, s) = status(b"404 Not Found").unwrap();
        assert_eq!(s, Status { code: 404, reason_phrase: b"Not Found".to_vec() });

        let (_, s) = status(b"204").unwrap();
        assert_eq!(s, Status { code: 204, reason_phrase: Vec::new() });

        assert!(status(b"OK").is_err());
    }

    #[test]
    fn document_with_bare_newlines() {
        let doc = parse_document(b"Content-Type: text/plain\n\nhello\n\nworld")
            .unwrap();

        assert_eq!(doc.status, None);
        assert_eq!(doc.headers, vec![hdr("Content-Type", "text/plain")]);
        assert_eq!(doc.body, b"hello\n\nworld");
    }

    #[test]
    fn document_with_empty_header_block() {
        let doc = parse_document(b"\r\nbody").unwrap();

        assert!(doc.headers.is_empty());
        assert_eq!(doc.body, b"body");
    }

    #[test]
    fn document_without_separator_is_an_error() {
        for output in &[&b""[..],
                        &b"Content-Type: text/plain\r\n"[..],
                        &b"Content-Type: text/plain\r\nhello"[..],
                        &b"just some text"[..]] {
            match parse_document(output) {
                Err(Error::CgiProtocol(_)) => (),
                other => panic!("{:?} gave {:?}", output, other)
            }
        }
    }

    #[test]
    fn document_with_bad_status_is_an_error() {
        for output in &[&b"Status: OK\r\n\r\n"[..],
                        &b"Status: 20\r\n\r\n"[..],
                        &b"Status: 099 Low\r\n\r\n"[..],
                        &b"Status: 200\r\nStatus: 404\r\n\r\n"[..]] {
            match parse_document(output) {
                Err(Error::CgiProtocol(_)) => (),
                other => panic!("{:?} gave {:?}", output, other)
            }
        }
    }

    #[test]
    fn doc_headers_on_captured_traffic() {
        let input: &[u8] = b"Status: 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nDate: Thu, 07 Apr 2016 20:42:43 GMT\r\n\r\n<!DOCTYPE html>\n<html>\n  <head>\n    <title>Guestbook</title>\n  </head>\n  <body>\n    <blockquote>New\r\nLines\r\nAre\r\nGreat!</blockquote>\n    <p>\xe2\x80\x94 <cite>newliner</cite></p>\n  </body>\n</html>\n";

        let doc = parse_document(input).unwrap();

        assert_eq!(doc.status, Some(Status {
            code: 200,
            reason_phrase: Vec::from(&b"OK"[..])
        }));
        assert_eq!(doc.headers, vec![
            hdr("Content-Type", "text/html; charset=utf-8"),
            hdr("Date", "Thu, 07 Apr 2016 20:42:43 GMT")
        ]);
        assert!(doc.body.starts_with(b"<!DOCTYPE html>"));
        assert!(doc.body.ends_with(b"</html>\n"));
    }
}
