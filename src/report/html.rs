//! Page scaffolding, escaping and the minimal HTTP-like response.

use std::collections::HashMap;
use std::fmt::Write as _;

/// Response to a `GET` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html",
            body: body.into_bytes(),
        }
    }

    pub fn text(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain",
            body: body.into_bytes(),
        }
    }

    pub fn bytes(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type,
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            body: b"Not found".to_vec(),
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: 500,
            content_type: "text/plain",
            body: b"Internal server error".to_vec(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            _ => "Internal Server Error",
        }
    }

    /// Status line, headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-length: {}\r\nContent-type: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.body.len(),
            self.content_type
        )
        .into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `<a href="...">text</a>` with both parts escaped.
pub fn link(href: &str, text: &str) -> String {
    format!("<a href=\"{}\">{}</a>", escape(href), escape(text))
}

/// Full page around `body`.
pub fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head><body>\n<h1>{title}</h1>\n{body}</body></html>\n",
        title = escape(title),
        body = body
    )
}

/// One fixed-width row. The first cell is left aligned (and may be a link),
/// the rest right aligned.
pub fn row(first: &str, first_html: Option<String>, rest: &[String], widths: &[usize]) -> String {
    let mut out = String::new();
    let first_width = widths.first().copied().unwrap_or(0);
    out.push_str(&first_html.unwrap_or_else(|| escape(first)));
    let pad = first_width.saturating_sub(first.chars().count()).max(1);
    out.push_str(&" ".repeat(pad));
    for (i, cell) in rest.iter().enumerate() {
        let width = widths.get(i + 1).copied().unwrap_or(0);
        let _ = write!(out, "{:>width$} ", escape(cell), width = width);
    }
    out.truncate(out.trim_end().len());
    out.push('\n');
    out
}

/// Percent-encode everything outside `[A-Za-z0-9._-~]`; spaces become `+`.
pub fn encode_component(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{:02X}", b);
            }
        }
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Inverse of [`encode_component`]. Malformed escapes are kept literally.
pub fn decode_component(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 2;
                }
                _ => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Request path and decoded query parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Request {
    pub path: String,
    pub query: HashMap<String, String>,
}

impl Request {
    pub fn parse(target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let query = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (decode_component(key), decode_component(value))
            })
            .collect();
        Self {
            path: path.to_string(),
            query,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.query.get(key).map(String::as_str), Some("1") | Some("true"))
    }

    pub fn number<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.query.get(key).and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("<std::vector<int>> & \"x\""),
            "&lt;std::vector&lt;int&gt;&gt; &amp; &quot;x&quot;"
        );
    }

    #[test]
    fn test_component_encoding() {
        let name = "std::vector<int>::push_back a";
        let encoded = encode_component(name);
        assert_eq!(encoded, "std%3A%3Avector%3Cint%3E%3A%3Apush_back+a");
        assert_eq!(decode_component(&encoded), name);
        assert_eq!(decode_component("100%"), "100%");
        assert_eq!(decode_component("%zz"), "%zz");
    }

    #[test]
    fn test_request_parse() {
        let req = Request::parse("/time_gt.html?factor=3.5&pkgs=1");
        assert_eq!(req.path, "/time_gt.html");
        assert_eq!(req.number::<f64>("factor"), Some(3.5));
        assert!(req.flag("pkgs"));
        assert!(!Request::parse("/crash.html").flag("pkgs"));
    }

    #[test]
    fn test_response_header() {
        let text = String::from_utf8(HttpResponse::text("hi".into()).to_bytes()).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\nContent-length: 2\r\nContent-type: text/plain\r\nConnection: close\r\n\r\nhi"
        );
    }

    #[test]
    fn test_row_alignment() {
        let widths = [10, 6, 6];
        assert_eq!(
            row("pkg", None, &["1".into(), "22".into()], &widths),
            format!("pkg{}1{}22\n", " ".repeat(12), " ".repeat(5))
        );
    }
}
