//! Minimal HTTP/1.1 framing for the proxy.
//!
//! Renderers send one request per connection and the proxy always answers
//! with `Connection: close`, so only the request head is parsed: request line
//! and headers up to the first blank line. Bodies are never read.

use std::fmt::Write as _;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

#[derive(Debug, Error)]
pub(crate) enum HeadError {
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request line: {0:?}")]
    Malformed(String),
}

/// Parsed request line and headers.
#[derive(Debug, Clone)]
pub(crate) struct RequestHead {
    pub method: String,
    /// Request target as sent, including the query string.
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Target without its query string.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Form-decoded value of the first query parameter named `key`.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| {
                let v = v.replace('+', " ");
                urlencoding::decode(&v).ok().map(|s| s.into_owned())
            })
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

/// Reads a request head of at most `max_size` bytes.
///
/// Returns `Ok(None)` if the peer closed the connection before sending a
/// request line.
pub(crate) async fn read_request_head<R>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<RequestHead>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0usize;
    let mut line = String::new();

    let Some(request_line) = read_line(reader, &mut line, &mut consumed, max_size).await? else {
        return Ok(None);
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(HeadError::Malformed(request_line.clone()));
    };
    let (method, target) = (method.to_string(), target.to_string());

    let mut headers = Vec::new();
    loop {
        match read_line(reader, &mut line, &mut consumed, max_size).await? {
            None => break,
            Some(l) if l.is_empty() => break,
            Some(l) => {
                if let Some((k, v)) = l.split_once(':') {
                    headers.push((k.trim().to_string(), v.trim().to_string()));
                }
            }
        }
    }

    Ok(Some(RequestHead {
        method,
        target,
        headers,
    }))
}

/// Reads one CRLF/LF-terminated line. `None` at EOF.
async fn read_line<R>(
    reader: &mut R,
    buf: &mut String,
    consumed: &mut usize,
    max_size: usize,
) -> Result<Option<String>, HeadError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let remaining = max_size.saturating_sub(*consumed);
    let n = (&mut *reader).take(remaining as u64).read_line(buf).await?;
    if n == 0 {
        if remaining == 0 {
            return Err(HeadError::TooLarge(max_size));
        }
        return Ok(None);
    }
    *consumed += n;
    if !buf.ends_with('\n') && *consumed >= max_size {
        return Err(HeadError::TooLarge(max_size));
    }
    Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string()))
}

/// Response head builder. Always closes the connection.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
}

impl ResponseHead {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Serialises the head. Adds `Connection: close` and, if none was set,
    /// `Content-Length: 0` for bodiless error responses.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256);
        let _ = write!(out, "HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
        if self.status >= 400
            && !self
                .headers
                .iter()
                .any(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        {
            out.push_str("Content-Length: 0\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");
        out.into_bytes()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        416 => "Range Not Satisfiable",
        431 => "Request Header Fields Too Large",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}
