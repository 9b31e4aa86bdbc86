//! Line-oriented wire protocol.
//!
//! A connection carries exactly one command line, optionally followed by a
//! body, and is closed after the reply:
//!
//! ```text
//! GetCppcheckVersions\n            -> "head <baseline>"
//! get\n                            -> package url
//! getPackageIdx:<n>\n              -> package url, or close without reply
//! getPackagesCount\n               -> decimal count
//! write\n<url>\n<payload>\nDONE     -> no reply
//! write_info\n<url>\n<payload>\nDONE
//! write_nodata\n<url>\n...         -> no reply, body read to EOF
//! GET /<target> HTTP/1.1\r\n...    -> HTTP-like report response
//! ```
//!
//! Body framing keeps the `DONE` terminator for compatibility with deployed
//! clients; a payload that itself ends in `\nDONE` is indistinguishable from
//! the terminator.

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::time::timeout;

/// Body terminator of `write` and `write_info`.
pub const BODY_TERMINATOR: &str = "\nDONE";

/// Connection-local protocol violations. None of these affect other
/// connections or server state.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("connection closed before a command was received")]
    Closed,

    #[error("command line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("disallowed byte {0:#04x} in command line")]
    DisallowedByte(u8),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("body larger than {0} bytes")]
    BodyTooLarge(usize),

    #[error("connection closed before the body terminator")]
    Unterminated,

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("invalid package index {0:?}")]
    InvalidIndex(String),

    #[error("upload body has no url line")]
    MissingUrl,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    GetVersions,
    Get,
    GetPackageIdx(usize),
    GetPackagesCount,
    Write,
    WriteInfo,
    WriteNodata,
    /// Report request with its target (`/path?query`)
    HttpGet(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetVersions => write!(f, "GetCppcheckVersions"),
            Command::Get => write!(f, "get"),
            Command::GetPackageIdx(n) => write!(f, "getPackageIdx:{}", n),
            Command::GetPackagesCount => write!(f, "getPackagesCount"),
            Command::Write => write!(f, "write"),
            Command::WriteInfo => write!(f, "write_info"),
            Command::WriteNodata => write!(f, "write_nodata"),
            Command::HttpGet(target) => write!(f, "GET {}", target),
        }
    }
}

fn allowed_command_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'/' | b' ' | b'_' | b':')
}

fn allowed_target_byte(b: u8) -> bool {
    allowed_command_byte(b) || matches!(b, b'?' | b'=' | b'&' | b'-' | b'+' | b'%' | b'~')
}

/// Validate and parse a command line (without its line terminator).
pub fn parse_command_line(line: &[u8]) -> Result<Command, ProtocolError> {
    let is_get = line.starts_with(b"GET ");
    if let Some(&bad) = line.iter().find(|&&b| {
        if is_get {
            !allowed_target_byte(b)
        } else {
            !allowed_command_byte(b)
        }
    }) {
        return Err(ProtocolError::DisallowedByte(bad));
    }
    // Every byte is ASCII at this point.
    let line = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8("command line"))?;

    if is_get {
        let target = line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| ProtocolError::UnknownCommand(line.to_string()))?;
        return Ok(Command::HttpGet(target.to_string()));
    }

    let command = line.trim();
    if let Some(index) = command.strip_prefix("getPackageIdx:") {
        return index
            .trim()
            .parse::<usize>()
            .map(Command::GetPackageIdx)
            .map_err(|_| ProtocolError::InvalidIndex(index.to_string()));
    }
    match command {
        "GetCppcheckVersions" => Ok(Command::GetVersions),
        "get" => Ok(Command::Get),
        "getPackagesCount" => Ok(Command::GetPackagesCount),
        "write" => Ok(Command::Write),
        "write_info" => Ok(Command::WriteInfo),
        "write_nodata" => Ok(Command::WriteNodata),
        other => Err(ProtocolError::UnknownCommand(other.to_string())),
    }
}

/// Read the first line of a connection, up to `limit` bytes. The trailing
/// `\n`/`\r\n` is removed. A line cut short by EOF is returned as is.
pub async fn read_command_line<R>(
    reader: &mut R,
    limit: usize,
    idle: Duration,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let available = timeout(idle, reader.fill_buf())
            .await
            .map_err(|_| ProtocolError::IdleTimeout(idle))??;
        if available.is_empty() {
            if line.is_empty() {
                return Err(ProtocolError::Closed);
            }
            break;
        }

        let (used, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        line.extend_from_slice(&available[..used]);
        reader.consume(used);

        // +2 leaves room for the "\r\n" terminator
        if line.len() > limit + 2 {
            return Err(ProtocolError::LineTooLong(limit));
        }
        if complete {
            break;
        }
    }

    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    if line.len() > limit {
        return Err(ProtocolError::LineTooLong(limit));
    }
    Ok(line)
}

/// How a body read ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyFraming {
    /// Ends with [`BODY_TERMINATOR`]; EOF or idle timeout first is an error
    Terminated,
    /// Ends at EOF or when the peer goes quiet
    UntilQuiet,
}

/// Read a body of at most `limit` bytes. A terminated body is returned
/// without its terminator.
pub async fn read_body<R>(
    reader: &mut R,
    limit: usize,
    idle: Duration,
    framing: BodyFraming,
) -> Result<String, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let read = match timeout(idle, reader.read(&mut chunk)).await {
            Ok(read) => read?,
            Err(_) => match framing {
                BodyFraming::Terminated => return Err(ProtocolError::IdleTimeout(idle)),
                BodyFraming::UntilQuiet => break,
            },
        };
        if read == 0 {
            match framing {
                BodyFraming::Terminated => return Err(ProtocolError::Unterminated),
                BodyFraming::UntilQuiet => break,
            }
        }

        body.extend_from_slice(&chunk[..read]);
        if body.len() > limit + BODY_TERMINATOR.len() + 2 {
            return Err(ProtocolError::BodyTooLarge(limit));
        }

        if framing == BodyFraming::Terminated {
            let end = body
                .iter()
                .rposition(|b| !b.is_ascii_whitespace())
                .map_or(0, |p| p + 1);
            if body[..end].ends_with(BODY_TERMINATOR.as_bytes()) {
                body.truncate(end - BODY_TERMINATOR.len());
                break;
            }
        }
    }

    if body.len() > limit {
        return Err(ProtocolError::BodyTooLarge(limit));
    }
    String::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8("body"))
}

/// Split an upload body into its url line and payload.
pub fn split_upload(body: &str) -> Result<(&str, &str), ProtocolError> {
    let (url, payload) = body.split_once('\n').unwrap_or((body, ""));
    let url = url.trim();
    if url.is_empty() {
        return Err(ProtocolError::MissingUrl);
    }
    Ok((url, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    const IDLE: Duration = Duration::from_millis(200);

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command_line(b"GetCppcheckVersions").unwrap(),
            Command::GetVersions
        );
        assert_eq!(parse_command_line(b"get").unwrap(), Command::Get);
        assert_eq!(
            parse_command_line(b"getPackageIdx:42").unwrap(),
            Command::GetPackageIdx(42)
        );
        assert_eq!(parse_command_line(b"write_info").unwrap(), Command::WriteInfo);
        assert_eq!(
            parse_command_line(b"GET /time_gt.html?factor=3&pkgs=1 HTTP/1.1").unwrap(),
            Command::HttpGet("/time_gt.html?factor=3&pkgs=1".to_string())
        );
    }

    #[test]
    fn test_disallowed_bytes_rejected() {
        for line in [
            &b"get;rm -rf /"[..],
            &b"write\x00"[..],
            &b"get\xc3\xa9"[..],
            &b"getPackageIdx:1|2"[..],
            &b"GET /<script> HTTP/1.1"[..],
        ] {
            assert!(matches!(
                parse_command_line(line),
                Err(ProtocolError::DisallowedByte(_))
            ));
        }
        // query punctuation is only valid in report targets
        assert!(matches!(
            parse_command_line(b"get?x=1"),
            Err(ProtocolError::DisallowedByte(b'?'))
        ));
    }

    #[test]
    fn test_bad_index_and_unknown_command() {
        assert!(matches!(
            parse_command_line(b"getPackageIdx:abc"),
            Err(ProtocolError::InvalidIndex(_))
        ));
        assert!(matches!(
            parse_command_line(b"shutdown"),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[tokio::test]
    async fn test_read_command_line_leaves_body() {
        let input: &[u8] = b"write\r\nftp://x/pkg.tar.gz\npayload\nDONE";
        let mut reader = BufReader::new(input);
        let line = read_command_line(&mut reader, 1024, IDLE).await.unwrap();
        assert_eq!(line, b"write");
        let body = read_body(&mut reader, 1024, IDLE, BodyFraming::Terminated)
            .await
            .unwrap();
        assert_eq!(body, "ftp://x/pkg.tar.gz\npayload");
    }

    #[tokio::test]
    async fn test_read_command_line_length_cap() {
        let long = vec![b'a'; 2000];
        let mut reader = BufReader::new(&long[..]);
        assert!(matches!(
            read_command_line(&mut reader, 1024, IDLE).await,
            Err(ProtocolError::LineTooLong(1024))
        ));
    }

    #[tokio::test]
    async fn test_read_command_line_closed() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(matches!(
            read_command_line(&mut reader, 1024, IDLE).await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_unterminated_body_is_error() {
        let mut reader = BufReader::new(&b"url\npayload without terminator"[..]);
        assert!(matches!(
            read_body(&mut reader, 1024, IDLE, BodyFraming::Terminated).await,
            Err(ProtocolError::Unterminated)
        ));
    }

    #[tokio::test]
    async fn test_oversized_body_is_error() {
        let mut body = vec![b'x'; 4096];
        body.extend_from_slice(b"\nDONE");
        let mut reader = BufReader::new(&body[..]);
        assert!(matches!(
            read_body(&mut reader, 1024, IDLE, BodyFraming::Terminated).await,
            Err(ProtocolError::BodyTooLarge(1024))
        ));
    }

    #[tokio::test]
    async fn test_terminator_with_trailing_newline() {
        let mut reader = BufReader::new(&b"url\nline\nDONE\n"[..]);
        let body = read_body(&mut reader, 1024, IDLE, BodyFraming::Terminated)
            .await
            .unwrap();
        assert_eq!(body, "url\nline");
    }

    #[tokio::test]
    async fn test_invalid_utf8_body() {
        let mut reader = BufReader::new(&b"url\n\xff\xfe\nDONE"[..]);
        assert!(matches!(
            read_body(&mut reader, 1024, IDLE, BodyFraming::Terminated).await,
            Err(ProtocolError::InvalidUtf8("body"))
        ));
    }

    #[tokio::test]
    async fn test_until_quiet_reads_to_eof() {
        let mut reader = BufReader::new(&b"ftp://x/pkg.tar.gz\n"[..]);
        let body = read_body(&mut reader, 1024, IDLE, BodyFraming::UntilQuiet)
            .await
            .unwrap();
        assert_eq!(split_upload(&body).unwrap().0, "ftp://x/pkg.tar.gz");
    }

    #[test]
    fn test_split_upload() {
        assert_eq!(split_upload("u\na\nb").unwrap(), ("u", "a\nb"));
        assert!(matches!(split_upload("\npayload"), Err(ProtocolError::MissingUrl)));
    }
}
