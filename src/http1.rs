//! HTTP/1.x response framing: parse a status line and headers with
//! `httparse`, then consume exactly as much body as the framing says is
//! there so the connection is left positioned at the start of the next
//! response.
//!
//! Grounded on the teacher crate's `h1::proto::decode`, which drives the
//! same `httparse::Response` parser over a growable recv buffer.

use crate::connection::Connection;
use crate::error::{Error, Result};

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 4096;

pub struct ResponseHead {
    pub status: u16,
}

/// Read one full response (status line, headers, body) from `conn`,
/// returning the status code. The connection is left ready for the next
/// request on the same stream.
pub async fn read_response(conn: &mut Connection) -> Result<ResponseHead> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let (status, header_end, content_length, chunked) = loop {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);
        match resp.parse(&buf)? {
            httparse::Status::Complete(header_end) => {
                let status = resp.code.ok_or(Error::Parse(httparse::Error::Status))?;
                let mut content_length = None;
                let mut chunked = false;
                for h in resp.headers.iter() {
                    if h.name.eq_ignore_ascii_case("content-length") {
                        content_length = std::str::from_utf8(h.value).ok().and_then(|v| v.trim().parse().ok());
                    } else if h.name.eq_ignore_ascii_case("transfer-encoding")
                        && h.value.eq_ignore_ascii_case(b"chunked")
                    {
                        chunked = true;
                    }
                }
                break (status, header_end, content_length, chunked);
            }
            httparse::Status::Partial => {
                read_more(conn, &mut buf).await?;
            }
        }
    };

    let mut body_have = buf.len() - header_end;
    if chunked {
        // buf[header_end..] may already contain part of the chunked body;
        // keep pulling until a terminating 0-size chunk is observed.
        let mut scan_from = header_end;
        loop {
            match find_terminal_chunk(&buf[scan_from..]) {
                Some(_) => break,
                None => {
                    scan_from = buf.len().saturating_sub(5).max(header_end);
                    read_more(conn, &mut buf).await?;
                }
            }
        }
    } else if let Some(len) = content_length {
        while body_have < len {
            let before = buf.len();
            read_more(conn, &mut buf).await?;
            body_have += buf.len() - before;
        }
    }
    // absent both framing headers: treat as a bodyless response (e.g. 204),
    // the common case for synthetic load test endpoints.

    Ok(ResponseHead { status })
}

async fn read_more(conn: &mut Connection, buf: &mut Vec<u8>) -> Result<()> {
    let start = buf.len();
    buf.resize(start + READ_CHUNK, 0);
    let n = conn.read(&mut buf[start..]).await?;
    buf.truncate(start + n);
    if n == 0 {
        return Err(Error::ConnectionClosed);
    }
    Ok(())
}

fn find_terminal_chunk(body: &[u8]) -> Option<usize> {
    body.windows(5).position(|w| w == b"0\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_terminal_chunk_marker() {
        assert!(find_terminal_chunk(b"5\r\nhello\r\n0\r\n\r\n").is_some());
        assert!(find_terminal_chunk(b"5\r\nhello\r\n").is_none());
    }
}
