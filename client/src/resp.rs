//! One-shot RESP commands.
//!
//! Just enough of the protocol to send a single command on a fresh connection
//! and read its reply: `PING`, `CLUSTER INFO`, `SENTINEL get-master-addr-by-name`,
//! `SHUTDOWN`.

use crate::config::ClientConfig;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Upper bound on a reply we are willing to buffer
const MAX_REPLY_SIZE: usize = 1024 * 1024;

/// A decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Text payload of a simple or bulk string reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Simple(s) => Some(s),
            Reply::Bulk(Some(s)) => Some(s),
            _ => None,
        }
    }
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Decode one reply from the front of `buf`.
///
/// `Ok(None)` means more bytes are needed.
pub fn parse_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, String> {
    parse_at(buf, 0)
}

fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(Reply, usize)>, String> {
    let Some((line, next)) = read_line(buf, pos)? else {
        return Ok(None);
    };
    let kind = line.as_bytes()[0];
    let body = line
        .get(1..)
        .ok_or_else(|| "reply type marker is not ASCII".to_string())?;

    match kind {
        b'+' => Ok(Some((Reply::Simple(body.to_string()), next))),
        b'-' => Ok(Some((Reply::Error(body.to_string()), next))),
        b':' => {
            let n = body
                .parse::<i64>()
                .map_err(|_| format!("invalid integer '{}'", body))?;
            Ok(Some((Reply::Integer(n), next)))
        }
        b'$' => {
            let len = parse_len(body)?;
            let Some(len) = len else {
                return Ok(Some((Reply::Bulk(None), next)));
            };
            let end = next.saturating_add(len);
            if buf.len() < end.saturating_add(2) {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err("bulk string not terminated by CRLF".to_string());
            }
            let text = String::from_utf8_lossy(&buf[next..end]).into_owned();
            Ok(Some((Reply::Bulk(Some(text)), end + 2)))
        }
        b'*' => {
            let len = parse_len(body)?;
            let Some(len) = len else {
                return Ok(Some((Reply::Array(None), next)));
            };
            let mut items = Vec::with_capacity(len.min(64));
            let mut cursor = next;
            for _ in 0..len {
                match parse_at(buf, cursor)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), cursor)))
        }
        other => Err(format!("unexpected reply type '{}'", other as char)),
    }
}

/// Length prefix; `-1` is the null marker.
fn parse_len(body: &str) -> Result<Option<usize>, String> {
    let n = body
        .parse::<i64>()
        .map_err(|_| format!("invalid length '{}'", body))?;
    match n {
        -1 => Ok(None),
        n if n < 0 => Err(format!("invalid length '{}'", body)),
        n => Ok(Some(n as usize)),
    }
}

fn read_line(buf: &[u8], pos: usize) -> Result<Option<(&str, usize)>, String> {
    let Some(rest) = buf.get(pos..) else {
        return Ok(None);
    };
    let Some(cr) = rest.windows(2).position(|w| w == b"\r\n") else {
        return Ok(None);
    };
    if cr == 0 {
        return Err("empty reply line".to_string());
    }
    let line = std::str::from_utf8(&rest[..cr]).map_err(|_| "reply line is not UTF-8".to_string())?;
    Ok(Some((line, pos + cr + 2)))
}

/// Connect, send one command and read one reply.
pub async fn command(addr: &str, args: &[&str], config: &ClientConfig) -> io::Result<Reply> {
    let mut stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"));
        }
    };
    stream.set_nodelay(true)?;

    match timeout(config.command_timeout, exchange(&mut stream, args)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "command timeout")),
    }
}

async fn exchange(stream: &mut TcpStream, args: &[&str]) -> io::Result<Reply> {
    stream.write_all(&encode_command(args)).await?;

    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before a full reply",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        match parse_reply(&buf) {
            Ok(Some((reply, _))) => return Ok(reply),
            Ok(None) if buf.len() > MAX_REPLY_SIZE => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "reply too large"));
            }
            Ok(None) => continue,
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command(&["PING"]), b"*1\r\n$4\r\nPING\r\n".to_vec());
        assert_eq!(
            encode_command(&["CLUSTER", "INFO"]),
            b"*2\r\n$7\r\nCLUSTER\r\n$4\r\nINFO\r\n".to_vec()
        );
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(
            parse_reply(b"+PONG\r\n").unwrap(),
            Some((Reply::Simple("PONG".to_string()), 7))
        );
        assert_eq!(
            parse_reply(b"-ERR unknown\r\n").unwrap().unwrap().0,
            Reply::Error("ERR unknown".to_string())
        );
        assert_eq!(parse_reply(b":42\r\n").unwrap().unwrap().0, Reply::Integer(42));
        assert_eq!(parse_reply(b"$-1\r\n").unwrap().unwrap().0, Reply::Bulk(None));
        assert_eq!(parse_reply(b"*-1\r\n").unwrap().unwrap().0, Reply::Array(None));
    }

    #[test]
    fn test_parse_master_address_reply() {
        let raw = b"*2\r\n$8\r\n10.0.0.5\r\n$4\r\n6379\r\n";
        let (reply, used) = parse_reply(raw).unwrap().unwrap();
        assert_eq!(used, raw.len());
        assert_eq!(
            reply,
            Reply::Array(Some(vec![
                Reply::Bulk(Some("10.0.0.5".to_string())),
                Reply::Bulk(Some("6379".to_string())),
            ]))
        );
    }

    #[test]
    fn test_parse_incomplete_and_invalid() {
        assert_eq!(parse_reply(b"").unwrap(), None);
        assert_eq!(parse_reply(b"$10\r\nabc").unwrap(), None);
        assert_eq!(parse_reply(b"*2\r\n$1\r\na\r\n").unwrap(), None);
        assert!(parse_reply(b"?what\r\n").is_err());
        assert!(parse_reply(b"$3\r\nabcde\r\n").is_err());
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*1\r\n$4\r\nPING\r\n");
            // Split the reply to exercise partial reads.
            socket.write_all(b"+PO").await.unwrap();
            socket.flush().await.unwrap();
            socket.write_all(b"NG\r\n").await.unwrap();
        });

        let reply = command(&addr.to_string(), &["PING"], &ClientConfig::default())
            .await
            .unwrap();
        assert_eq!(reply.as_text(), Some("PONG"));
    }

    #[tokio::test]
    async fn test_command_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = command(&addr.to_string(), &["PING"], &ClientConfig::default()).await;
        assert!(result.is_err());
    }
}
