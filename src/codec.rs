//! Memcache text protocol framing and codec utilities.
//!
//! Requests are encoded straight into [`Bytes`]. Responses are decoded
//! incrementally by [`TokenReader`], which accepts data in arbitrarily
//! sized pieces as it arrives from the socket.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CacheError, Result};
use crate::types::{StoreVerb, Value};

/// Maximum length of a response header line, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 2048;

/// Largest data block accepted in a `VALUE` response.
pub const MAX_VALUE_LENGTH: usize = 1 << 30;

const CRLF: &[u8] = b"\r\n";

/// A decoded unit of the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseToken {
    /// One value of a retrieval response.
    Value(Value),
    /// End of a retrieval response.
    End,
    /// The storage command succeeded.
    Stored,
    /// The storage command's condition was not met.
    NotStored,
    /// The server did not recognise the command.
    Error(String),
    /// The request was malformed.
    ClientError(String),
    /// The server failed to execute the command.
    ServerError(String),
}

impl ResponseToken {
    /// Describe an error token, or `None` for anything else.
    pub fn error_description(&self) -> Option<String> {
        match self {
            Self::Error(msg) if msg.is_empty() => Some("ERROR".to_string()),
            Self::Error(msg) => Some(format!("ERROR {msg}")),
            Self::ClientError(msg) => Some(format!("CLIENT_ERROR {msg}")),
            Self::ServerError(msg) => Some(format!("SERVER_ERROR {msg}")),
            _ => None,
        }
    }
}

/// Encode a retrieval command for one or more keys.
pub fn encode_get<S: AsRef<str>>(keys: &[S]) -> Bytes {
    let len = 3 + keys.iter().map(|k| k.as_ref().len() + 1).sum::<usize>() + CRLF.len();
    let mut buf = BytesMut::with_capacity(len);
    buf.put_slice(b"get");
    for key in keys {
        buf.put_u8(b' ');
        buf.put_slice(key.as_ref().as_bytes());
    }
    buf.put_slice(CRLF);
    buf.freeze()
}

/// Encode a storage command followed by its data block.
pub fn encode_store(verb: StoreVerb, key: &str, flags: u32, expiry: u32, data: &[u8]) -> Bytes {
    let header = format!("{} {} {} {} {}\r\n", verb.as_str(), key, flags, expiry, data.len());
    let mut buf = BytesMut::with_capacity(header.len() + data.len() + CRLF.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(data);
    buf.put_slice(CRLF);
    buf.freeze()
}

/// A buffered decoder for memcache responses.
///
/// This handles partial reads and accumulates data until a complete
/// token is available.
#[derive(Debug)]
pub struct TokenReader {
    buffer: Vec<u8>,
    position: usize,
}

impl TokenReader {
    /// Create a new token reader.
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    /// Create a new token reader with a specific buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    /// Add data to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete token from the buffer.
    ///
    /// Returns `Some(token)` if a complete token is available,
    /// `None` if more data is needed.
    pub fn try_next(&mut self) -> Result<Option<ResponseToken>> {
        let available = &self.buffer[self.position..];

        let Some(line_end) = find_crlf(available) else {
            if available.len() > MAX_LINE_LENGTH {
                return Err(CacheError::protocol(format!(
                    "response line exceeds {MAX_LINE_LENGTH} bytes"
                )));
            }
            return Ok(None);
        };

        let line = std::str::from_utf8(&available[..line_end])
            .map_err(|_| CacheError::protocol("response line is not valid UTF-8"))?;
        let mut consumed = line_end + CRLF.len();

        let token = if let Some(rest) = line.strip_prefix("VALUE ") {
            let (key, flags, len) = parse_value_header(rest)?;
            if len > MAX_VALUE_LENGTH {
                return Err(CacheError::protocol(format!(
                    "data block for {key} exceeds {MAX_VALUE_LENGTH} bytes"
                )));
            }
            let data_end = consumed + len;
            let block_end = data_end + CRLF.len();
            if available.len() < block_end {
                return Ok(None);
            }
            if &available[data_end..block_end] != CRLF {
                return Err(CacheError::protocol(format!(
                    "data block for {key} is not terminated by CRLF"
                )));
            }
            let data = Bytes::copy_from_slice(&available[consumed..data_end]);
            consumed = block_end;
            ResponseToken::Value(Value { key, flags, data })
        } else {
            parse_status_line(line)?
        };

        self.position += consumed;

        // Compact buffer if needed
        if self.position > self.buffer.len() / 2 {
            self.compact();
        }

        Ok(Some(token))
    }

    /// Decode all complete tokens from the buffer.
    pub fn parse_all(&mut self) -> Result<Vec<ResponseToken>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.try_next()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn compact(&mut self) {
        if self.position > 0 {
            self.buffer.drain(..self.position);
            self.position = 0;
        }
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }

    /// Get the number of undecoded bytes in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TokenReader {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(CRLF.len()).position(|w| w == CRLF)
}

/// Parse `<key> <flags> <bytes> [<cas unique>]`.
fn parse_value_header(rest: &str) -> Result<(String, u32, usize)> {
    let mut parts = rest.split(' ');
    let key = parts.next().filter(|k| !k.is_empty());
    let flags = parts.next().and_then(|f| f.parse::<u32>().ok());
    let len = parts.next().and_then(|n| n.parse::<usize>().ok());
    match (key, flags, len) {
        (Some(key), Some(flags), Some(len)) => Ok((key.to_string(), flags, len)),
        _ => Err(CacheError::protocol(format!("malformed VALUE line: {rest}"))),
    }
}

fn parse_status_line(line: &str) -> Result<ResponseToken> {
    let (word, rest) = match line.split_once(' ') {
        Some((word, rest)) => (word, rest),
        None => (line, ""),
    };
    match word {
        "END" => Ok(ResponseToken::End),
        "STORED" => Ok(ResponseToken::Stored),
        "NOT_STORED" => Ok(ResponseToken::NotStored),
        "ERROR" => Ok(ResponseToken::Error(rest.to_string())),
        "CLIENT_ERROR" => Ok(ResponseToken::ClientError(rest.to_string())),
        "SERVER_ERROR" => Ok(ResponseToken::ServerError(rest.to_string())),
        _ => Err(CacheError::protocol(format!("unexpected response line: {line}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_get() {
        assert_eq!(encode_get(&["a"]).as_ref(), b"get a\r\n");
        assert_eq!(encode_get(&["a", "bb", "ccc"]).as_ref(), b"get a bb ccc\r\n");
    }

    #[test]
    fn test_encode_store() {
        let frame = encode_store(StoreVerb::Add, "k", 7, 300, b"hello");
        assert_eq!(frame.as_ref(), b"add k 7 300 5\r\nhello\r\n");

        let frame = encode_store(StoreVerb::Set, "empty", 0, 0, b"");
        assert_eq!(frame.as_ref(), b"set empty 0 0 0\r\n\r\n");
    }

    #[test]
    fn test_token_reader_complete() {
        let mut reader = TokenReader::new();
        reader.feed(b"VALUE k 3 5\r\nhello\r\nEND\r\n");

        let tokens = reader.parse_all().unwrap();
        assert_eq!(
            tokens,
            vec![
                ResponseToken::Value(Value::new("k", 3, b"hello".as_slice())),
                ResponseToken::End,
            ]
        );
        assert!(reader.is_empty());
    }

    #[test]
    fn test_token_reader_partial() {
        let data = b"VALUE key 0 10\r\n0123456789\r\nSTORED\r\n";

        let mut reader = TokenReader::new();
        for chunk in data.chunks(3) {
            reader.feed(chunk);
            if reader.len() < 28 {
                assert!(reader.try_next().unwrap().is_none());
            }
        }

        let tokens = reader.parse_all().unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens[0],
            ResponseToken::Value(Value::new("key", 0, b"0123456789".as_slice()))
        );
        assert_eq!(tokens[1], ResponseToken::Stored);
    }

    #[test]
    fn test_token_reader_binary_payload() {
        // Payload containing CRLF must be taken by length, not by line.
        let mut reader = TokenReader::new();
        reader.feed(b"VALUE bin 1 4 99\r\na\r\nb\r\nEND\r\n");

        let tokens = reader.parse_all().unwrap();
        assert_eq!(
            tokens[0],
            ResponseToken::Value(Value::new("bin", 1, b"a\r\nb".as_slice()))
        );
        assert_eq!(tokens[1], ResponseToken::End);
    }

    #[test]
    fn test_token_reader_status_lines() {
        let mut reader = TokenReader::new();
        reader.feed(b"NOT_STORED\r\nERROR\r\nCLIENT_ERROR bad data chunk\r\nSERVER_ERROR out of memory\r\n");

        let tokens = reader.parse_all().unwrap();
        assert_eq!(tokens[0], ResponseToken::NotStored);
        assert_eq!(tokens[1].error_description().unwrap(), "ERROR");
        assert_eq!(
            tokens[2].error_description().unwrap(),
            "CLIENT_ERROR bad data chunk"
        );
        assert_eq!(
            tokens[3],
            ResponseToken::ServerError("out of memory".to_string())
        );
        assert!(ResponseToken::End.error_description().is_none());
    }

    #[test]
    fn test_token_reader_malformed() {
        let mut reader = TokenReader::new();
        reader.feed(b"VALUE k notanumber 5\r\n");
        assert!(matches!(reader.try_next(), Err(CacheError::Protocol(_))));

        let mut reader = TokenReader::new();
        reader.feed(b"HELLO\r\n");
        assert!(matches!(reader.try_next(), Err(CacheError::Protocol(_))));

        let mut reader = TokenReader::new();
        reader.feed(b"VALUE k 0 2\r\nabcd\r\n");
        assert!(matches!(reader.try_next(), Err(CacheError::Protocol(_))));
    }

    #[test]
    fn test_token_reader_line_too_long() {
        let mut reader = TokenReader::new();
        reader.feed(&vec![b'x'; MAX_LINE_LENGTH + 1]);
        assert!(reader.try_next().is_err());
    }

    #[test]
    fn test_token_reader_oversized_value() {
        let mut reader = TokenReader::new();
        reader.feed(b"VALUE k 0 18446744073709551615\r\nab\r\n");
        assert!(matches!(reader.try_next(), Err(CacheError::Protocol(_))));

        let mut reader = TokenReader::new();
        reader.feed(format!("VALUE k 0 {}\r\n", MAX_VALUE_LENGTH + 1).as_bytes());
        assert!(matches!(reader.try_next(), Err(CacheError::Protocol(_))));

        // At the limit the reader just waits for the data block.
        let mut reader = TokenReader::new();
        reader.feed(format!("VALUE k 0 {MAX_VALUE_LENGTH}\r\n").as_bytes());
        assert!(reader.try_next().unwrap().is_none());
    }
}
