#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::fmt;
use std::io;
use std::str::FromStr;

#[derive(Debug)]
pub enum ScpiError {
    Io(io::Error),
    /// The instrument answered, but not with something we could parse.
    Parse {
        command: String,
        response: String,
    },
    /// Malformed IEEE-488.2 definite-length block.
    Block(String),
    /// Error reported by the instrument or its driver library.
    Device(String),
}

pub type ScpiResult<T> = Result<T, ScpiError>;

impl fmt::Display for ScpiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScpiError::Io(e) => write!(f, "instrument I/O error: {e}"),
            ScpiError::Parse { command, response } => {
                write!(f, "could not parse response {response:?} to {command:?}")
            }
            ScpiError::Block(msg) => write!(f, "bad binary block: {msg}"),
            ScpiError::Device(msg) => write!(f, "instrument error: {msg}"),
        }
    }
}

impl std::error::Error for ScpiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScpiError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ScpiError {
    fn from(err: io::Error) -> Self {
        ScpiError::Io(err)
    }
}

/// Blocking, line-oriented link to one instrument. Commands are sent without terminator; the
/// transport appends whatever the bus needs.
pub trait Transport {
    /// # Errors
    /// Any failure of the underlying link.
    fn write(&mut self, cmd: &str) -> ScpiResult<()>;

    /// Read one response line, terminator stripped.
    /// # Errors
    /// Any failure of the underlying link.
    fn read_line(&mut self) -> ScpiResult<String>;

    /// Read one binary response (e.g. an IEEE-488.2 block) as it came off the bus.
    /// # Errors
    /// Any failure of the underlying link.
    fn read_raw(&mut self) -> ScpiResult<Vec<u8>>;

    /// # Errors
    /// Any failure of the underlying link.
    fn query(&mut self, cmd: &str) -> ScpiResult<String> {
        self.write(cmd)?;
        self.read_line()
    }
}

/// Query and parse a single value, e.g. `query_parse::<f64, _>(scope, ":WAV:XINC?")`.
/// # Errors
/// Link failures, or `ScpiError::Parse` if the trimmed response does not parse as `T`.
pub fn query_parse<T: FromStr, X: Transport + ?Sized>(inst: &mut X, cmd: &str) -> ScpiResult<T> {
    let resp = inst.query(cmd)?;
    resp.trim().parse::<T>().map_err(|_| ScpiError::Parse {
        command: cmd.to_owned(),
        response: resp,
    })
}

/// Payload of a definite-length block `#<n><len: n digits><data>`. Anything after the payload
/// (usually the line terminator) is ignored.
/// # Errors
/// `ScpiError::Block` if the header is malformed or the payload is truncated.
pub fn parse_block(raw: &[u8]) -> ScpiResult<&[u8]> {
    let (n_digits, rest) = match raw {
        [b'#', n, rest @ ..] if n.is_ascii_digit() && *n != b'0' => ((n - b'0') as usize, rest),
        [b'#', b'0', ..] => return Err(ScpiError::Block("indefinite-length block".into())),
        _ => return Err(ScpiError::Block("missing '#' header".into())),
    };
    let len_digits = rest
        .get(..n_digits)
        .ok_or_else(|| ScpiError::Block("truncated length field".into()))?;
    let len: usize = std::str::from_utf8(len_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ScpiError::Block(format!("bad length field {len_digits:?}")))?;
    rest.get(n_digits..n_digits + len).ok_or_else(|| {
        ScpiError::Block(format!(
            "expected {len} bytes, got {}",
            rest.len().saturating_sub(n_digits)
        ))
    })
}

/// Build a definite-length block around `payload`, terminated with a newline.
#[must_use]
pub fn make_block(payload: &[u8]) -> Vec<u8> {
    let len = payload.len().to_string();
    let mut out = Vec::with_capacity(payload.len() + len.len() + 3);
    out.push(b'#');
    out.extend_from_slice(len.len().to_string().as_bytes());
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(payload);
    out.push(b'\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_with_rigol_header() {
        let raw = b"#9000000004\x01\x02\x03\xff\n";
        assert_eq!(parse_block(raw).unwrap(), &[1, 2, 3, 255]);
    }

    #[test]
    fn block_round_trip_short_header() {
        let payload: Vec<u8> = (0..=200).collect();
        let raw = make_block(&payload);
        assert_eq!(&raw[..5], b"#3201");
        assert_eq!(parse_block(&raw).unwrap(), payload.as_slice());
    }

    #[test]
    fn block_errors() {
        assert!(matches!(parse_block(b"9000000004"), Err(ScpiError::Block(_))));
        assert!(matches!(parse_block(b"#0abc"), Err(ScpiError::Block(_))));
        assert!(matches!(parse_block(b"#2"), Err(ScpiError::Block(_))));
        assert!(matches!(parse_block(b"#2x1abc"), Err(ScpiError::Block(_))));
        assert!(matches!(parse_block(b"#210abc"), Err(ScpiError::Block(_))));
    }
}
