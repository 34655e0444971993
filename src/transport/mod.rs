//! Links to the real instruments. Each is behind a cargo feature so the default build needs
//! neither a VISA installation nor serial-port support.

use std::io::{self, Read};

#[cfg(feature = "serial")]
pub mod serial;
#[cfg(feature = "visa")]
pub mod visa;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
#[cfg(feature = "visa")]
pub use visa::VisaTransport;

/// Read single bytes up to and including `\n`; returns the line without its terminator.
/// Byte-at-a-time so nothing after the newline is swallowed by a buffer.
pub(crate) fn read_line_from<R: Read>(mut reader: R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Read one IEEE-488.2 definite-length block plus its trailing terminator, header included.
pub(crate) fn read_block_from<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head)?;
    if head[0] != b'#' || !head[1].is_ascii_digit() || head[1] == b'0' {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected definite-length block, got {head:?}"),
        ));
    }
    let mut len_digits = vec![0u8; usize::from(head[1] - b'0')];
    reader.read_exact(&mut len_digits)?;
    let len: usize = std::str::from_utf8(&len_digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad block length"))?;

    let mut out = Vec::with_capacity(2 + len_digits.len() + len + 1);
    out.extend_from_slice(&head);
    out.extend_from_slice(&len_digits);
    let start = out.len();
    out.resize(start + len + 1, 0);
    // payload and the terminating newline
    reader.read_exact(&mut out[start..])?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scpi::parse_block;

    #[test]
    fn line_reader_stops_at_newline() {
        let mut src: &[u8] = b"SynthHD\r\n1234\n";
        assert_eq!(read_line_from(&mut src).unwrap(), "SynthHD");
        assert_eq!(read_line_from(&mut src).unwrap(), "1234");
        assert!(read_line_from(&mut src).is_err());
    }

    #[test]
    fn block_reader_keeps_embedded_newlines() {
        let mut src: &[u8] = b"#14\n\x01\n\x02\n*IDN?";
        let block = read_block_from(&mut src).unwrap();
        assert_eq!(parse_block(&block).unwrap(), b"\n\x01\n\x02");
        assert_eq!(src, b"*IDN?");
    }
}
