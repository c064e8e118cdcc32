//! 📄 Line Source: bytes in, lines out, blank lines politely ignored.
//!
//! Wraps any `Read` (a file, stdin, a `&[u8]` in a test), optionally through a gzip
//! decoder, and hands out one raw line at a time. Lines can be as long as memory allows:
//! we grow the buffer, we never truncate. A broken gzip stream surfaces as an
//! `io::Error`, which the caller treats as fatal.

use std::io::{self, BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;
use memchr::memchr;

/// 📦 One input line, without its terminator, plus its 1-based position in the stream.
///
/// The position counts every physical line, blank ones included, so error messages
/// point at the line a human would find with `sed -n Np`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub number: u64,
    pub bytes: Vec<u8>,
}

/// 🚰 A lazy, finite, non-restartable sequence of [`RawLine`]s.
pub struct LineSource {
    reader: Box<dyn BufRead + Send>,
    line_number: u64,
    bytes_read: u64,
    done: bool,
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("line_number", &self.line_number)
            .field("bytes_read", &self.bytes_read)
            .field("done", &self.done)
            .finish()
    }
}

// ⚠️ 1MB read buffer. NDJSON documents can be chunky.
const READ_BUFFER_BYTES: usize = 1024 * 1024;

impl LineSource {
    /// 🏗️ Wrap a reader. `gzipped` inserts a multi-member gzip decoder in front.
    pub fn new<R: Read + Send + 'static>(reader: R, gzipped: bool) -> Self {
        let reader: Box<dyn BufRead + Send> = if gzipped {
            Box::new(BufReader::with_capacity(
                READ_BUFFER_BYTES,
                MultiGzDecoder::new(reader),
            ))
        } else {
            Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, reader))
        };
        Self {
            reader,
            line_number: 0,
            bytes_read: 0,
            done: false,
        }
    }

    /// 📏 Decompressed bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// 📄 Next non-blank line, `Ok(None)` at end of stream.
    pub fn next_line(&mut self) -> io::Result<Option<RawLine>> {
        while !self.done {
            let mut line = Vec::new();
            let terminated = self.read_physical_line(&mut line)?;
            if !terminated && line.is_empty() {
                self.done = true;
                break;
            }
            self.line_number += 1;

            // 🧹 strip \n and the \r that Windows sneaks in before it
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(RawLine {
                number: self.line_number,
                bytes: line,
            }));
        }
        Ok(None)
    }

    /// 🔍 Read up to and including the next `\n`, dropping the `\n`.
    /// Returns whether a terminator was found.
    fn read_physical_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Ok(false);
            }
            match memchr(b'\n', available) {
                Some(pos) => {
                    reserve_line(line, pos, self.line_number + 1)?;
                    line.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    self.bytes_read += (pos + 1) as u64;
                    return Ok(true);
                }
                None => {
                    let len = available.len();
                    reserve_line(line, len, self.line_number + 1)?;
                    line.extend_from_slice(available);
                    self.reader.consume(len);
                    self.bytes_read += len as u64;
                }
            }
        }
    }
}

/// 🐘 Grow the line buffer by `extra` bytes, or say which line did not fit.
fn reserve_line(line: &mut Vec<u8>, extra: usize, number: u64) -> io::Result<()> {
    line.try_reserve(extra).map_err(|err| {
        io::Error::new(
            io::ErrorKind::OutOfMemory,
            format!("line {number} too large to buffer: {err}"),
        )
    })
}

impl Iterator for LineSource {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    fn collect(source: LineSource) -> Vec<(u64, String)> {
        source
            .map(|line| {
                let line = line.expect("💀 line should read");
                (line.number, String::from_utf8(line.bytes).expect("utf8"))
            })
            .collect()
    }

    #[test]
    fn the_one_where_blank_lines_are_skipped_but_still_counted() {
        let input = b"{\"a\":1}\n\n   \n{\"a\":2}\r\n{\"a\":3}".to_vec();
        let lines = collect(LineSource::new(std::io::Cursor::new(input), false));
        assert_eq!(
            lines,
            vec![
                (1, "{\"a\":1}".to_string()),
                (4, "{\"a\":2}".to_string()),
                (5, "{\"a\":3}".to_string()),
            ]
        );
    }

    #[test]
    fn the_one_where_a_giant_line_arrives_in_one_piece() {
        // 🐘 3MB line, bigger than the read buffer. No truncation allowed.
        let giant = format!("{{\"blob\":\"{}\"}}", "x".repeat(3 * 1024 * 1024));
        let input = format!("{giant}\n{{\"small\":true}}\n");
        let lines = collect(LineSource::new(std::io::Cursor::new(input.into_bytes()), false));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].1.len(), giant.len());
        assert_eq!(lines[1].1, "{\"small\":true}");
    }

    #[test]
    fn the_one_where_gzip_is_unzipped_on_the_fly() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(b"{\"z\":1}\n{\"z\":2}\n")
            .expect("💀 gzip write");
        let compressed = encoder.finish().expect("💀 gzip finish");

        let lines = collect(LineSource::new(std::io::Cursor::new(compressed), true));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], (2, "{\"z\":2}".to_string()));
    }

    #[test]
    fn the_one_where_garbage_gzip_is_an_io_error_not_a_shrug() {
        let mut source = LineSource::new(std::io::Cursor::new(b"definitely not gzip".to_vec()), true);
        assert!(source.next_line().is_err());
    }

    #[test]
    fn the_one_where_an_empty_stream_is_just_empty() {
        let mut source = LineSource::new(std::io::empty(), false);
        assert!(source.next_line().expect("💀 empty read").is_none());
        assert!(source.next_line().expect("💀 still empty").is_none());
    }

    #[test]
    fn the_one_where_a_line_that_cannot_fit_is_an_io_error_with_its_number() {
        let mut line = b"{\"head\":".to_vec();
        let err = reserve_line(&mut line, usize::MAX, 42)
            .expect_err("💀 usize::MAX more bytes should not fit");
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
        assert!(err.to_string().contains("line 42"));
        assert_eq!(line, b"{\"head\":");
    }

    #[test]
    fn the_one_where_the_tail_of_a_split_line_is_kept_whole() {
        // ✂️ a tiny buffer forces the terminating chunk through the newline branch
        let input = b"{\"abcdefgh\":1}\n{\"b\":2}\n".to_vec();
        let source = LineSource {
            reader: Box::new(io::BufReader::with_capacity(4, io::Cursor::new(input))),
            ..LineSource::new(io::Cursor::new(Vec::new()), false)
        };
        let lines = collect(source);
        assert_eq!(
            lines,
            vec![(1, "{\"abcdefgh\":1}".to_string()), (2, "{\"b\":2}".to_string())]
        );
    }
}
