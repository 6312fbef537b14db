use bytes::Bytes;
use model::{core::utils::encode_copy_line, records::row::Row};

/// Default size of one CopyData frame handed to the driver.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;

/// Encodes rows into COPY text-format chunks of roughly `chunk_bytes`.
pub struct PgCopyEncoder {
    chunk_bytes: usize,
    buf: String,
    rows: usize,
}

impl PgCopyEncoder {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(1),
            buf: String::with_capacity(chunk_bytes),
            rows: 0,
        }
    }

    /// Appends a row; returns a full chunk once the buffer crosses the limit.
    pub fn push_row(&mut self, row: &Row) -> Option<Bytes> {
        encode_copy_line(row.cells.iter().map(|c| c.as_deref()), &mut self.buf);
        self.rows += 1;
        if self.buf.len() >= self.chunk_bytes {
            Some(self.take())
        } else {
            None
        }
    }

    /// Flushes whatever is left.
    pub fn finish(mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    pub fn rows_encoded(&self) -> usize {
        self.rows
    }

    fn take(&mut self) -> Bytes {
        Bytes::from(std::mem::replace(
            &mut self.buf,
            String::with_capacity(self.chunk_bytes),
        ))
    }
}

impl Default for PgCopyEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[Option<&str>]) -> Row {
        Row::new(values.iter().map(|v| v.map(str::to_string)).collect())
    }

    #[test]
    fn small_batches_flush_on_finish() {
        let mut encoder = PgCopyEncoder::default();
        assert!(encoder.push_row(&row(&[Some("1"), Some("a")])).is_none());
        assert!(encoder.push_row(&row(&[Some("2"), None])).is_none());
        assert_eq!(encoder.rows_encoded(), 2);

        let chunk = encoder.finish().expect("pending data");
        assert_eq!(&chunk[..], b"1\ta\n2\t\\N\n");
    }

    #[test]
    fn chunks_are_emitted_on_whole_rows() {
        let mut encoder = PgCopyEncoder::new(8);
        let first = encoder.push_row(&row(&[Some("12345"), Some("678")]));
        assert_eq!(first.as_deref(), Some(&b"12345\t678\n"[..]));

        assert!(encoder.push_row(&row(&[Some("x")])).is_none());
        assert_eq!(encoder.finish().as_deref(), Some(&b"x\n"[..]));
    }

    #[test]
    fn empty_encoder_has_nothing_to_flush() {
        assert!(PgCopyEncoder::default().finish().is_none());
    }
}
