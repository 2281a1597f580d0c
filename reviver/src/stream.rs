// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Stream helpers for the image and archive codecs. Both formats align their
//! sections relative to the start of the stream, so the codecs only ever need
//! to know how far they are. They never seek.

use std::io::{self, Read, Write};

use ring::digest::{Context, Digest};

/// Number of fill bytes between `offset` and the next multiple of `alignment`.
pub fn padding_len(offset: u64, alignment: u64) -> u64 {
    match offset % alignment {
        0 => 0,
        r => alignment - r,
    }
}

/// Reader or writer that counts the bytes passing through it.
pub struct Tracked<S> {
    inner: S,
    offset: u64,
}

impl<S> Tracked<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, offset: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Tracked<R> {
    /// Read exactly `size` bytes.
    pub fn read_vec(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Skip the fill up to the next multiple of `alignment`.
    pub fn skip_padding(&mut self, alignment: u64) -> io::Result<()> {
        let size = padding_len(self.offset, alignment);
        let skipped = io::copy(&mut Read::take(&mut *self, size), &mut io::sink())?;

        if skipped != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Padding ends after {skipped} of {size} bytes"),
            ));
        }

        Ok(())
    }
}

impl<W: Write> Tracked<W> {
    pub fn write_zeros(&mut self, size: u64) -> io::Result<()> {
        io::copy(&mut io::repeat(0).take(size), self)?;
        Ok(())
    }

    /// Zero fill up to the next multiple of `alignment`.
    pub fn write_padding(&mut self, alignment: u64) -> io::Result<()> {
        self.write_zeros(padding_len(self.offset, alignment))
    }
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl<W: Write> Write for Tracked<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer that only feeds a digest, for checksumming with [`io::copy`].
pub struct DigestSink(Context);

impl DigestSink {
    pub fn new(context: Context) -> Self {
        Self(context)
    }

    pub fn finish(self) -> Digest {
        self.0.finish()
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Write};

    use assert_matches::assert_matches;
    use ring::digest::{Context, SHA256};

    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(padding_len(0, 2048), 0);
        assert_eq!(padding_len(1, 2048), 2047);
        assert_eq!(padding_len(2048, 2048), 0);
        assert_eq!(padding_len(1660, 2048), 388);
    }

    #[test]
    fn skip_cpio_name_padding() {
        // Magic and a 3 byte name, padded to 4.
        let mut reader = Tracked::new(Cursor::new(b"070701ab\0\0\0\0xy"));

        assert_eq!(reader.read_vec(9).unwrap(), b"070701ab\0");
        reader.skip_padding(4).unwrap();
        assert_eq!(reader.offset(), 12);
        assert_eq!(reader.read_vec(2).unwrap(), b"xy");
    }

    #[test]
    fn truncated_padding() {
        let mut reader = Tracked::new(Cursor::new(b"abc"));
        reader.read_vec(1).unwrap();

        assert_matches!(
            reader.skip_padding(2048),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn page_fill() {
        let mut writer = Tracked::new(vec![]);

        writer.write_all(b"kernel").unwrap();
        writer.write_padding(16).unwrap();
        assert_eq!(writer.offset(), 16);
        writer.write_padding(16).unwrap();

        assert_eq!(writer.inner, b"kernel\0\0\0\0\0\0\0\0\0\0");
    }

    #[test]
    fn digest_sink() {
        let mut sink = DigestSink::new(Context::new(&SHA256));
        io::copy(&mut Cursor::new(b"foobar"), &mut sink).unwrap();

        assert_eq!(
            hex::encode(sink.finish()),
            "c3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2",
        );
    }
}
