// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Seek, Write},
};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

static GZIP_MAGIC: &[u8; 2] = b"\x1f\x8b";
static LZ4_LEGACY_MAGIC: &[u8; 4] = b"\x02\x21\x4c\x18";

/// Every legacy LZ4 block decompresses to at most this many bytes.
const LZ4_LEGACY_BLOCK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown compression format")]
    UnknownFormat,
    #[error("I/O error when autodetecting compression format")]
    AutoDetect(#[source] io::Error),
    #[error("Failed to initialize legacy LZ4 encoder")]
    Lz4Init(#[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Decoder for the legacy LZ4 framing used by Linux initramfs images: a magic
/// value followed by blocks, each prefixed with its compressed size.
pub struct Lz4LegacyDecoder<R: Read> {
    reader: R,
    block: Vec<u8>,
    consumed: usize,
    header_read: bool,
    eof: bool,
}

impl<R: Read> Lz4LegacyDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            block: vec![],
            consumed: 0,
            header_read: false,
            eof: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next block size. Returns [`None`] at a clean EOF.
    fn read_size(&mut self) -> io::Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;

        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(buf))),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Truncated LZ4 block size",
            )),
        }
    }

    fn next_block(&mut self) -> io::Result<()> {
        if !self.header_read {
            let mut magic = [0u8; 4];
            self.reader.read_exact(&mut magic)?;
            if &magic != LZ4_LEGACY_MAGIC {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Missing legacy LZ4 magic",
                ));
            }
            self.header_read = true;
        }

        loop {
            let Some(size) = self.read_size()? else {
                self.eof = true;
                return Ok(());
            };

            // Concatenated streams repeat the magic.
            if size.to_le_bytes() == *LZ4_LEGACY_MAGIC {
                continue;
            }

            if size as usize > lz4_flex::block::get_maximum_output_size(LZ4_LEGACY_BLOCK_SIZE) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("LZ4 block size too large: {size}"),
                ));
            }

            let mut compressed = vec![0u8; size as usize];
            self.reader.read_exact(&mut compressed)?;

            self.block = lz4_flex::block::decompress(&compressed, LZ4_LEGACY_BLOCK_SIZE)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            self.consumed = 0;

            return Ok(());
        }
    }
}

impl<R: Read> Read for Lz4LegacyDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.consumed == self.block.len() {
            if self.eof {
                return Ok(0);
            }
            self.next_block()?;
        }

        let n = buf.len().min(self.block.len() - self.consumed);
        buf[..n].copy_from_slice(&self.block[self.consumed..self.consumed + n]);
        self.consumed += n;

        Ok(n)
    }
}

pub struct Lz4LegacyEncoder<W: Write> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: Write> Lz4LegacyEncoder<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writer.write_all(LZ4_LEGACY_MAGIC)?;

        Ok(Self {
            writer,
            buf: Vec::with_capacity(LZ4_LEGACY_BLOCK_SIZE),
        })
    }

    fn write_block(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let compressed = lz4_flex::block::compress(&self.buf);

        self.writer
            .write_all(&(compressed.len() as u32).to_le_bytes())?;
        self.writer.write_all(&compressed)?;
        self.buf.clear();

        Ok(())
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.write_block()?;
        Ok(self.writer)
    }
}

impl<W: Write> Write for Lz4LegacyEncoder<W> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let total = buf.len();

        while !buf.is_empty() {
            let to_write = buf.len().min(LZ4_LEGACY_BLOCK_SIZE - self.buf.len());
            self.buf.extend_from_slice(&buf[..to_write]);

            if self.buf.len() == LZ4_LEGACY_BLOCK_SIZE {
                self.write_block()?;
            }

            buf = &buf[to_write..];
        }

        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum CompressedFormat {
    None,
    Gzip,
    Lz4Legacy,
}

pub enum CompressedReader<R: Read> {
    None(R),
    Gzip(GzDecoder<R>),
    Lz4Legacy(Lz4LegacyDecoder<R>),
}

impl<R: Read> CompressedReader<R> {
    pub fn with_format(reader: R, format: CompressedFormat) -> Self {
        match format {
            CompressedFormat::None => Self::None(reader),
            CompressedFormat::Gzip => Self::Gzip(GzDecoder::new(reader)),
            CompressedFormat::Lz4Legacy => Self::Lz4Legacy(Lz4LegacyDecoder::new(reader)),
        }
    }

    pub fn format(&self) -> CompressedFormat {
        match self {
            Self::None(_) => CompressedFormat::None,
            Self::Gzip(_) => CompressedFormat::Gzip,
            Self::Lz4Legacy(_) => CompressedFormat::Lz4Legacy,
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            Self::None(r) => r,
            Self::Gzip(r) => r.into_inner(),
            Self::Lz4Legacy(r) => r.into_inner(),
        }
    }
}

impl<R: Read + Seek> CompressedReader<R> {
    pub fn new(mut reader: R, raw_if_unknown: bool) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(Error::AutoDetect)?;

        reader.rewind().map_err(Error::AutoDetect)?;

        if &magic[0..2] == GZIP_MAGIC {
            Ok(Self::Gzip(GzDecoder::new(reader)))
        } else if &magic == LZ4_LEGACY_MAGIC {
            Ok(Self::Lz4Legacy(Lz4LegacyDecoder::new(reader)))
        } else if raw_if_unknown {
            Ok(Self::None(reader))
        } else {
            Err(Error::UnknownFormat)
        }
    }
}

impl<R: Read> fmt::Debug for CompressedReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompressedReader")
            .field(&self.format())
            .finish()
    }
}

impl<R: Read> Read for CompressedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::None(r) => r.read(buf),
            Self::Gzip(r) => r.read(buf),
            Self::Lz4Legacy(r) => r.read(buf),
        }
    }
}

pub enum CompressedWriter<W: Write> {
    None(W),
    Gzip(GzEncoder<W>),
    Lz4Legacy(Lz4LegacyEncoder<W>),
}

impl<W: Write> CompressedWriter<W> {
    pub fn new(writer: W, format: CompressedFormat) -> Result<Self> {
        match format {
            CompressedFormat::None => Ok(Self::None(writer)),
            CompressedFormat::Gzip => {
                Ok(Self::Gzip(GzEncoder::new(writer, Compression::default())))
            }
            CompressedFormat::Lz4Legacy => {
                let encoder = Lz4LegacyEncoder::new(writer).map_err(Error::Lz4Init)?;
                Ok(Self::Lz4Legacy(encoder))
            }
        }
    }

    pub fn format(&self) -> CompressedFormat {
        match self {
            Self::None(_) => CompressedFormat::None,
            Self::Gzip(_) => CompressedFormat::Gzip,
            Self::Lz4Legacy(_) => CompressedFormat::Lz4Legacy,
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::None(w) => Ok(w),
            Self::Gzip(w) => w.finish(),
            Self::Lz4Legacy(w) => w.finish(),
        }
    }
}

impl<W: Write> fmt::Debug for CompressedWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompressedWriter")
            .field(&self.format())
            .finish()
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::None(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
            Self::Lz4Legacy(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::None(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
            Self::Lz4Legacy(w) => w.flush(),
        }
    }
}
