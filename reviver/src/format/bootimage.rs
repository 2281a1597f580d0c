// SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{Read, Write},
    str::{self, Utf8Error},
};

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;
use zerocopy::{FromBytes, IntoBytes, little_endian};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::{
    stream::Tracked,
    util::{self, NumBytes, OutOfBoundsError},
};

pub const BOOT_MAGIC: [u8; 8] = *b"ANDROID!";
pub const BOOT_NAME_SIZE: usize = 16;
pub const BOOT_ARGS_SIZE: usize = 512;
pub const BOOT_EXTRA_ARGS_SIZE: usize = 1024;

/// Offsets relative to the base address, matching the defaults used by
/// `mkbootimg`. The kernel offset is not stored in the image in any form, so
/// the base address is always derived from it.
pub const KERNEL_OFFSET: u32 = 0x0000_8000;
pub const DEFAULT_BASE: u32 = 0x1000_0000;
pub const DEFAULT_RAMDISK_OFFSET: u32 = 0x0100_0000;
pub const DEFAULT_SECOND_OFFSET: u32 = 0x00f0_0000;
pub const DEFAULT_TAGS_OFFSET: u32 = 0x0000_0100;
pub const DEFAULT_PAGE_SIZE: u32 = 2048;

/// Maximum size of any individual boot image component, like the kernel.
const COMPONENT_MAX_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown magic: {:?}", .0.as_bstr())]
    UnknownMagic([u8; 8]),
    #[error("Unsupported header version: {0}")]
    UnsupportedHeaderVersion(u32),
    #[error("{0:?} field is not UTF-8 encoded: {data:?}", data = .2.as_bstr())]
    StringNotUtf8(&'static str, #[source] Utf8Error, Vec<u8>),
    #[error("{0:?} field is too long (>{1}): {2:?}")]
    StringTooLong(&'static str, usize, String),
    #[error("{0:?} field is out of bounds")]
    IntOutOfBounds(&'static str, #[source] OutOfBoundsError),
    #[error("Page size must not be zero")]
    PageSizeZero,
    #[error("Boot image size ({size}) exceeds partition size ({limit})")]
    ImageTooLarge { size: u64, limit: u64 },
    #[error("Failed to read boot image data: {0}")]
    DataRead(&'static str, #[source] std::io::Error),
    #[error("Failed to write boot image data: {0}")]
    DataWrite(&'static str, #[source] std::io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Raw on-disk layout for the legacy image header.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(packed)]
struct RawHeader {
    /// Magic value. This should be equal to [`BOOT_MAGIC`].
    magic: [u8; 8],
    kernel_size: little_endian::U32,
    kernel_addr: little_endian::U32,
    ramdisk_size: little_endian::U32,
    ramdisk_addr: little_endian::U32,
    second_size: little_endian::U32,
    second_addr: little_endian::U32,
    tags_addr: little_endian::U32,
    page_size: little_endian::U32,
    /// Always zero for images this codec handles. Older bootloaders treat this
    /// field as unused.
    header_version: little_endian::U32,
    os_version: little_endian::U32,
    name: [u8; BOOT_NAME_SIZE],
    cmdline: [u8; BOOT_ARGS_SIZE],
    id: [little_endian::U32; 8],
    extra_cmdline: [u8; BOOT_EXTRA_ARGS_SIZE],
}

/// A composite boot image: kernel, compressed ramdisk, and the header fields
/// needed to rebuild an image the bootloader accepts. The payloads are not
/// serialized so that the header can be stored as TOML next to them.
#[derive(Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BootImage {
    pub base: u32,
    pub ramdisk_offset: u32,
    pub second_offset: u32,
    pub tags_offset: u32,
    pub page_size: u32,
    pub os_version: u32,
    pub name: String,
    pub cmdline: String,
    pub extra_cmdline: String,
    #[serde(skip)]
    pub kernel: Vec<u8>,
    #[serde(skip)]
    pub ramdisk: Vec<u8>,
    #[serde(skip)]
    pub second: Vec<u8>,
}

impl fmt::Debug for BootImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootImage")
            .field("base", &self.base)
            .field("ramdisk_offset", &self.ramdisk_offset)
            .field("second_offset", &self.second_offset)
            .field("tags_offset", &self.tags_offset)
            .field("page_size", &self.page_size)
            .field("os_version", &self.os_version)
            .field("name", &self.name)
            .field("cmdline", &self.cmdline)
            .field("extra_cmdline", &self.extra_cmdline)
            .field("kernel", &NumBytes(self.kernel.len()))
            .field("ramdisk", &NumBytes(self.ramdisk.len()))
            .field("second", &NumBytes(self.second.len()))
            .finish()
    }
}

impl fmt::Display for BootImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Boot image header:")?;
        writeln!(f, "- Kernel size:          {}", self.kernel.len())?;
        writeln!(f, "- Kernel address:       {:#x}", self.kernel_addr())?;
        writeln!(f, "- Ramdisk size:         {}", self.ramdisk.len())?;
        writeln!(f, "- Ramdisk address:      {:#x}", self.ramdisk_addr())?;
        writeln!(f, "- Second stage size:    {}", self.second.len())?;
        writeln!(f, "- Second stage address: {:#x}", self.second_addr())?;
        writeln!(f, "- Kernel tags address:  {:#x}", self.tags_addr())?;
        writeln!(f, "- Base address:         {:#x}", self.base)?;
        writeln!(f, "- Page size:            {}", self.page_size)?;
        writeln!(f, "- OS version:           {:#x}", self.os_version)?;
        writeln!(f, "- Name:                 {:?}", self.name)?;
        writeln!(f, "- Kernel cmdline:       {:?}", self.cmdline)?;
        write!(f, "- Extra kernel cmdline: {:?}", self.extra_cmdline)
    }
}

impl BootImage {
    /// Build an image from its payloads, using `mkbootimg`'s defaults for every
    /// field that isn't specified.
    pub fn new(
        kernel: Vec<u8>,
        ramdisk: Vec<u8>,
        cmdline: &str,
        base: u32,
        page_size: u32,
    ) -> Self {
        Self {
            base,
            ramdisk_offset: DEFAULT_RAMDISK_OFFSET,
            second_offset: DEFAULT_SECOND_OFFSET,
            tags_offset: DEFAULT_TAGS_OFFSET,
            page_size,
            os_version: 0,
            name: String::new(),
            cmdline: cmdline.to_owned(),
            extra_cmdline: String::new(),
            kernel,
            ramdisk,
            second: vec![],
        }
    }

    pub fn kernel_addr(&self) -> u32 {
        self.base.wrapping_add(KERNEL_OFFSET)
    }

    pub fn ramdisk_addr(&self) -> u32 {
        self.base.wrapping_add(self.ramdisk_offset)
    }

    pub fn second_addr(&self) -> u32 {
        self.base.wrapping_add(self.second_offset)
    }

    pub fn tags_addr(&self) -> u32 {
        self.base.wrapping_add(self.tags_offset)
    }

    /// Compute the header's id field the same way `mkbootimg` does: SHA-1 over
    /// each payload followed by its little-endian size.
    pub fn compute_id(&self) -> [u32; 8] {
        let mut hasher = Sha1::new();

        for data in [&self.kernel, &self.ramdisk, &self.second] {
            hasher.update(data);
            hasher.update((data.len() as u32).to_le_bytes());
        }

        let digest = hasher.finalize();
        let mut id = [0u32; 8];

        for (value, chunk) in id.iter_mut().zip(digest.chunks_exact(4)) {
            *value = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        id
    }

    /// Parse an in-memory image. Anything after the last payload, like the
    /// zero fill of a raw partition dump, is ignored.
    pub fn unpack(data: &[u8]) -> Result<Self> {
        Self::read_from(data)
    }

    /// Assemble the image without any trailing fill.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut data = vec![];
        self.write_to(&mut data)?;

        Ok(data)
    }

    /// Assemble the image and zero-fill it to `size`, which is normally the
    /// size of the target partition.
    pub fn pack_to_size(&self, size: u64) -> Result<Vec<u8>> {
        let mut data = self.pack()?;

        let written = data.len() as u64;
        if written > size {
            return Err(Error::ImageTooLarge {
                size: written,
                limit: size,
            });
        }

        let size = usize::try_from(size).map_err(|_| Error::ImageTooLarge {
            size,
            limit: usize::MAX as u64,
        })?;
        data.resize(size, 0);

        Ok(data)
    }

    pub fn read_from(reader: impl Read) -> Result<Self> {
        let mut reader = Tracked::new(reader);

        let raw = RawHeader::read_from_io(&mut reader)
            .map_err(|e| Error::DataRead("Boot::header", e))?;

        if raw.magic != BOOT_MAGIC {
            return Err(Error::UnknownMagic(raw.magic));
        }

        let header_version = raw.header_version.get();
        if header_version != 0 {
            return Err(Error::UnsupportedHeaderVersion(header_version));
        }

        let kernel_size = util::check_bounds(raw.kernel_size.get(), ..=COMPONENT_MAX_SIZE)
            .map_err(|e| Error::IntOutOfBounds("Boot::kernel_size", e))?;
        let ramdisk_size = util::check_bounds(raw.ramdisk_size.get(), ..=COMPONENT_MAX_SIZE)
            .map_err(|e| Error::IntOutOfBounds("Boot::ramdisk_size", e))?;
        let second_size = util::check_bounds(raw.second_size.get(), ..=COMPONENT_MAX_SIZE)
            .map_err(|e| Error::IntOutOfBounds("Boot::second_size", e))?;

        let page_size = raw.page_size.get();
        if page_size == 0 {
            return Err(Error::PageSizeZero);
        }

        let name = trim_fill(&raw.name);
        let name = str::from_utf8(name)
            .map_err(|e| Error::StringNotUtf8("Boot::name", e, name.to_vec()))?;

        let cmdline = trim_fill(&raw.cmdline);
        let cmdline = str::from_utf8(cmdline)
            .map_err(|e| Error::StringNotUtf8("Boot::cmdline", e, cmdline.to_vec()))?;

        let extra_cmdline = trim_fill(&raw.extra_cmdline);
        let extra_cmdline = str::from_utf8(extra_cmdline)
            .map_err(|e| Error::StringNotUtf8("Boot::extra_cmdline", e, extra_cmdline.to_vec()))?;

        reader
            .skip_padding(page_size.into())
            .map_err(|e| Error::DataRead("Boot::header_padding", e))?;

        let kernel = reader
            .read_vec(kernel_size as usize)
            .map_err(|e| Error::DataRead("Boot::kernel", e))?;
        reader
            .skip_padding(page_size.into())
            .map_err(|e| Error::DataRead("Boot::kernel_padding", e))?;

        let ramdisk = reader
            .read_vec(ramdisk_size as usize)
            .map_err(|e| Error::DataRead("Boot::ramdisk", e))?;

        // The second stage is normally absent. Only consume the ramdisk's
        // padding when there's something after it since truncated images
        // sometimes end right after the ramdisk.
        let second = if second_size > 0 {
            reader
                .skip_padding(page_size.into())
                .map_err(|e| Error::DataRead("Boot::ramdisk_padding", e))?;

            reader
                .read_vec(second_size as usize)
                .map_err(|e| Error::DataRead("Boot::second", e))?
        } else {
            vec![]
        };

        let base = raw.kernel_addr.get().wrapping_sub(KERNEL_OFFSET);

        Ok(Self {
            base,
            ramdisk_offset: raw.ramdisk_addr.get().wrapping_sub(base),
            second_offset: raw.second_addr.get().wrapping_sub(base),
            tags_offset: raw.tags_addr.get().wrapping_sub(base),
            page_size,
            os_version: raw.os_version.get(),
            name: name.to_owned(),
            cmdline: cmdline.to_owned(),
            extra_cmdline: extra_cmdline.to_owned(),
            kernel,
            ramdisk,
            second,
        })
    }

    pub fn write_to(&self, writer: impl Write) -> Result<()> {
        util::check_bounds(self.kernel.len(), ..=COMPONENT_MAX_SIZE as usize)
            .map_err(|e| Error::IntOutOfBounds("Boot::kernel_size", e))?;
        util::check_bounds(self.ramdisk.len(), ..=COMPONENT_MAX_SIZE as usize)
            .map_err(|e| Error::IntOutOfBounds("Boot::ramdisk_size", e))?;
        util::check_bounds(self.second.len(), ..=COMPONENT_MAX_SIZE as usize)
            .map_err(|e| Error::IntOutOfBounds("Boot::second_size", e))?;

        if self.page_size == 0 {
            return Err(Error::PageSizeZero);
        }

        let name = to_field::<BOOT_NAME_SIZE>("Boot::name", &self.name)?;
        let cmdline = to_field::<BOOT_ARGS_SIZE>("Boot::cmdline", &self.cmdline)?;
        let extra_cmdline =
            to_field::<BOOT_EXTRA_ARGS_SIZE>("Boot::extra_cmdline", &self.extra_cmdline)?;

        let mut writer = Tracked::new(writer);

        let raw = RawHeader {
            magic: BOOT_MAGIC,
            kernel_size: (self.kernel.len() as u32).into(),
            kernel_addr: self.kernel_addr().into(),
            ramdisk_size: (self.ramdisk.len() as u32).into(),
            ramdisk_addr: self.ramdisk_addr().into(),
            second_size: (self.second.len() as u32).into(),
            second_addr: self.second_addr().into(),
            tags_addr: self.tags_addr().into(),
            page_size: self.page_size.into(),
            header_version: 0u32.into(),
            os_version: self.os_version.into(),
            name,
            cmdline,
            id: self.compute_id().map(|id| id.into()),
            extra_cmdline,
        };

        raw.write_to_io(&mut writer)
            .map_err(|e| Error::DataWrite("Boot::header", e))?;
        writer
            .write_padding(self.page_size.into())
            .map_err(|e| Error::DataWrite("Boot::header_padding", e))?;

        writer
            .write_all(&self.kernel)
            .map_err(|e| Error::DataWrite("Boot::kernel", e))?;
        writer
            .write_padding(self.page_size.into())
            .map_err(|e| Error::DataWrite("Boot::kernel_padding", e))?;

        writer
            .write_all(&self.ramdisk)
            .map_err(|e| Error::DataWrite("Boot::ramdisk", e))?;
        writer
            .write_padding(self.page_size.into())
            .map_err(|e| Error::DataWrite("Boot::ramdisk_padding", e))?;

        if !self.second.is_empty() {
            writer
                .write_all(&self.second)
                .map_err(|e| Error::DataWrite("Boot::second", e))?;
            writer
                .write_padding(self.page_size.into())
                .map_err(|e| Error::DataWrite("Boot::second_padding", e))?;
        }

        Ok(())
    }
}

/// Strip the NUL fill of a fixed-size header string.
fn trim_fill(field: &[u8]) -> &[u8] {
    let end = field.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &field[..end]
}

/// NUL fill a string into a fixed-size header field.
fn to_field<const N: usize>(name: &'static str, value: &str) -> Result<[u8; N]> {
    let bytes = value.as_bytes();
    if bytes.len() > N {
        return Err(Error::StringTooLong(name, N, value.to_owned()));
    }

    let mut field = [0u8; N];
    field[..bytes.len()].copy_from_slice(bytes);

    Ok(field)
}

#[cfg(test)]
mod tests {
    use std::mem;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn header_layout() {
        assert_eq!(mem::size_of::<RawHeader>(), 1632);
    }

    #[test]
    fn addresses_from_base() {
        let image = BootImage::new(vec![], vec![], "", DEFAULT_BASE, DEFAULT_PAGE_SIZE);

        assert_eq!(image.kernel_addr(), 0x1000_8000);
        assert_eq!(image.ramdisk_addr(), 0x1100_0000);
        assert_eq!(image.second_addr(), 0x10f0_0000);
        assert_eq!(image.tags_addr(), 0x1000_0100);
    }

    #[test]
    fn header_strings() {
        assert_eq!(trim_fill(b"ab\0c\0\0"), b"ab\0c");
        assert_eq!(trim_fill(b"\0\0"), b"");
        assert_eq!(to_field::<4>("name", "abc").unwrap(), *b"abc\0");
        assert_matches!(
            to_field::<4>("name", "abcde"),
            Err(Error::StringTooLong("name", 4, _))
        );
    }

    #[test]
    fn payload_offsets_are_page_aligned() {
        let image = BootImage::new(b"kernel".to_vec(), b"ramdisk".to_vec(), "", 0, 2048);
        let data = image.pack().unwrap();

        assert_eq!(data.len(), 3 * 2048);
        assert_eq!(&data[2048..2054], b"kernel");
        assert_eq!(&data[4096..4103], b"ramdisk");
        assert!(data[4103..].iter().all(|b| *b == 0));
    }
}
