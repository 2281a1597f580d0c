// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    io::{self, Read, Write},
};

use bstr::ByteSlice;
use thiserror::Error;

use crate::{stream::Tracked, util::NumBytes};

const MAGIC_NEW: &[u8; 6] = b"070701";
const MAGIC_NEW_CRC: &[u8; 6] = b"070702";

pub const CPIO_TRAILER: &[u8; 10] = b"TRAILER!!!";

pub const S_IFMT: u32 = 0o170000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFSOCK: u32 = 0o140000;

/// Inode numbers assigned when rebuilding an archive start here.
const FIRST_INODE: u32 = 300000;

/// Size at which buffers switch from exact allocation to incremental growth so
/// that a bogus size field can't trigger a huge allocation up front.
const REALLOC_NAME_THRESHOLD: usize = 1024;
const REALLOC_DATA_THRESHOLD: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown magic: {:?}", .0.as_bstr())]
    UnknownMagic([u8; 6]),
    #[error("Hard links are not supported: {:?}", .0.as_bstr())]
    HardLinksNotSupported(Vec<u8>),
    #[error("Entry name is not NULL-terminated: {:?}", .0.as_bstr())]
    NameNotTerminated(Vec<u8>),
    #[error("{0:?} field exceeds integer bounds")]
    IntegerTooLarge(&'static str),
    #[error("I/O error")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Read a u32 encoded as 8 ASCII hex digits.
fn read_int(mut reader: impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;

    let mut value = 0;

    for b in buf {
        let digit = (b as char).to_digit(16).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{:?}: Invalid hex digit: {:?}", buf.as_bstr(), b as char),
            )
        })?;

        value = (value << 4) | digit;
    }

    Ok(value)
}

/// Write a u32 as 8 ASCII hex digits.
fn write_int(mut writer: impl Write, value: u32) -> io::Result<()> {
    writer.write_all(format!("{value:08x}").as_bytes())
}

fn read_data(mut reader: impl Read, size: usize, realloc_thresh: usize) -> io::Result<Vec<u8>> {
    if size < realloc_thresh {
        let mut buf = vec![0u8; size];
        reader.read_exact(&mut buf)?;
        return Ok(buf);
    }

    let mut buf = Vec::with_capacity(realloc_thresh);
    let mut offset = 0;

    while offset < size {
        let n = (size - offset).min(16384);
        buf.resize(offset + n, 0);
        reader.read_exact(&mut buf[offset..][..n])?;
        offset += n;
    }

    Ok(buf)
}

/// One entry of a `newc` archive. The trailer is never stored as an entry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CpioEntry {
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u32,
    pub dev_maj: u32,
    pub dev_min: u32,
    pub rdev_maj: u32,
    pub rdev_min: u32,
    pub chksum: u32,
    pub name: Vec<u8>,
    pub content: Vec<u8>,
}

impl fmt::Debug for CpioEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpioEntry")
            .field("ino", &self.ino)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("nlink", &self.nlink)
            .field("mtime", &self.mtime)
            .field("dev_maj", &self.dev_maj)
            .field("dev_min", &self.dev_min)
            .field("rdev_maj", &self.rdev_maj)
            .field("rdev_min", &self.rdev_min)
            .field("chksum", &self.chksum)
            .field("name", &self.name.as_bstr())
            .field("content", &NumBytes(self.content.len()))
            .finish()
    }
}

impl fmt::Display for CpioEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.file_type() {
            S_IFIFO => "p",
            S_IFCHR => "c",
            S_IFDIR => "d",
            S_IFBLK => "b",
            S_IFREG => "-",
            S_IFLNK => "l",
            S_IFSOCK => "s",
            _ => "?",
        };

        write!(
            f,
            "{kind} {:04o} {:>5} {:>5} {:>9} {}",
            self.permissions(),
            self.uid,
            self.gid,
            self.content.len(),
            self.name.as_bstr(),
        )?;

        if self.is_symlink() {
            write!(f, " -> {}", self.content.as_bstr())?;
        }

        Ok(())
    }
}

impl CpioEntry {
    pub fn new_trailer() -> Self {
        Self {
            // Must be 1 for the CRC variant.
            nlink: 1,
            name: CPIO_TRAILER.to_vec(),
            ..Default::default()
        }
    }

    pub fn new_symlink(name: &[u8], target: &[u8]) -> Self {
        Self {
            mode: S_IFLNK | 0o777,
            nlink: 1,
            name: name.to_owned(),
            content: target.to_owned(),
            ..Default::default()
        }
    }

    pub fn new_directory(name: &[u8], permissions: u32) -> Self {
        Self {
            mode: S_IFDIR | (permissions & 0o7777),
            nlink: 1,
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn new_file(name: &[u8], permissions: u32, content: Vec<u8>) -> Self {
        Self {
            mode: S_IFREG | (permissions & 0o7777),
            nlink: 1,
            name: name.to_owned(),
            content,
            ..Default::default()
        }
    }

    pub fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }

    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn set_permissions(&mut self, permissions: u32) {
        self.mode = self.file_type() | (permissions & 0o7777);
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == S_IFLNK
    }

    pub fn is_trailer(&self) -> bool {
        self.name == CPIO_TRAILER
    }

    /// Read one entry. Padding is computed from the entry's own start, which
    /// is always 4-byte aligned within an archive.
    pub fn read_from(reader: impl Read) -> Result<Self> {
        let mut reader = Tracked::new(reader);

        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;

        if magic != *MAGIC_NEW && magic != *MAGIC_NEW_CRC {
            return Err(Error::UnknownMagic(magic));
        }

        let ino = read_int(&mut reader)?;
        let mode = read_int(&mut reader)?;
        let uid = read_int(&mut reader)?;
        let gid = read_int(&mut reader)?;
        let nlink = read_int(&mut reader)?;
        let mtime = read_int(&mut reader)?;
        let filesize = read_int(&mut reader)?;
        let dev_maj = read_int(&mut reader)?;
        let dev_min = read_int(&mut reader)?;
        let rdev_maj = read_int(&mut reader)?;
        let rdev_min = read_int(&mut reader)?;
        let namesize = read_int(&mut reader)?;
        let chksum = read_int(&mut reader)?;

        let namesize =
            usize::try_from(namesize).map_err(|_| Error::IntegerTooLarge("namesize"))?;
        let filesize =
            usize::try_from(filesize).map_err(|_| Error::IntegerTooLarge("filesize"))?;

        let mut name = read_data(&mut reader, namesize, REALLOC_NAME_THRESHOLD)?;
        if name.pop() != Some(b'\0') {
            return Err(Error::NameNotTerminated(name));
        }
        reader.skip_padding(4)?;

        let content = read_data(&mut reader, filesize, REALLOC_DATA_THRESHOLD)?;
        reader.skip_padding(4)?;

        Ok(Self {
            ino,
            mode,
            uid,
            gid,
            nlink,
            mtime,
            dev_maj,
            dev_min,
            rdev_maj,
            rdev_min,
            chksum,
            name,
            content,
        })
    }

    pub fn write_to(&self, writer: impl Write) -> Result<()> {
        let mut writer = Tracked::new(writer);

        let filesize =
            u32::try_from(self.content.len()).map_err(|_| Error::IntegerTooLarge("filesize"))?;
        let namesize = self
            .name
            .len()
            .checked_add(1)
            .and_then(|s| u32::try_from(s).ok())
            .ok_or(Error::IntegerTooLarge("namesize"))?;

        if self.chksum == 0 {
            writer.write_all(MAGIC_NEW)?;
        } else {
            writer.write_all(MAGIC_NEW_CRC)?;
        }

        for value in [
            self.ino,
            self.mode,
            self.uid,
            self.gid,
            self.nlink,
            self.mtime,
            filesize,
            self.dev_maj,
            self.dev_min,
            self.rdev_maj,
            self.rdev_min,
            namesize,
            self.chksum,
        ] {
            write_int(&mut writer, value)?;
        }

        writer.write_all(&self.name)?;
        writer.write_zeros(1)?;
        writer.write_padding(4)?;

        writer.write_all(&self.content)?;
        writer.write_padding(4)?;

        Ok(())
    }
}

/// Read entries until the trailer. The trailer itself is not returned.
pub fn load(mut reader: impl Read) -> Result<Vec<CpioEntry>> {
    let mut entries = vec![];

    loop {
        let entry = CpioEntry::read_from(&mut reader)?;
        if entry.is_trailer() {
            break;
        }

        if !entry.is_dir() && entry.nlink > 1 {
            return Err(Error::HardLinksNotSupported(entry.name));
        }

        entries.push(entry);
    }

    Ok(entries)
}

pub fn sort(entries: &mut [CpioEntry]) {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
}

pub fn reassign_inodes(entries: &mut [CpioEntry]) {
    for (entry, inode) in entries.iter_mut().zip(FIRST_INODE..) {
        entry.ino = inode;
    }
}

/// Write the entries followed by a trailer. Callers are expected to have
/// sorted the entries and reassigned inodes if reproducible output matters.
pub fn save(mut writer: impl Write, entries: &[CpioEntry]) -> Result<()> {
    for entry in entries {
        entry.write_to(&mut writer)?;
    }

    let mut trailer = CpioEntry::new_trailer();
    trailer.ino = entries
        .iter()
        .map(|e| e.ino)
        .max()
        .map_or(0, |i| i.saturating_add(1));
    trailer.write_to(&mut writer)?;

    Ok(())
}
