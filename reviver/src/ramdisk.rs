// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! The ramdisk as an ordered list of archive entries, plus its on-disk form:
//! a TOML metadata file describing every entry and a directory tree holding
//! the regular files' contents.

use std::{
    fs,
    io::{self, Cursor},
    path::{Component, Path, PathBuf},
    str,
};

use bstr::ByteSlice;
use cap_std::{ambient_authority, fs::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    format::{
        compression::{self, CompressedFormat, CompressedReader, CompressedWriter},
        cpio::{self, CpioEntry},
    },
    octal, util,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to detect ramdisk compression")]
    Compression(#[from] compression::Error),
    #[error("Failed to process ramdisk archive")]
    Cpio(#[from] cpio::Error),
    #[error("Entry path is not UTF-8: {:?}", .0.as_bstr())]
    PathNotUtf8(Vec<u8>),
    #[error("Entry path escapes the tree: {0:?}")]
    UnsafePath(String),
    #[error("Entry not found in ramdisk: {0:?}")]
    EntryNotFound(String),
    #[error("Failed to parse ramdisk metadata: {0:?}")]
    MetadataParse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Failed to compress ramdisk")]
    Compress(#[source] io::Error),
    #[error("Failed to serialize ramdisk metadata")]
    MetadataSerialize(#[source] toml_edit::ser::Error),
    #[error("I/O error: {0:?}")]
    Io(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Special,
}

/// Per-entry metadata stored in the ramdisk TOML file. File contents live in
/// the tree directory and symlink targets are stored inline.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
struct EntryInfo {
    path: String,
    kind: EntryKind,
    #[serde(with = "octal")]
    mode: u32,
    mtime: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    rdev_maj: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    rdev_min: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
struct RamdiskInfo {
    format: CompressedFormat,
    entries: Vec<EntryInfo>,
}

/// Convert an entry name to a relative path, rejecting anything that could
/// resolve outside of the tree.
fn safe_path(name: &[u8]) -> Result<&Path> {
    let name = str::from_utf8(name).map_err(|_| Error::PathNotUtf8(name.to_vec()))?;
    let path = Path::new(name);

    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || name.is_empty() {
        return Err(Error::UnsafePath(name.to_owned()));
    }

    Ok(path)
}

fn open_tree(path: &Path, create: bool) -> Result<Dir> {
    let authority = ambient_authority();

    if create {
        Dir::create_ambient_dir_all(path, authority).map_err(|e| Error::Io(path.to_owned(), e))?;
    }

    Dir::open_ambient_dir(path, authority).map_err(|e| Error::Io(path.to_owned(), e))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RamdiskTree {
    pub format: CompressedFormat,
    pub entries: Vec<CpioEntry>,
}

impl RamdiskTree {
    /// Decompress and parse a ramdisk payload. The `.` entry that some
    /// archivers emit for the root directory carries no information and is
    /// dropped.
    pub fn extract(data: &[u8]) -> Result<Self> {
        let reader = CompressedReader::new(Cursor::new(data), true)?;
        let format = reader.format();

        let mut entries = cpio::load(reader)?;
        entries.retain(|e| e.name != b"." && e.name != b"./");

        debug!("Extracted {} ramdisk entries ({format:?})", entries.len());

        Ok(Self { format, entries })
    }

    /// Build a reproducible archive: entries sorted by path, owner and group
    /// forced to root, and inodes renumbered. The payload is compressed with
    /// the same format it was extracted with.
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut entries = self.entries.clone();

        cpio::sort(&mut entries);
        cpio::reassign_inodes(&mut entries);

        for entry in &mut entries {
            entry.uid = 0;
            entry.gid = 0;
        }

        let mut writer = CompressedWriter::new(Vec::new(), self.format)?;
        cpio::save(&mut writer, &entries)?;

        writer.finish().map_err(Error::Compress)
    }

    pub fn entry(&self, path: &str) -> Option<&CpioEntry> {
        self.entries.iter().find(|e| e.name == path.as_bytes())
    }

    pub fn entry_mut(&mut self, path: &str) -> Result<&mut CpioEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.name == path.as_bytes())
            .ok_or_else(|| Error::EntryNotFound(path.to_owned()))
    }

    /// Write the metadata file and materialize regular files under `tree_dir`.
    pub fn save_dir(&self, info_path: &Path, tree_dir: &Path) -> Result<()> {
        let tree = open_tree(tree_dir, true)?;
        let mut info = RamdiskInfo {
            format: self.format,
            entries: Vec::with_capacity(self.entries.len()),
        };

        for entry in &self.entries {
            let path = safe_path(&entry.name)?;
            let io_err = |e| Error::Io(tree_dir.join(path), e);

            let kind = if entry.is_file() {
                let parent = util::parent_path(path);
                tree.create_dir_all(parent).map_err(io_err)?;
                tree.write(path, &entry.content).map_err(io_err)?;
                EntryKind::File
            } else if entry.is_dir() {
                tree.create_dir_all(path).map_err(io_err)?;
                EntryKind::Directory
            } else if entry.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::Special
            };

            let target = if entry.is_symlink() {
                let target = str::from_utf8(&entry.content)
                    .map_err(|_| Error::PathNotUtf8(entry.content.clone()))?;
                Some(target.to_owned())
            } else {
                None
            };

            info.entries.push(EntryInfo {
                path: path.to_string_lossy().into_owned(),
                kind,
                mode: entry.mode,
                mtime: entry.mtime,
                target,
                rdev_maj: entry.rdev_maj,
                rdev_min: entry.rdev_min,
            });
        }

        let data = toml_edit::ser::to_string_pretty(&info).map_err(Error::MetadataSerialize)?;
        fs::write(info_path, data).map_err(|e| Error::Io(info_path.to_owned(), e))?;

        Ok(())
    }

    /// Load a tree written by [`Self::save_dir`]. Entry order and mode bits
    /// come from the metadata file, so host permissions never affect the
    /// rebuilt archive.
    pub fn load_dir(info_path: &Path, tree_dir: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(info_path).map_err(|e| Error::Io(info_path.to_owned(), e))?;
        let info: RamdiskInfo = toml_edit::de::from_str(&data)
            .map_err(|e| Error::MetadataParse(info_path.to_owned(), e))?;

        let tree = open_tree(tree_dir, false)?;
        let mut entries = Vec::with_capacity(info.entries.len());

        for item in info.entries {
            let path = safe_path(item.path.as_bytes())?;

            let content = match item.kind {
                EntryKind::File => tree
                    .read(path)
                    .map_err(|e| Error::Io(tree_dir.join(path), e))?,
                EntryKind::Symlink => item.target.unwrap_or_default().into_bytes(),
                EntryKind::Directory | EntryKind::Special => vec![],
            };

            entries.push(CpioEntry {
                mode: item.mode,
                nlink: 1,
                mtime: item.mtime,
                rdev_maj: item.rdev_maj,
                rdev_min: item.rdev_min,
                name: item.path.into_bytes(),
                content,
                ..Default::default()
            });
        }

        Ok(Self {
            format: info.format,
            entries,
        })
    }
}
