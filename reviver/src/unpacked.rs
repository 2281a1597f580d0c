// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! A boot image materialized as files: the header scalars as TOML, the raw
//! payloads, and the extracted ramdisk tree.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

use crate::{
    format::bootimage::BootImage,
    ramdisk::{self, RamdiskTree},
};

pub const HEADER_FILE: &str = "header.toml";
pub const KERNEL_FILE: &str = "kernel";
pub const RAMDISK_FILE: &str = "ramdisk";
pub const SECOND_FILE: &str = "second";
pub const RAMDISK_INFO_FILE: &str = "ramdisk.toml";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to parse header: {0:?}")]
    HeaderParse(PathBuf, #[source] toml_edit::de::Error),
    #[error("Failed to serialize header")]
    HeaderSerialize(#[source] toml_edit::ser::Error),
    #[error("Ramdisk error")]
    Ramdisk(#[from] ramdisk::Error),
    #[error("I/O error: {0:?}")]
    Io(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// Remove a directory tree if it exists and create it again, empty.
fn recreate_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(path.to_owned(), e)),
    }

    fs::create_dir_all(path).map_err(|e| Error::Io(path.to_owned(), e))
}

fn write_file(path: &Path, data: impl AsRef<[u8]>) -> Result<()> {
    fs::write(path, data).map_err(|e| Error::Io(path.to_owned(), e))
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Io(path.to_owned(), e))
}

/// Write every part of `image` under `unpack_dir` and extract its ramdisk into
/// `ramdisk_dir`. Both directories are cleared first so that stale files from
/// an earlier image can't leak into the next pack.
pub fn save(image: &BootImage, unpack_dir: &Path, ramdisk_dir: &Path) -> Result<RamdiskTree> {
    recreate_dir(unpack_dir)?;
    recreate_dir(ramdisk_dir)?;

    let header = toml_edit::ser::to_string_pretty(image).map_err(Error::HeaderSerialize)?;
    write_file(&unpack_dir.join(HEADER_FILE), header)?;
    write_file(&unpack_dir.join(KERNEL_FILE), &image.kernel)?;
    write_file(&unpack_dir.join(RAMDISK_FILE), &image.ramdisk)?;

    if !image.second.is_empty() {
        write_file(&unpack_dir.join(SECOND_FILE), &image.second)?;
    }

    let tree = RamdiskTree::extract(&image.ramdisk)?;
    tree.save_dir(&unpack_dir.join(RAMDISK_INFO_FILE), ramdisk_dir)?;

    debug!("Unpacked boot image to {unpack_dir:?} and {ramdisk_dir:?}");

    Ok(tree)
}

/// Load the ramdisk tree written by [`save`].
pub fn load_ramdisk(unpack_dir: &Path, ramdisk_dir: &Path) -> Result<RamdiskTree> {
    Ok(RamdiskTree::load_dir(
        &unpack_dir.join(RAMDISK_INFO_FILE),
        ramdisk_dir,
    )?)
}

/// Write a modified ramdisk tree back to disk.
pub fn save_ramdisk(tree: &RamdiskTree, unpack_dir: &Path, ramdisk_dir: &Path) -> Result<()> {
    recreate_dir(ramdisk_dir)?;
    tree.save_dir(&unpack_dir.join(RAMDISK_INFO_FILE), ramdisk_dir)?;

    Ok(())
}

/// Reassemble a boot image from the files written by [`save`]. The ramdisk is
/// always rebuilt from the tree, never taken from the raw payload file.
pub fn load(unpack_dir: &Path, ramdisk_dir: &Path) -> Result<BootImage> {
    let header_path = unpack_dir.join(HEADER_FILE);
    let header = fs::read_to_string(&header_path).map_err(|e| Error::Io(header_path.clone(), e))?;
    let mut image: BootImage =
        toml_edit::de::from_str(&header).map_err(|e| Error::HeaderParse(header_path, e))?;

    image.kernel = read_file(&unpack_dir.join(KERNEL_FILE))?;

    let second_path = unpack_dir.join(SECOND_FILE);
    image.second = match fs::read(&second_path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => vec![],
        Err(e) => return Err(Error::Io(second_path, e)),
    };

    image.ramdisk = load_ramdisk(unpack_dir, ramdisk_dir)?.build()?;

    Ok(image)
}
