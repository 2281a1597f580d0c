// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tempfile::NamedTempFile;

use crate::{
    cli::status,
    format::bootimage::BootImage,
    ramdisk::RamdiskTree,
    unpacked, util,
};

/// Subdirectory of an unpack directory holding the extracted ramdisk.
pub const TREE_DIR: &str = "tree";

pub fn tree_dir(dir: &Path) -> PathBuf {
    dir.join(TREE_DIR)
}

fn read_image(path: &Path) -> Result<BootImage> {
    let data = fs::read(path).with_context(|| format!("Failed to read: {path:?}"))?;
    let image =
        BootImage::unpack(&data).with_context(|| format!("Failed to parse boot image: {path:?}"))?;

    Ok(image)
}

fn write_image(path: &Path, data: &[u8]) -> Result<()> {
    let parent = util::parent_path(path);
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in: {parent:?}"))?;
    temp.write_all(data)
        .with_context(|| format!("Failed to write boot image: {path:?}"))?;
    temp.persist(path)
        .with_context(|| format!("Failed to move boot image into place: {path:?}"))?;

    Ok(())
}

fn unpack_subcommand(cli: &UnpackCli) -> Result<()> {
    let image = read_image(&cli.input)?;
    let tree = unpacked::save(&image, &cli.directory, &tree_dir(&cli.directory))
        .with_context(|| format!("Failed to unpack to: {:?}", cli.directory))?;

    status!(
        "Unpacked {} ramdisk entries ({:?}) to {:?}",
        tree.entries.len(),
        tree.format,
        cli.directory,
    );

    Ok(())
}

fn pack_subcommand(cli: &PackCli) -> Result<()> {
    let image = unpacked::load(&cli.directory, &tree_dir(&cli.directory))
        .with_context(|| format!("Failed to load unpacked image: {:?}", cli.directory))?;

    let data = match cli.size {
        Some(size) => image.pack_to_size(size),
        None => image.pack(),
    }
    .context("Failed to pack boot image")?;

    write_image(&cli.output, &data)?;

    status!("Packed {} bytes to {:?}", data.len(), cli.output);

    Ok(())
}

fn info_subcommand(cli: &InfoCli) -> Result<()> {
    let image = read_image(&cli.input)?;

    let header = toml_edit::ser::to_string_pretty(&image).context("Failed to serialize header")?;
    print!("{header}");
    println!();

    println!("kernel = {} bytes @ {:#010x}", image.kernel.len(), image.kernel_addr());
    println!("ramdisk = {} bytes @ {:#010x}", image.ramdisk.len(), image.ramdisk_addr());
    println!("second = {} bytes @ {:#010x}", image.second.len(), image.second_addr());
    println!("tags @ {:#010x}", image.tags_addr());
    println!();

    let tree = RamdiskTree::extract(&image.ramdisk).context("Failed to read ramdisk")?;

    println!("Ramdisk compression format: {:?}", tree.format);
    for entry in &tree.entries {
        println!("{entry}");
    }

    Ok(())
}

pub fn boot_main(cli: &BootCli) -> Result<()> {
    match &cli.command {
        BootCommand::Unpack(c) => unpack_subcommand(c),
        BootCommand::Pack(c) => pack_subcommand(c),
        BootCommand::Info(c) => info_subcommand(c),
    }
}

/// Unpack a boot image into a directory.
///
/// The header is written as TOML. The ramdisk is extracted into the `tree`
/// subdirectory, with entry metadata recorded next to the header.
#[derive(Debug, Parser)]
struct UnpackCli {
    /// Path to input boot image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Output directory. Existing contents are removed.
    #[arg(short, long, value_name = "DIR", value_parser)]
    directory: PathBuf,
}

/// Pack a boot image from an unpacked directory.
#[derive(Debug, Parser)]
struct PackCli {
    /// Directory written by `boot unpack`.
    #[arg(short, long, value_name = "DIR", value_parser)]
    directory: PathBuf,

    /// Path to output boot image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    output: PathBuf,

    /// Pad the image with zeros to this size.
    #[arg(long, value_name = "BYTES")]
    size: Option<u64>,
}

/// Display boot image header and ramdisk contents.
#[derive(Debug, Parser)]
struct InfoCli {
    /// Path to input boot image.
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum BootCommand {
    Unpack(UnpackCli),
    Pack(PackCli),
    Info(InfoCli),
}

/// Pack, unpack, and inspect boot images.
#[derive(Debug, Parser)]
pub struct BootCli {
    #[command(subcommand)]
    command: BootCommand,
}
