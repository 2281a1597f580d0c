// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{fs, path::PathBuf, str};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    cli::{args::GlobalOpts, boot, run, status, warning},
    patch,
    ramdisk::RamdiskTree,
    unpacked,
};

static CONTENT_BEGIN: &str = "----- BEGIN UTF-8 CONTENT -----";
static CONTENT_END: &str = "----- END UTF-8 CONTENT -----";
static CONTENT_END_NO_NEWLINE: &str = "----- END UTF-8 CONTENT (NO NEWLINE) -----";

static BINARY_BEGIN: &str = "----- BEGIN BINARY CONTENT -----";
static BINARY_END: &str = "----- END BINARY CONTENT -----";
static BINARY_END_TRUNCATED: &str = "----- END BINARY CONTENT (TRUNCATED) -----";

static NO_DATA: &str = "----- NO DATA -----";

fn print_content(data: &[u8], truncate: bool) {
    if data.is_empty() {
        println!("{NO_DATA}");
        return;
    }

    if !data.contains(&b'\0')
        && let Ok(s) = str::from_utf8(data)
        && !s.contains(CONTENT_BEGIN)
        && !s.contains(CONTENT_END)
    {
        println!("{CONTENT_BEGIN}");
        print!("{s}");
        if data.last() == Some(&b'\n') {
            println!("{CONTENT_END}");
        } else {
            println!();
            println!("{CONTENT_END_NO_NEWLINE}");
        }

        return;
    }

    println!("{BINARY_BEGIN}");

    if data.len() > 512 && truncate {
        println!("{}", data[..512].escape_ascii());
        println!("{BINARY_END_TRUNCATED}");
    } else {
        println!("{}", data.escape_ascii());
        println!("{BINARY_END}");
    }
}

fn dump_subcommand(cli: &DumpCli) -> Result<()> {
    let data = fs::read(&cli.input).with_context(|| format!("Failed to read: {:?}", cli.input))?;
    let tree = RamdiskTree::extract(&data)
        .with_context(|| format!("Failed to read ramdisk: {:?}", cli.input))?;

    println!("Compression format: {:?}", tree.format);
    println!();

    for entry in &tree.entries {
        println!("{entry}");
        print_content(&entry.content, !cli.no_truncate);
        println!();
    }

    Ok(())
}

fn patch_subcommand(cli: &PatchCli, global: &GlobalOpts) -> Result<()> {
    let profile = run::load_profile(global)?;
    let tree_dir = boot::tree_dir(&cli.directory);

    let mut tree = unpacked::load_ramdisk(&cli.directory, &tree_dir)
        .with_context(|| format!("Failed to load ramdisk tree: {tree_dir:?}"))?;

    let warnings =
        patch::apply_rules(&mut tree, &profile.ramdisk).context("Failed to patch ramdisk")?;
    for warning in &warnings {
        warning!("{warning}");
    }

    unpacked::save_ramdisk(&tree, &cli.directory, &tree_dir)
        .with_context(|| format!("Failed to save ramdisk tree: {tree_dir:?}"))?;

    status!("Applied ramdisk rules from profile {}", profile.name);

    Ok(())
}

pub fn ramdisk_main(cli: &RamdiskCli, global: &GlobalOpts) -> Result<()> {
    match &cli.command {
        RamdiskCommand::Dump(c) => dump_subcommand(c),
        RamdiskCommand::Patch(c) => patch_subcommand(c, global),
    }
}

/// Dump the headers and data of a ramdisk archive.
#[derive(Debug, Parser)]
struct DumpCli {
    /// Path to input ramdisk (gzip, legacy lz4, or uncompressed cpio).
    #[arg(short, long, value_name = "FILE", value_parser)]
    input: PathBuf,

    /// Do not truncate binary file contents.
    #[arg(long)]
    no_truncate: bool,
}

/// Apply the profile's ramdisk rules to a directory written by `boot unpack`.
#[derive(Debug, Parser)]
struct PatchCli {
    /// Unpacked boot image directory.
    #[arg(short, long, value_name = "DIR", value_parser)]
    directory: PathBuf,
}

#[derive(Debug, Subcommand)]
enum RamdiskCommand {
    Dump(DumpCli),
    Patch(PatchCli),
}

/// Inspect and patch ramdisks.
#[derive(Debug, Parser)]
pub struct RamdiskCli {
    #[command(subcommand)]
    command: RamdiskCommand,
}
