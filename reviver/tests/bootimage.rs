// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use assert_matches::assert_matches;
use reviver::{
    format::{
        bootimage::{self, BootImage, DEFAULT_BASE, DEFAULT_PAGE_SIZE},
        compression::CompressedFormat,
        cpio::CpioEntry,
    },
    ramdisk::RamdiskTree,
    unpacked,
};

const PARTITION_SIZE: u64 = 8 * 1024 * 1024;

fn sample_ramdisk(format: CompressedFormat) -> Vec<u8> {
    let tree = RamdiskTree {
        format,
        entries: vec![
            CpioEntry::new_file(b"init", 0o750, b"\x7fELF".repeat(100)),
            CpioEntry::new_file(b"default.prop", 0o644, b"ro.secure=1\n".to_vec()),
            CpioEntry::new_directory(b"sbin", 0o750),
            CpioEntry::new_symlink(b"sbin/ueventd", b"../init"),
        ],
    };

    tree.build().unwrap()
}

#[test]
fn round_trip_image() {
    let kernel = b"kernel".repeat(1000);
    let mut image = BootImage::new(
        kernel,
        sample_ramdisk(CompressedFormat::Gzip),
        "console=ttyAMA0",
        DEFAULT_BASE,
        DEFAULT_PAGE_SIZE,
    );
    image.name = "mc74".to_owned();
    image.second = b"second".to_vec();

    let data = image.pack().unwrap();
    assert_eq!(&data[..8], b"ANDROID!");
    assert_eq!(data.len() % DEFAULT_PAGE_SIZE as usize, 0);

    let parsed = BootImage::unpack(&data).unwrap();
    assert_eq!(parsed, image);
}

#[test]
fn pack_to_partition_size() {
    let image = BootImage::new(
        vec![0xaa; 3 * 1024 * 1024],
        sample_ramdisk(CompressedFormat::Gzip),
        "console=ttyAMA0",
        DEFAULT_BASE,
        2048,
    );

    let data = image.pack_to_size(PARTITION_SIZE).unwrap();
    assert_eq!(data.len() as u64, PARTITION_SIZE);

    // The zero fill must be ignored on the way back in.
    let parsed = BootImage::unpack(&data).unwrap();
    assert_eq!(parsed.cmdline, "console=ttyAMA0");
    assert_eq!(parsed.page_size, 2048);
    assert_eq!(parsed.kernel, image.kernel);

    let tree = RamdiskTree::extract(&parsed.ramdisk).unwrap();
    assert_eq!(tree.format, CompressedFormat::Gzip);
    assert_eq!(tree.entries[0].name, b"default.prop");
}

#[test]
fn pack_to_size_too_small() {
    let image = BootImage::new(
        vec![0; 8192],
        vec![0; 8192],
        "",
        DEFAULT_BASE,
        DEFAULT_PAGE_SIZE,
    );

    assert_matches!(
        image.pack_to_size(4096),
        Err(bootimage::Error::ImageTooLarge { limit: 4096, .. })
    );
}

#[test]
fn reject_bad_magic() {
    let mut data = BootImage::new(vec![], vec![], "", DEFAULT_BASE, DEFAULT_PAGE_SIZE)
        .pack()
        .unwrap();
    data[..8].copy_from_slice(b"VNDRBOOT");

    assert_matches!(
        BootImage::unpack(&data),
        Err(bootimage::Error::UnknownMagic(m)) if &m == b"VNDRBOOT"
    );
}

#[test]
fn materialize_and_rebuild() {
    let temp_dir = tempfile::tempdir().unwrap();
    let unpack_dir = temp_dir.path().join("rmcBootUnpack");
    let ramdisk_dir = temp_dir.path().join("rmcBootRamdisk");

    let image = BootImage::new(
        b"kernel".to_vec(),
        sample_ramdisk(CompressedFormat::Lz4Legacy),
        "console=ttyAMA0",
        DEFAULT_BASE,
        DEFAULT_PAGE_SIZE,
    );

    let tree = unpacked::save(&image, &unpack_dir, &ramdisk_dir).unwrap();
    assert_eq!(tree.format, CompressedFormat::Lz4Legacy);
    assert!(unpack_dir.join(unpacked::HEADER_FILE).is_file());
    assert!(ramdisk_dir.join("default.prop").is_file());
    assert!(ramdisk_dir.join("sbin").is_dir());

    let rebuilt = unpacked::load(&unpack_dir, &ramdisk_dir).unwrap();
    assert_eq!(rebuilt.cmdline, image.cmdline);
    assert_eq!(rebuilt.kernel, image.kernel);

    let rebuilt_tree = RamdiskTree::extract(&rebuilt.ramdisk).unwrap();
    assert_eq!(rebuilt_tree.format, CompressedFormat::Lz4Legacy);
    assert_eq!(rebuilt_tree.entries.len(), 4);

    let link = rebuilt_tree.entry("sbin/ueventd").unwrap();
    assert!(link.is_symlink());
    assert_eq!(link.content, b"../init");
}
