// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! A one-line record identifying a flashed image:
//! `<date> <time> <size> <label> <checksum>`.

use std::{
    fmt,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use ring::digest::{Context, SHA256};
use thiserror::Error;

use crate::stream::DigestSink;

/// Number of hex digits of the SHA-256 digest that are recorded.
const CHECKSUM_DIGITS: usize = 8;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed fingerprint: {0:?}")]
    Malformed(String),
    #[error("Failed to fingerprint {0:?}")]
    Io(PathBuf, #[source] io::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    /// Modification date (UTC), `YYYY-MM-DD`.
    pub date: String,
    /// Modification time (UTC), `HH:MM:SS`.
    pub time: String,
    pub size: u64,
    /// File name of the image.
    pub label: String,
    /// Leading hex digits of the SHA-256 digest.
    pub checksum: String,
}

impl Fingerprint {
    /// Fingerprint a local file. The label is the file name.
    pub fn of_file(path: &Path) -> Result<Self> {
        let io_err = |e| Error::Io(path.to_owned(), e);

        let metadata = fs::metadata(path).map_err(io_err)?;
        let mtime: DateTime<Utc> = metadata.modified().map_err(io_err)?.into();

        let mut file = File::open(path).map_err(io_err)?;
        let mut sink = DigestSink::new(Context::new(&SHA256));
        io::copy(&mut file, &mut sink).map_err(io_err)?;

        let digest = hex::encode(sink.finish());

        let label = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            date: mtime.format("%Y-%m-%d").to_string(),
            time: mtime.format("%H:%M:%S").to_string(),
            size: metadata.len(),
            label: label.replace(char::is_whitespace, "_"),
            checksum: digest[..CHECKSUM_DIGITS].to_owned(),
        })
    }

    /// Read a record file. A missing file is not an error.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(data) => data.parse().map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(path.to_owned(), e)),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, format!("{self}\n")).map_err(|e| Error::Io(path.to_owned(), e))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.date, self.time, self.size, self.label, self.checksum,
        )
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::Malformed(s.to_owned());

        let fields = s.split_whitespace().collect::<Vec<_>>();
        let [date, time, size, label, checksum] = fields[..] else {
            return Err(malformed());
        };

        Ok(Self {
            date: date.to_owned(),
            time: time.to_owned(),
            size: size.parse().map_err(|_| malformed())?,
            label: label.to_owned(),
            checksum: checksum.to_owned(),
        })
    }
}
