// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Device profile. Everything that is specific to one device model, like block
//! device paths, package names, and operator instructions, lives here instead
//! of in the code.

use std::{collections::BTreeMap, fs, io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patch::prop::{AnchorInsert, PropertyEdit};

/// Profile for the Meraki MC74, used when no `--config` is given.
pub static BUILTIN_PROFILE: &str = include_str!("../profiles/mc74.toml");

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read profile: {0:?}")]
    Read(String, #[source] io::Error),
    #[error("Failed to parse profile: {0:?}")]
    Parse(String, #[source] toml_edit::de::Error),
    #[error("Invalid profile: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tool {
    pub program: String,
    /// Arguments for a harmless invocation proving that the program runs.
    #[serde(default)]
    pub check: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tools {
    /// Device bridge for recovery and normal mode (`adb`).
    pub bridge: Tool,
    /// Bootloader tool (`fastboot`).
    pub bootloader: Tool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Poll {
    #[serde(default = "Poll::default_attempts")]
    pub attempts: u32,
    #[serde(default = "Poll::default_interval_secs")]
    pub interval_secs: u64,
}

impl Poll {
    fn default_attempts() -> u32 {
        12
    }

    fn default_interval_secs() -> u64 {
        5
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for Poll {
    fn default() -> Self {
        Self {
            attempts: Self::default_attempts(),
            interval_secs: Self::default_interval_secs(),
        }
    }
}

/// Instructions shown before transitions that need the operator's hands.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Prompts {
    pub power_on_recovery: String,
    pub reboot_to_recovery: String,
    pub power_on_normal: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Partitions {
    pub block_dir: String,
    pub default: String,
    /// Partitions holding boot images. Only these are unpacked and patched.
    #[serde(default)]
    pub boot: Vec<String>,
    /// Expected size of a boot partition dump.
    pub image_size: u64,
    /// Prefix for local image names, like `rmc` in `rmcBoot.img`.
    pub image_prefix: String,
    pub staging_dir: String,
    pub marker_dir: String,
    /// Shell commands to run before accessing `marker_dir`.
    #[serde(default)]
    pub marker_setup: Vec<String>,
    #[serde(default)]
    pub mirrors: BTreeMap<String, Vec<String>>,
}

impl Partitions {
    pub fn is_boot(&self, partition: &str) -> bool {
        self.boot.iter().any(|p| p == partition)
    }

    pub fn block_device(&self, partition: &str) -> String {
        format!("{}/{partition}", self.block_dir)
    }

    pub fn mirrors(&self, partition: &str) -> &[String] {
        self.mirrors.get(partition).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Recovery {
    /// Unrestricted recovery image, relative to the install directory.
    pub image: String,
    /// Bridge arguments whose output reveals the running recovery.
    pub check: Vec<String>,
    pub unrestricted_marker: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RamdiskRules {
    #[serde(default)]
    pub properties: Vec<PropertyEdit>,
    #[serde(default)]
    pub inserts: Vec<AnchorInsert>,
    #[serde(default)]
    pub clear_group_other_write: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Flash {
    /// Shell commands to run once the partition and its marker are written.
    #[serde(default)]
    pub post_shell: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Removal {
    pub args: Vec<String>,
    /// Output text meaning that there was nothing to remove.
    pub ignore: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstallFile {
    pub file: String,
    pub dest_dir: String,
    #[serde(default)]
    pub fixup: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstallLink {
    pub target: String,
    pub link: String,
    /// Where the original file is moved the first time.
    pub backup: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstallApp {
    pub file: String,
    pub package: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Install {
    #[serde(default)]
    pub removals: Vec<Removal>,
    #[serde(default)]
    pub files: Vec<InstallFile>,
    #[serde(default)]
    pub links: Vec<InstallLink>,
    #[serde(default)]
    pub apps: Vec<InstallApp>,
    /// Shell commands to run after everything is installed. Failures are only
    /// logged.
    #[serde(default)]
    pub post_shell: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Start {
    #[serde(default)]
    pub shell: Vec<String>,
    /// Shell command printing the Ethernet link line, like
    /// `link/ether e0:55:3d:50:56:10 brd ff:ff:ff:ff:ff:ff`. The MAC address
    /// is its second field.
    #[serde(default)]
    pub mac_command: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    pub name: String,
    pub tools: Tools,
    #[serde(default)]
    pub poll: Poll,
    pub prompts: Prompts,
    /// Bridge arguments that reboot a recovery lacking a `reboot` command.
    pub forced_reboot: Vec<String>,
    pub partitions: Partitions,
    pub recovery: Recovery,
    #[serde(default)]
    pub ramdisk: RamdiskRules,
    #[serde(default)]
    pub flash: Flash,
    #[serde(default)]
    pub install: Install,
    #[serde(default)]
    pub start: Start,
}

impl Profile {
    pub fn parse(data: &str, source: &str) -> Result<Self> {
        let profile: Self =
            toml_edit::de::from_str(data).map_err(|e| Error::Parse(source.to_owned(), e))?;
        profile.validate()?;

        Ok(profile)
    }

    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_PROFILE, "<builtin>")
    }

    /// Load a profile from `path`, or the built-in profile if [`None`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Self::builtin();
        };

        let source = path.display().to_string();
        let data = fs::read_to_string(path).map_err(|e| Error::Read(source.clone(), e))?;

        Self::parse(&data, &source)
    }

    fn validate(&self) -> Result<()> {
        if self.tools.bridge.program.is_empty() || self.tools.bootloader.program.is_empty() {
            return Err(Error::Invalid("Tool programs must not be empty".into()));
        }

        if self.poll.attempts == 0 {
            return Err(Error::Invalid("poll.attempts must be at least 1".into()));
        }

        if self.forced_reboot.is_empty() {
            return Err(Error::Invalid("forced_reboot must not be empty".into()));
        }

        for (partition, mirrors) in &self.partitions.mirrors {
            if mirrors.contains(partition) {
                return Err(Error::Invalid(format!(
                    "Partition {partition:?} lists itself as a mirror"
                )));
            }
        }

        Ok(())
    }

    /// Every file the objectives need from the install directory.
    pub fn install_files(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.recovery.image.as_str())
            .chain(self.install.files.iter().map(|f| f.file.as_str()))
            .chain(self.install.apps.iter().map(|a| a.file.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn builtin_profile() {
        let profile = Profile::builtin().unwrap();

        assert_eq!(profile.poll, Poll::default());
        assert_eq!(profile.partitions.image_size, 8 * 1024 * 1024);
        assert!(profile.partitions.is_boot("boot2"));
        assert_eq!(profile.partitions.mirrors("boot"), ["boot2"]);
        assert!(profile.partitions.mirrors("recovery").is_empty());
        assert_eq!(
            profile.partitions.block_device("boot"),
            "/dev/block/platform/sdhci.1/by-name/boot",
        );
        assert_eq!(profile.install_files().count(), 8);
    }

    #[test]
    fn zero_poll_attempts_rejected() {
        let data = BUILTIN_PROFILE.replace("attempts = 12", "attempts = 0");

        assert_matches!(
            Profile::parse(&data, "test"),
            Err(Error::Invalid(m)) if m.contains("poll.attempts")
        );
    }

    #[test]
    fn self_mirror_rejected() {
        let data = BUILTIN_PROFILE.replace(r#"boot = ["boot2"]"#, r#"boot = ["boot"]"#);

        assert_matches!(Profile::parse(&data, "test"), Err(Error::Invalid(_)));
    }
}
