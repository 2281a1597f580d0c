// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Named, idempotent units of work and the engine that runs them. Each
//! objective first checks whether its effect already holds. Only if it doesn't
//! are its prerequisites run, followed by its own action. Progress is
//! persisted as files (images, fingerprints) so that a later run resumes
//! where an earlier one stopped.

use std::{
    collections::HashMap,
    error, fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use regex::Regex;
use tempfile::NamedTempFile;
use thiserror::Error;
use topological_sort::TopologicalSort;
use tracing::{debug, info, info_span, warn};

use crate::{
    config::{InstallApp, Profile},
    device::{self, Console, ControllerConfig, DeviceController, Mode},
    executor::{self, Executor, Output},
    fingerprint::{self, Fingerprint},
    format::bootimage::{self, BootImage},
    patch::{self, prop},
    ramdisk, unpacked, util,
};

/// Present once the tool check has passed.
pub const TOOL_CHECK_FLAG: &str = "filesPresent.flag";

/// Bridge output proving that the device shell runs as root.
const ROOT_MARKER: &str = "(root)";
/// Start of the serial reported by the bootloader tool when the USB device
/// isn't accessible. Newer versions append an explanation.
const NO_PERMISSIONS: &str = "no permissions";
/// Shell outputs meaning that a path doesn't exist.
const NOT_FOUND_MARKER: &str = "No such file";
const EXISTS_MARKER: &str = "File exists";
const INSTALL_FAILURE_MARKER: &str = "Failure";
/// Block size for copying partitions on the device.
const DD_BLOCK_SIZE: u32 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
pub enum Objective {
    CheckTools,
    ReachBootloader,
    ReachRecovery,
    ReachNormal,
    ReplaceRecovery,
    BackupPartition,
    FixPartition,
    FlashPartition,
    InstallApps,
    StartServices,
    Revive,
}

impl Objective {
    pub const ALL: [Self; 11] = [
        Self::CheckTools,
        Self::ReachBootloader,
        Self::ReachRecovery,
        Self::ReachNormal,
        Self::ReplaceRecovery,
        Self::BackupPartition,
        Self::FixPartition,
        Self::FlashPartition,
        Self::InstallApps,
        Self::StartServices,
        Self::Revive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::CheckTools => "check-tools",
            Self::ReachBootloader => "reach-bootloader",
            Self::ReachRecovery => "reach-recovery",
            Self::ReachNormal => "reach-normal",
            Self::ReplaceRecovery => "replace-recovery",
            Self::BackupPartition => "backup-partition",
            Self::FixPartition => "fix-partition",
            Self::FlashPartition => "flash-partition",
            Self::InstallApps => "install-apps",
            Self::StartServices => "start-services",
            Self::Revive => "revive",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::CheckTools => "Check that the needed programs and install files are present",
            Self::ReachBootloader => "Get the device into bootloader mode",
            Self::ReachRecovery => "Get the device into recovery mode",
            Self::ReachNormal => "Get the device into normal operation",
            Self::ReplaceRecovery => "Flash the unrestricted recovery image",
            Self::BackupPartition => "Copy a partition from the device",
            Self::FixPartition => "Patch the boot image's ramdisk to allow root access",
            Self::FlashPartition => "Write the patched image to the device",
            Self::InstallApps => "Remove stock apps and install replacements",
            Self::StartServices => "Start the replacement services",
            Self::Revive => "Do everything needed to revive the device",
        }
    }

    pub fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::CheckTools | Self::ReachBootloader | Self::ReachRecovery | Self::ReachNormal => {
                &[]
            }
            Self::ReplaceRecovery => &[Self::ReachRecovery],
            Self::BackupPartition => &[Self::ReplaceRecovery],
            Self::FixPartition => &[Self::BackupPartition],
            Self::FlashPartition => &[Self::FixPartition],
            Self::InstallApps => &[Self::FlashPartition, Self::ReachNormal],
            Self::StartServices => &[Self::ReachNormal],
            Self::Revive => &[Self::FlashPartition, Self::InstallApps, Self::StartServices],
        }
    }

    /// All objectives with every prerequisite listed before its dependents.
    /// Fails if the dependency graph has a cycle.
    pub fn ordered() -> Result<Vec<Self>> {
        let mut graph = TopologicalSort::<Self>::new();

        for objective in Self::ALL {
            graph.insert(objective);

            for &prerequisite in objective.prerequisites() {
                graph.add_dependency(prerequisite, objective);
            }
        }

        let mut order = vec![];

        loop {
            let mut layer = graph.pop_all();
            if layer.is_empty() {
                break;
            }

            layer.sort();
            order.extend(layer);
        }

        if !graph.is_empty() {
            return Err(Error::DependencyCycle);
        }

        Ok(order)
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Boot image format error")]
    Format(#[from] bootimage::Error),
    #[error("Device did not reach {target} mode after {attempts} attempts")]
    ModeTimeout { target: Mode, attempts: u32 },
    #[error("Prerequisite {0} failed")]
    Prerequisite(Objective),
    #[error("Device command failed: {command}: {output}")]
    DeviceCommand { command: String, output: String },
    #[error("{0} reports no permissions for the USB device; rerun as root or fix the udev rules")]
    UsbPermission(String),
    #[error("Missing required tools or files: {}", .0.join("; "))]
    Configuration(Vec<String>),
    #[error("Objective dependency graph has a cycle")]
    DependencyCycle,
    #[error("Device error")]
    Device(#[source] device::Error),
    #[error("Failed to run command")]
    Executor(#[from] executor::Error),
    #[error("Ramdisk error")]
    Ramdisk(#[from] ramdisk::Error),
    #[error("Failed to patch ramdisk")]
    Patch(#[from] prop::Error),
    #[error("Failed to materialize boot image")]
    Unpacked(#[from] unpacked::Error),
    #[error("Fingerprint error")]
    Fingerprint(#[from] fingerprint::Error),
    #[error("{path:?} is {size} bytes, but should be {expected} bytes")]
    ImageSize {
        path: PathBuf,
        size: u64,
        expected: u64,
    },
    #[error("Path is not UTF-8: {0:?}")]
    PathNotUtf8(PathBuf),
    #[error("I/O error: {0:?}")]
    Io(PathBuf, #[source] io::Error),
}

impl From<device::Error> for Error {
    fn from(e: device::Error) -> Self {
        match e {
            device::Error::ModeTimeout { target, attempts } => Self::ModeTimeout { target, attempts },
            e => Self::Device(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Render an error and its sources as one line.
pub fn error_chain(e: &dyn error::Error) -> String {
    let mut line = e.to_string();
    let mut source = e.source();

    while let Some(e) = source {
        line.push_str(": ");
        line.push_str(&e.to_string());
        source = e.source();
    }

    line
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| Error::PathNotUtf8(path.to_owned()))
}

const LS_SIZE_DATE_REGEX: &str =
    r"(?m)[ \t]([0-9]+)[ \t]+([0-9]{4}-[0-9]{2}-[0-9]{2})[ \t]+[0-9]{2}:[0-9]{2}[ \t]+[^ \t\r\n]+\r?$";

/// Parse the size and date of the first file in toolbox `ls -l` output:
/// `-rw-r--r-- system system 1855043 2021-05-12 10:20 ribo.ssm-1.apk`.
fn parse_ls_size_date(output: &str) -> Option<(u64, String)> {
    let regex = Regex::new(LS_SIZE_DATE_REGEX).unwrap();
    let captures = regex.captures(output)?;

    let size = captures[1].parse().ok()?;

    Some((size, captures[2].to_owned()))
}

/// Run options that apply to the whole invocation.
#[derive(Clone, Debug)]
pub struct Options {
    /// Partition to operate on. Defaults to the profile's default partition.
    pub partition: Option<String>,
    /// Image to flash instead of the patched image.
    pub image: Option<PathBuf>,
    /// Skip the requested objective's own "already done" check.
    pub force: bool,
    /// Don't write the partition's mirrors.
    pub no_mirror: bool,
    /// Reach the device over the network at this host (and optional port).
    pub host: Option<String>,
    pub work_dir: PathBuf,
    pub install_dir: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            partition: None,
            image: None,
            force: false,
            no_mirror: false,
            host: None,
            work_dir: PathBuf::from("."),
            install_dir: PathBuf::from("installFiles"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectiveResult {
    pub succeeded: bool,
    /// Diagnostics in the order the failures happened.
    pub errors: Vec<String>,
}

pub struct Engine<E, C> {
    device: DeviceController<E, C>,
    profile: Profile,
    options: Options,
    target: Option<Objective>,
    completed: HashMap<Objective, bool>,
    errors: Vec<String>,
    mac: Option<String>,
}

impl<E: Executor, C: Console> Engine<E, C> {
    pub fn new(executor: E, console: C, profile: Profile, options: Options) -> Self {
        let config = ControllerConfig::from(&profile);

        Self {
            device: DeviceController::new(executor, console, config),
            profile,
            options,
            target: None,
            completed: HashMap::new(),
            errors: vec![],
            mac: None,
        }
    }

    pub fn device(&self) -> &DeviceController<E, C> {
        &self.device
    }

    /// Ethernet MAC address, once `start-services` has seen it.
    pub fn mac(&self) -> Option<&str> {
        self.mac.as_deref()
    }

    pub fn into_device(self) -> DeviceController<E, C> {
        self.device
    }

    /// Run `target` and everything it needs. The tool check runs first unless
    /// it has passed in an earlier run.
    pub fn run(&mut self, target: Objective) -> ObjectiveResult {
        self.target = Some(target);

        let mut succeeded = true;

        if let Some(host) = self.options.host.clone()
            && let Err(e) = self.device.connect(&host)
        {
            let line = format!("connect: {}", error_chain(&e));
            warn!("{line}");
            self.errors.push(line);
            succeeded = false;
        }

        if succeeded && target != Objective::CheckTools && !self.tool_check_flag().exists() {
            succeeded = self.invoke(Objective::CheckTools).is_ok();
        }

        if succeeded {
            succeeded = self.invoke(target).is_ok();
        }

        ObjectiveResult {
            succeeded,
            errors: std::mem::take(&mut self.errors),
        }
    }

    /// Run an objective at most once per engine.
    fn invoke(&mut self, objective: Objective) -> Result<()> {
        if let Some(&succeeded) = self.completed.get(&objective) {
            return if succeeded {
                Ok(())
            } else {
                Err(Error::Prerequisite(objective))
            };
        }

        let span = info_span!("objective", name = %objective);
        let _guard = span.enter();

        let result = self.execute(objective);

        if let Err(e) = &result {
            let line = format!("{objective}: {}", error_chain(e));
            warn!("{line}");
            self.errors.push(line);
        }

        self.completed.insert(objective, result.is_ok());

        result
    }

    fn execute(&mut self, objective: Objective) -> Result<()> {
        let forced = self.options.force && self.target == Some(objective);

        if forced {
            debug!("Skipping completion check");
        } else if self.is_done(objective)? {
            info!("Already done");
            return Ok(());
        }

        for &prerequisite in objective.prerequisites() {
            self.invoke(prerequisite)
                .map_err(|_| Error::Prerequisite(prerequisite))?;
        }

        self.perform(objective)?;

        info!("Done");

        Ok(())
    }

    /// Check whether an objective's effect already holds.
    fn is_done(&mut self, objective: Objective) -> Result<bool> {
        match objective {
            Objective::CheckTools => Ok(self.tool_check_flag().exists()),
            Objective::ReachBootloader => Ok(self.device.query_mode()? == Mode::Bootloader),
            Objective::ReachRecovery => Ok(self.device.query_mode()? == Mode::Recovery),
            Objective::ReachNormal => Ok(self.device.query_mode()? == Mode::Normal),
            Objective::ReplaceRecovery => self.recovery_replaced(),
            Objective::BackupPartition => self.backup_present(),
            Objective::FixPartition => self.fix_current(),
            Objective::FlashPartition => {
                if self.device.query_mode()?.has_bridge() {
                    self.flash_marker_matches()
                } else {
                    Ok(false)
                }
            }
            Objective::InstallApps | Objective::StartServices | Objective::Revive => Ok(false),
        }
    }

    fn perform(&mut self, objective: Objective) -> Result<()> {
        match objective {
            Objective::CheckTools => self.check_tools(),
            Objective::ReachBootloader => Ok(self.device.ensure_mode(Mode::Bootloader)?),
            Objective::ReachRecovery => Ok(self.device.ensure_mode(Mode::Recovery)?),
            Objective::ReachNormal => Ok(self.device.ensure_mode(Mode::Normal)?),
            Objective::ReplaceRecovery => self.replace_recovery(),
            Objective::BackupPartition => self.backup_partition(),
            Objective::FixPartition => self.fix_partition(),
            Objective::FlashPartition => self.flash_partition(),
            Objective::InstallApps => self.install_apps(),
            Objective::StartServices => self.start_services(),
            Objective::Revive => {
                let serial = self.device.state().serial.as_deref().unwrap_or("unknown");
                info!("Device {serial} revived");
                Ok(())
            }
        }
    }

    // Paths.

    pub fn tool_check_flag(&self) -> PathBuf {
        self.options.work_dir.join(TOOL_CHECK_FLAG)
    }

    fn partition(&self) -> &str {
        self.options
            .partition
            .as_deref()
            .unwrap_or(&self.profile.partitions.default)
    }

    fn is_boot(&self) -> bool {
        self.profile.partitions.is_boot(self.partition())
    }

    /// Image name stem, like `rmcBoot`.
    fn image_stem(&self) -> String {
        format!(
            "{}{}",
            self.profile.partitions.image_prefix,
            util::capitalize(self.partition()),
        )
    }

    fn work_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.options.work_dir.join(name)
    }

    /// Partition dump. Boot images are patched into a separate file, so their
    /// dumps get a distinct extension.
    fn raw_image(&self) -> PathBuf {
        let ext = if self.is_boot() { "imgRaw" } else { "img" };
        self.work_path(format!("{}.{ext}", self.image_stem()))
    }

    /// Copy of the very first dump. Never overwritten.
    fn orig_image(&self) -> PathBuf {
        self.work_path(format!("{}.imgOrig", self.image_stem()))
    }

    fn patched_image(&self) -> PathBuf {
        self.work_path(format!("{}.img", self.image_stem()))
    }

    /// Fingerprint of the dump that the patched image was built from.
    fn patched_source_record(&self) -> PathBuf {
        self.work_path(format!("{}.img.source", self.image_stem()))
    }

    fn unpack_dir(&self) -> PathBuf {
        self.work_path(format!("{}Unpack", self.image_stem()))
    }

    fn ramdisk_dir(&self) -> PathBuf {
        self.work_path(format!("{}Ramdisk", self.image_stem()))
    }

    fn flash_image(&self) -> PathBuf {
        match &self.options.image {
            Some(image) => image.clone(),
            None => self.patched_image(),
        }
    }

    fn marker_name(&self) -> String {
        format!("{}.versionDate", self.partition())
    }

    /// Local copy of the marker written by the last flash.
    fn flash_record(&self) -> PathBuf {
        self.work_path(self.marker_name())
    }

    fn device_marker(&self) -> String {
        format!("{}/{}", self.profile.partitions.marker_dir, self.marker_name())
    }

    fn staging_path(&self, path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        format!("{}/{name}", self.profile.partitions.staging_dir)
    }

    // Device command helpers.

    fn check(cmd: &[&str], output: Output) -> Result<Output> {
        if output.success() {
            Ok(output)
        } else {
            Err(Error::DeviceCommand {
                command: executor::display_command(cmd),
                output: output.text.trim().to_owned(),
            })
        }
    }

    fn bridge_checked(&mut self, args: &[&str]) -> Result<Output> {
        let output = self.device.bridge(args)?;
        Self::check(args, output)
    }

    fn shell_checked(&mut self, command: &str) -> Result<Output> {
        let output = self.device.shell(command)?;
        Self::check(&["shell", command], output)
    }

    /// Run a command whose failure is fine if the output contains `ignore`.
    fn bridge_ignoring(&mut self, args: &[&str], ignore: &str) -> Result<Output> {
        let output = self.device.bridge(args)?;
        if output.contains(ignore) {
            debug!("Ignoring expected outcome: {}", output.text.trim());
            return Ok(output);
        }

        Self::check(args, output)
    }

    // check-tools

    fn check_tools(&mut self) -> Result<()> {
        let mut missing = vec![];
        let tools = [
            self.profile.tools.bridge.clone(),
            self.profile.tools.bootloader.clone(),
        ];

        for tool in tools {
            let executor = self.device.executor_mut();

            let Some(path) = executor.locate(&tool.program) else {
                missing.push(format!("Program not found on PATH: {}", tool.program));
                continue;
            };
            debug!("Found {} at {path:?}", tool.program);

            let mut cmd = vec![tool.program.as_str()];
            cmd.extend(tool.check.iter().map(String::as_str));

            if let Err(e) = executor.run(&cmd, None) {
                missing.push(format!("Program cannot be run: {}: {}", tool.program, error_chain(&e)));
            }
        }

        for file in self.profile.install_files() {
            let path = self.options.install_dir.join(file);
            if !path.is_file() {
                missing.push(format!("File not found: {path:?}"));
            }
        }

        if !missing.is_empty() {
            return Err(Error::Configuration(missing));
        }

        let flag = self.tool_check_flag();
        fs::write(&flag, "").map_err(|e| Error::Io(flag, e))?;

        Ok(())
    }

    // replace-recovery

    fn recovery_replaced(&mut self) -> Result<bool> {
        if self.device.query_mode()? != Mode::Recovery {
            return Ok(false);
        }

        let check = self.profile.recovery.check.clone();
        let args = check.iter().map(String::as_str).collect::<Vec<_>>();
        let output = self.device.bridge(&args)?;

        Ok(output.contains(&self.profile.recovery.unrestricted_marker))
    }

    fn replace_recovery(&mut self) -> Result<()> {
        if self.recovery_replaced()? {
            info!("Recovery is already unrestricted");
            return Ok(());
        }

        self.device.ensure_mode(Mode::Bootloader)?;

        let serial = self.device.state().serial.as_deref().unwrap_or_default();
        if serial.starts_with(NO_PERMISSIONS) {
            return Err(Error::UsbPermission(
                self.profile.tools.bootloader.program.clone(),
            ));
        }

        let image = self.options.install_dir.join(&self.profile.recovery.image);
        let args = ["flash", "recovery", path_str(&image)?];

        info!("Flashing recovery image: {image:?}");
        let output = self.device.bootloader(&args)?;
        Self::check(&args, output)?;

        self.device.ensure_mode(Mode::Recovery)?;

        Ok(())
    }

    // backup-partition

    fn backup_present(&self) -> Result<bool> {
        let path = self.raw_image();

        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::Io(path, e)),
        };

        Ok(!self.is_boot() || metadata.len() == self.profile.partitions.image_size)
    }

    fn backup_partition(&mut self) -> Result<()> {
        self.device.ensure_bridge()?;

        let output = self.device.shell("id")?;
        if !output.contains(ROOT_MARKER) {
            return Err(Error::DeviceCommand {
                command: "shell id".into(),
                output: format!("Device shell is not running as root: {}", output.text.trim()),
            });
        }

        let partition = self.partition().to_owned();
        let block = self.profile.partitions.block_device(&partition);
        let raw = self.raw_image();
        let staged = self.staging_path(&raw);

        info!("Backing up {block} to {raw:?}");

        self.shell_checked(&format!("dd if={block} of={staged} ibs={DD_BLOCK_SIZE}"))?;

        // The staged copy is removed even if the pull failed.
        let pulled = path_str(&raw).and_then(|dest| self.bridge_checked(&["pull", &staged, dest]));
        let removed = self.shell_checked(&format!("rm {staged}"));
        pulled?;
        removed?;

        let size = fs::metadata(&raw)
            .map_err(|e| Error::Io(raw.clone(), e))?
            .len();

        if !self.is_boot() {
            return Ok(());
        }

        let expected = self.profile.partitions.image_size;
        if size != expected {
            return Err(Error::ImageSize {
                path: raw,
                size,
                expected,
            });
        }

        let orig = self.orig_image();
        if !orig.exists() {
            fs::copy(&raw, &orig).map_err(|e| Error::Io(orig.clone(), e))?;
            info!("Saved pristine copy: {orig:?}");
        }

        Ok(())
    }

    // fix-partition

    fn fix_current(&self) -> Result<bool> {
        if self.options.image.is_some() {
            debug!("Flashing an explicit image; nothing to patch");
            return Ok(true);
        }

        // Other partitions are flashed as backed up, but the backup itself
        // still needs to happen.
        if !self.is_boot() {
            return Ok(false);
        }

        let raw = self.raw_image();
        if !self.patched_image().exists() || !raw.exists() {
            return Ok(false);
        }

        let Some(source) = Fingerprint::read(&self.patched_source_record())? else {
            return Ok(false);
        };

        Ok(source == Fingerprint::of_file(&raw)?)
    }

    fn fix_partition(&mut self) -> Result<()> {
        if !self.is_boot() {
            debug!("{} is not a boot partition", self.partition());
            return Ok(());
        }

        let raw = self.raw_image();
        let data = fs::read(&raw).map_err(|e| Error::Io(raw.clone(), e))?;
        let image = BootImage::unpack(&data)?;

        debug!("Unpacked {raw:?}: {image:?}");

        let unpack_dir = self.unpack_dir();
        let ramdisk_dir = self.ramdisk_dir();

        unpacked::save(&image, &unpack_dir, &ramdisk_dir)?;

        let mut tree = unpacked::load_ramdisk(&unpack_dir, &ramdisk_dir)?;
        for warning in patch::apply_rules(&mut tree, &self.profile.ramdisk)? {
            warn!("{warning}");
        }
        unpacked::save_ramdisk(&tree, &unpack_dir, &ramdisk_dir)?;

        let patched = unpacked::load(&unpack_dir, &ramdisk_dir)?;
        let data = patched.pack_to_size(self.profile.partitions.image_size)?;

        let output = self.patched_image();
        let mut temp = NamedTempFile::new_in(&self.options.work_dir)
            .map_err(|e| Error::Io(self.options.work_dir.clone(), e))?;
        temp.write_all(&data).map_err(|e| Error::Io(temp.path().to_owned(), e))?;
        temp.persist(&output)
            .map_err(|e| Error::Io(output.clone(), e.error))?;

        Fingerprint::of_file(&raw)?.write(&self.patched_source_record())?;

        info!("Patched image written to {output:?}");

        Ok(())
    }

    // flash-partition

    /// Read the marker left on the device by the last flash.
    fn read_device_marker(&mut self) -> Result<Option<Fingerprint>> {
        for command in self.profile.partitions.marker_setup.clone() {
            self.device.shell(&command)?;
        }

        let output = self.device.shell(&format!("cat {}", self.device_marker()))?;
        if !output.success() {
            return Ok(None);
        }

        match output.text.lines().next().map(str::parse::<Fingerprint>) {
            Some(Ok(fp)) => Ok(Some(fp)),
            Some(Err(e)) => {
                debug!("Ignoring device marker: {e}");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn flash_marker_matches(&mut self) -> Result<bool> {
        let image = self.flash_image();
        if !image.exists() {
            return Ok(false);
        }

        let local = Fingerprint::of_file(&image)?;

        // An image that differs from the last one flashed from here needs no
        // device round trip to tell.
        if let Some(recorded) = Fingerprint::read(&self.flash_record())?
            && recorded != local
        {
            debug!("Last flashed image: {recorded}");
            return Ok(false);
        }

        let remote = self.read_device_marker()?;

        debug!("Local fingerprint: {local}");
        debug!("Device fingerprint: {remote:?}");

        Ok(remote.as_ref() == Some(&local))
    }

    fn flash_partition(&mut self) -> Result<()> {
        let image = self.flash_image();
        if !image.is_file() {
            return Err(Error::Io(
                image,
                io::Error::new(io::ErrorKind::NotFound, "Image to flash not found"),
            ));
        }

        self.device.ensure_bridge()?;

        let forced = self.options.force && self.target == Some(Objective::FlashPartition);
        if !forced && self.flash_marker_matches()? {
            info!("Device already has {image:?}");
            return Ok(());
        }

        let partition = self.partition().to_owned();
        let mut targets = vec![partition.clone()];
        if !self.options.no_mirror {
            targets.extend_from_slice(self.profile.partitions.mirrors(&partition));
        }

        let staged = self.staging_path(&image);

        self.bridge_checked(&["push", path_str(&image)?, &staged])?;

        for target in &targets {
            let block = self.profile.partitions.block_device(target);
            info!("Writing {image:?} to {block}");
            self.shell_checked(&format!("dd if={staged} of={block} ibs={DD_BLOCK_SIZE}"))?;
        }

        self.shell_checked(&format!("rm {staged}"))?;

        let fp = Fingerprint::of_file(&image)?;
        fp.write(&self.flash_record())?;

        for command in self.profile.partitions.marker_setup.clone() {
            self.device.shell(&command)?;
        }

        let marker = self.device_marker();
        self.shell_checked(&format!("echo {fp} > {marker}"))?;

        let readback = self.device.shell(&format!("cat {marker}"))?;
        if readback.text.trim() != fp.to_string() {
            warn!("Marker readback mismatch: {:?}", readback.text.trim());
        }

        for command in self.profile.flash.post_shell.clone() {
            let output = self.device.shell(&command)?;
            if !output.success() {
                warn!("Post-flash command failed: {command}: {}", output.text.trim());
            }
        }

        Ok(())
    }

    // install-apps

    fn app_is_current(&mut self, app: &InstallApp, local: &Path) -> Result<bool> {
        let local_fp = Fingerprint::of_file(local)?;

        let output = self
            .device
            .shell(&format!("ls -l /data/app/{}*", app.package))?;
        let Some((size, date)) = parse_ls_size_date(&output.text) else {
            return Ok(false);
        };

        debug!("Installed {}: {size} bytes from {date}", app.package);

        Ok(local_fp.size == size && local_fp.date <= date)
    }

    fn install_apps(&mut self) -> Result<()> {
        let install = self.profile.install.clone();

        for removal in &install.removals {
            let args = removal.args.iter().map(String::as_str).collect::<Vec<_>>();
            self.bridge_ignoring(&args, &removal.ignore)?;
        }

        for file in &install.files {
            let local = self.options.install_dir.join(&file.file);
            let dest = format!("{}/{}", file.dest_dir, file.file);

            info!("Installing file: {dest}");
            self.bridge_checked(&["push", path_str(&local)?, &dest])?;

            if let Some(fixup) = &file.fixup {
                self.shell_checked(&format!("{fixup} {dest}"))?;
            }
        }

        for link in &install.links {
            let output = self.device.shell(&format!("ls {}", link.backup))?;
            if output.contains(NOT_FOUND_MARKER) {
                self.shell_checked(&format!("mv {} {}", link.link, link.backup))?;
            }

            self.bridge_ignoring(
                &["shell", &format!("ln -s {} {}", link.target, link.link)],
                EXISTS_MARKER,
            )?;
        }

        for app in &install.apps {
            let local = self.options.install_dir.join(&app.file);

            if self.app_is_current(app, &local)? {
                info!("Installed {} is current", app.package);
                continue;
            }

            info!("Installing app: {}", app.package);
            let args = ["install", "-t", "-r", path_str(&local)?];
            let output = self.bridge_checked(&args)?;

            if output.contains(INSTALL_FAILURE_MARKER) {
                return Err(Error::DeviceCommand {
                    command: executor::display_command(&args),
                    output: output.text.trim().to_owned(),
                });
            }
        }

        for command in &install.post_shell {
            let output = self.device.shell(command)?;
            if !output.success() {
                debug!("Post-install command failed: {command}: {}", output.text.trim());
            }
        }

        Ok(())
    }

    // start-services

    fn start_services(&mut self) -> Result<()> {
        for command in self.profile.start.shell.clone() {
            self.shell_checked(&command)?;
        }

        if let Some(command) = self.profile.start.mac_command.clone() {
            let output = self.device.shell(&command)?;
            self.mac = output.text.split_whitespace().nth(1).map(str::to_owned);

            if self.mac.is_none() {
                warn!("No MAC address in output: {:?}", output.text.trim());
            }
        }

        let serial = self.device.state().serial.as_deref().unwrap_or("unknown");
        let mac = self.mac.as_deref().unwrap_or("unknown");
        info!("Device serial {serial}, MAC {mac}");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisites_before_dependents() {
        let order = Objective::ordered().unwrap();
        assert_eq!(order.len(), Objective::ALL.len());

        let position = |o| order.iter().position(|x| *x == o).unwrap();

        for objective in Objective::ALL {
            for &prerequisite in objective.prerequisites() {
                assert!(position(prerequisite) < position(objective));
            }
        }

        assert_eq!(order.last(), Some(&Objective::Revive));
    }

    #[test]
    fn names_match_cli_values() {
        for objective in Objective::ALL {
            let value = objective.to_possible_value().unwrap();
            assert_eq!(value.get_name(), objective.name());
        }
    }

    #[test]
    fn ls_output() {
        let output = "-rw-r--r-- system   system    1855043 2021-05-12 10:20 ribo.ssm-1.apk\n";
        assert_eq!(
            parse_ls_size_date(output),
            Some((1855043, "2021-05-12".to_owned())),
        );
        assert_eq!(
            parse_ls_size_date("/data/app/ribo.ssm*: No such file or directory\n"),
            None,
        );
    }

    #[test]
    fn chain_includes_sources() {
        let e = Error::Device(device::Error::UnsupportedTransition {
            from: Mode::Unknown,
            to: Mode::Bootloader,
        });

        assert_eq!(
            error_chain(&e),
            "Device error: Don't know how to switch from unknown mode to bootloader mode",
        );
    }
}
