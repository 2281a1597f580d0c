// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Line-oriented edits of text files inside a ramdisk, like `default.prop` and
//! `init.rc`. Every edit converges: applying it a second time is a no-op.

use std::str::{self, Utf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ramdisk::{self, RamdiskTree};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Ramdisk error")]
    Ramdisk(#[from] ramdisk::Error),
    #[error("{0:?} is not a UTF-8 text file")]
    NotText(String, #[source] Utf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Normalize CRLF line endings and strip trailing blank lines. Non-empty text
/// always ends with a single newline.
pub fn normalize(text: &str) -> String {
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect::<Vec<_>>();

    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }

    let mut result = lines.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }

    result
}

/// Replace the value token following `prefix` on the first line that starts
/// with `prefix` (ignoring indentation). The token is the run of
/// non-whitespace characters right after the prefix. Everything else on the
/// line is kept. Returns [`None`] if no line matches.
pub fn set_value(text: &str, prefix: &str, value: &str) -> Option<String> {
    let mut found = false;
    let mut result = String::with_capacity(text.len() + value.len());

    for line in text.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();

        match line[indent..].strip_prefix(prefix) {
            Some(rest) if !found => {
                let token_len = rest.find(char::is_whitespace).unwrap_or(rest.len());

                result.push_str(&line[..indent]);
                result.push_str(prefix);
                result.push_str(value);
                result.push_str(&rest[token_len..]);
                found = true;
            }
            _ => result.push_str(line),
        }
    }

    found.then_some(result)
}

/// Insert `new_line` right after the first line containing `anchor`. If a line
/// equal to `new_line` already exists, the text is returned unchanged. Returns
/// [`None`] if the anchor is missing.
pub fn insert_after(text: &str, anchor: &str, new_line: &str) -> Option<String> {
    if text.lines().any(|line| line == new_line) {
        return Some(text.to_owned());
    }

    let mut found = false;
    let mut result = String::with_capacity(text.len() + new_line.len() + 1);

    for line in text.split_inclusive('\n') {
        result.push_str(line);

        if !found && line.contains(anchor) {
            if !line.ends_with('\n') {
                result.push('\n');
            }
            result.push_str(new_line);
            result.push('\n');
            found = true;
        }
    }

    found.then_some(result)
}

/// Set a property-style value in a ramdisk file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PropertyEdit {
    pub file: String,
    /// Line prefix up to and including the separator, like `ro.secure=`.
    pub key: String,
    pub value: String,
}

/// Insert a fixed line after an anchor line in a ramdisk file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnchorInsert {
    pub file: String,
    pub anchor: String,
    pub line: String,
}

/// A single modification of a ramdisk tree. Problems that don't prevent the
/// ramdisk from working, like a key that isn't present, are returned as
/// warnings.
pub trait RamdiskPatch {
    fn patch(&self, tree: &mut RamdiskTree) -> Result<Vec<String>>;
}

fn edit_text(
    tree: &mut RamdiskTree,
    file: &str,
    edit: impl FnOnce(&str) -> Option<String>,
) -> Result<bool> {
    let entry = tree.entry_mut(file)?;
    let text = str::from_utf8(&entry.content).map_err(|e| Error::NotText(file.to_owned(), e))?;

    let Some(new_text) = edit(&normalize(text)) else {
        // Still normalize the file even if the edit didn't apply.
        entry.content = normalize(text).into_bytes();
        return Ok(false);
    };

    entry.content = new_text.into_bytes();

    Ok(true)
}

impl RamdiskPatch for PropertyEdit {
    fn patch(&self, tree: &mut RamdiskTree) -> Result<Vec<String>> {
        let found = edit_text(tree, &self.file, |text| {
            set_value(text, &self.key, &self.value)
        })?;

        if found {
            debug!("Set {}{} in {:?}", self.key, self.value, self.file);
            Ok(vec![])
        } else {
            let msg = format!("Key {:?} not found in {:?}", self.key, self.file);
            warn!("{msg}");
            Ok(vec![msg])
        }
    }
}

impl RamdiskPatch for AnchorInsert {
    fn patch(&self, tree: &mut RamdiskTree) -> Result<Vec<String>> {
        let found = edit_text(tree, &self.file, |text| {
            insert_after(text, &self.anchor, &self.line)
        })?;

        if found {
            debug!("Ensured {:?} follows {:?} in {:?}", self.line, self.anchor, self.file);
            Ok(vec![])
        } else {
            let msg = format!("Anchor {:?} not found in {:?}", self.anchor, self.file);
            warn!("{msg}");
            Ok(vec![msg])
        }
    }
}

/// Remove group and other write permission from a file. init ignores
/// `/default.prop` if it is writable by anyone but the owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClearGroupOtherWrite(pub String);

impl RamdiskPatch for ClearGroupOtherWrite {
    fn patch(&self, tree: &mut RamdiskTree) -> Result<Vec<String>> {
        let entry = tree.entry_mut(&self.0)?;
        entry.set_permissions(entry.permissions() & !0o022);

        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_PROP: &str = "\
# ADDITIONAL_DEFAULT_PROPERTIES\r
ro.secure=1 # keep\r
ro.allow.mock.location=0\r
persist.meraki.usb_debug=0\r
\r
\r
";

    #[test]
    fn normalize_line_endings() {
        assert_eq!(
            normalize(DEFAULT_PROP),
            "# ADDITIONAL_DEFAULT_PROPERTIES\n\
             ro.secure=1 # keep\n\
             ro.allow.mock.location=0\n\
             persist.meraki.usb_debug=0\n",
        );
        assert_eq!(normalize("\n\n"), "");
        assert_eq!(normalize("a\n\nb"), "a\n\nb\n");
    }

    #[test]
    fn set_value_keeps_other_lines() {
        let text = normalize(DEFAULT_PROP);
        let patched = set_value(&text, "ro.secure=", "0").unwrap();

        assert_eq!(patched.lines().count(), text.lines().count());
        for (old, new) in text.lines().zip(patched.lines()) {
            if old.starts_with("ro.secure=") {
                assert_eq!(new, "ro.secure=0 # keep");
            } else {
                assert_eq!(old, new);
            }
        }

        assert_eq!(set_value(&text, "ro.debuggable=", "1"), None);
    }

    #[test]
    fn set_value_empty_token() {
        assert_eq!(set_value("  a=\nb=2\n", "a=", "x").unwrap(), "  a=x\nb=2\n");
    }

    #[test]
    fn insert_after_is_idempotent() {
        let text = "on init\n    symlink /system/etc /etc\n    mkdir /data\n";
        let line = "    symlink /storage/emulated/legacy/ssm /ssm";

        let once = insert_after(text, "symlink /system/etc", line).unwrap();
        assert_eq!(
            once,
            "on init\n    symlink /system/etc /etc\n    \
             symlink /storage/emulated/legacy/ssm /ssm\n    mkdir /data\n",
        );

        let twice = insert_after(&once, "symlink /system/etc", line).unwrap();
        assert_eq!(once, twice);

        assert_eq!(insert_after(text, "missing", line), None);
    }
}
