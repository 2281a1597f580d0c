// SPDX-FileCopyrightText: 2023-2024 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fmt,
    ops::{Bound, RangeBounds},
    path::Path,
};

use num_traits::PrimInt;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{value} not in range {start}..{end}")]
pub struct OutOfBoundsError {
    value: String,
    start: String,
    end: String,
}

/// Ensure that `value` is within `range`. The error message includes the
/// bounds so that callers only need to add the field name.
pub fn check_bounds<T, R>(value: T, range: R) -> Result<T, OutOfBoundsError>
where
    T: PartialOrd + fmt::Display,
    R: RangeBounds<T>,
{
    if range.contains(&value) {
        return Ok(value);
    }

    let start = match range.start_bound() {
        Bound::Included(v) => v.to_string(),
        Bound::Excluded(v) => format!("({v})"),
        Bound::Unbounded => String::new(),
    };
    let end = match range.end_bound() {
        Bound::Included(v) => format!("={v}"),
        Bound::Excluded(v) => v.to_string(),
        Bound::Unbounded => String::new(),
    };

    Err(OutOfBoundsError {
        value: value.to_string(),
        start,
        end,
    })
}

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes<T: PrimInt>(pub T);

impl<T: PrimInt + fmt::Debug> fmt::Debug for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "<{:?} byte>", self.0)
        } else {
            write!(f, "<{:?} bytes>", self.0)
        }
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Uppercase the first character. Used for building image names like
/// `rmcBoot` from a partition name.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn bounds() {
        assert_eq!(check_bounds(5u32, ..=5).unwrap(), 5);
        assert_eq!(
            check_bounds(6u32, ..=5).unwrap_err().to_string(),
            "6 not in range ..=5",
        );
        assert_eq!(
            check_bounds(1u32, 2..4).unwrap_err().to_string(),
            "1 not in range 2..4",
        );
    }

    #[test]
    fn parent() {
        assert_eq!(parent_path(Path::new("a/b")), Path::new("a"));
        assert_eq!(parent_path(Path::new("b")), Path::new("."));
    }

    #[test]
    fn capitalize_names() {
        assert_eq!(capitalize("boot2"), "Boot2");
        assert_eq!(capitalize(""), "");
    }
}
