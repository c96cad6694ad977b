//! Collision-free naming for containers, side files and extraction directories
//!
//! Every allocator only returns paths that do not exist at call time. Nothing is
//! reserved on disk, so two jobs racing for the same name are the caller's problem.

use rand::Rng;
use std::{
    ffi::{OsStr, OsString},
    fs, io,
    path::{Path, PathBuf},
};

/// Default container extension
pub const CONTAINER_SUFFIX: &str = ".pack";
/// Temporary archive extension used while packing a directory
pub const TEMP_ARCHIVE_SUFFIX: &str = ".temp";
/// External IV side file extension
pub const IV_KEY_SUFFIX: &str = ".ivkey";
/// Recovery key side file extension
pub const RECOVERY_KEY_SUFFIX: &str = ".rkey";
/// Suffix of the directory a container is decrypted into
pub const EXTRACTION_SUFFIX: &str = "_unpacked";

const RANDOM_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RANDOM_SUFFIX_LEN: usize = 5;

fn concat(parts: &[&OsStr]) -> OsString {
    let mut name = OsString::new();
    for part in parts {
        name.push(part);
    }
    name
}

fn split_name(path: &Path) -> (OsString, Option<OsString>) {
    let stem = path
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    let extension = path.extension().map(|ext| concat(&[OsStr::new("."), ext]));
    (stem, extension)
}

/// Append `suffix` to the full path without touching its existing extension.
pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(concat(&[path.as_os_str(), OsStr::new(suffix)]))
}

/// Give `path` a final component to derive names from.
///
/// Paths such as `.` or `dir/..` have no file name; they are resolved to their
/// canonical form. Anything else is returned as is.
pub fn named_path(path: &Path) -> io::Result<PathBuf> {
    if path.file_name().is_some() {
        return Ok(path.to_path_buf());
    }
    fs::canonicalize(path)
}

/// Allocate an output path derived from an existing file or directory.
///
/// For a file `dir/name.ext` the first choice is `dir/name.ext<suffix>`, then
/// `dir/name (1).ext<suffix>`, `dir/name (2).ext<suffix>` and so on.
///
/// For a directory `dir` the output lives *inside* it: `dir/<dirname><suffix>`,
/// then `dir/<dirname> (1)<suffix>` and so on.
pub fn unique_output_path(path: &Path, suffix: &str) -> PathBuf {
    if !path.is_dir() {
        return unique_file_output(path, suffix);
    }

    let base = path.file_name().map(OsStr::to_os_string).unwrap_or_default();
    let first = path.join(concat(&[&base, OsStr::new(suffix)]));
    if !first.exists() {
        return first;
    }

    let mut counter = 1u32;
    loop {
        let candidate = path.join(concat(&[
            &base,
            OsStr::new(&format!(" ({})", counter)),
            OsStr::new(suffix),
        ]));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// File rule of [`unique_output_path`], applied whatever `path` currently is.
pub fn unique_file_output(path: &Path, suffix: &str) -> PathBuf {
    let first = append_suffix(path, suffix);
    if !first.exists() {
        return first;
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let (stem, extension) = split_name(path);
    let extension = extension.unwrap_or_default();
    let mut counter = 1u32;
    loop {
        let candidate = parent.join(concat(&[
            &stem,
            OsStr::new(&format!(" ({})", counter)),
            &extension,
            OsStr::new(suffix),
        ]));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Allocate a sibling key file next to `path`.
///
/// The first choice is `<path>_<suffix>` (so `secret.txt` with `.rkey` gives
/// `secret.txt_.rkey`); after that `secret_1.txt.rkey`, `secret_2.txt.rkey`, ...
pub fn unique_key_path(path: &Path, suffix: &str) -> PathBuf {
    let first = append_suffix(path, &format!("_{}", suffix));
    if !first.exists() {
        return first;
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let (stem, extension) = split_name(path);
    let extension = extension.unwrap_or_default();
    let mut counter = 1u32;
    loop {
        let candidate = parent.join(concat(&[
            &stem,
            OsStr::new(&format!("_{}", counter)),
            &extension,
            OsStr::new(suffix),
        ]));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Path of the external IV file for a container base path.
///
/// Prefers `<base>.ivkey` and falls back to [`unique_key_path`] on collision.
pub fn iv_key_path(base: &Path) -> PathBuf {
    let preferred = append_suffix(base, IV_KEY_SUFFIX);
    if preferred.exists() {
        unique_key_path(base, IV_KEY_SUFFIX)
    } else {
        preferred
    }
}

/// Strip the container suffix from a path, if present.
pub fn container_base(container: &Path) -> PathBuf {
    match container
        .file_name()
        .and_then(OsStr::to_str)
        .and_then(|name| name.strip_suffix(CONTAINER_SUFFIX))
    {
        Some(stem) if !stem.is_empty() => container.with_file_name(stem),
        _ => container.to_path_buf(),
    }
}

/// Random string of lowercase letters and digits.
pub fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| RANDOM_CHARSET[rng.gen_range(0..RANDOM_CHARSET.len())] as char)
        .collect()
}

/// Allocate the directory a container is decrypted into.
///
/// `parent/<base>_unpacked`, or `parent/<base>_unpacked;<5 random chars>` while taken.
pub fn unique_extraction_dir(parent: &Path, base: &OsStr) -> PathBuf {
    let name = concat(&[base, OsStr::new(EXTRACTION_SUFFIX)]);
    let mut candidate = parent.join(&name);
    while candidate.exists() {
        let random = format!(";{}", random_suffix(RANDOM_SUFFIX_LEN));
        candidate = parent.join(concat(&[&name, OsStr::new(&random)]));
    }
    candidate
}
