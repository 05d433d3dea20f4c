//! Utility functions for filenames, directories and disk space

use crate::config::{GB, KB, MAX_FILENAME_BYTES, MB};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Characters that are invalid in filenames on at least one supported platform
const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum number of entries returned by [`list_directories`]
pub const MAX_DIRECTORY_ENTRIES: usize = 50;

/// Size bands used to pick a write chunk size: `(upper bound, chunk size)`
const CHUNK_SIZE_BANDS: [(u64, usize); 7] = [
    (MB, 32 * KB as usize),
    (10 * MB, 128 * KB as usize),
    (50 * MB, 512 * KB as usize),
    (100 * MB, MB as usize),
    (250 * MB, 2 * MB as usize),
    (500 * MB, 4 * MB as usize),
    (GB, 8 * MB as usize),
];

/// Chunk size for files above the largest band
const LARGE_FILE_CHUNK_SIZE: usize = 16 * MB as usize;

/// Baseline size assumed when the server does not announce a length
pub const UNKNOWN_SIZE_BASELINE: u64 = 50 * MB;

/// Pick the write chunk size for a file of the given size
///
/// Unknown sizes use the band of [`UNKNOWN_SIZE_BASELINE`].
pub fn chunk_size_for(size: Option<u64>) -> usize {
    let size = size.unwrap_or(UNKNOWN_SIZE_BASELINE);
    CHUNK_SIZE_BANDS
        .iter()
        .find(|(upper, _)| size < *upper)
        .map(|(_, chunk)| *chunk)
        .unwrap_or(LARGE_FILE_CHUNK_SIZE)
}

/// Remove characters that are invalid in filenames and trim surrounding whitespace and dots
///
/// # Examples
///
/// ```
/// use bunkr_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("a/b:c?.mp4"), "abc.mp4");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !INVALID_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect();
    cleaned.trim().trim_end_matches('.').trim().to_string()
}

/// Truncate a filename to at most `max_bytes` bytes, keeping its extension
///
/// The cut always lands on a UTF-8 character boundary, so multi-byte names
/// never produce invalid strings. Extensions longer than half the budget are
/// treated as part of the stem.
pub fn truncate_filename(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    let (stem, extension) = match name.rfind('.') {
        Some(idx) if idx > 0 && name.len() - idx <= max_bytes / 2 => name.split_at(idx),
        _ => (name, ""),
    };

    let budget = max_bytes.saturating_sub(extension.len());
    let mut cut = budget.min(stem.len());
    while cut > 0 && !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}{}", stem[..cut].trim_end(), extension)
}

/// Sanitize and truncate a filename with the default byte limit
pub fn safe_filename(name: &str) -> String {
    truncate_filename(&sanitize_filename(name), MAX_FILENAME_BYTES)
}

/// `name` with ` (n)` inserted before its extension, kept within `max_bytes`
///
/// The stem is shortened first so the counter always survives truncation.
///
/// ```
/// use bunkr_dl::utils::numbered_filename;
///
/// assert_eq!(numbered_filename("photo.jpg", 2, 120), "photo (2).jpg");
/// assert_eq!(numbered_filename("README", 3, 120), "README (3)");
/// ```
pub fn numbered_filename(name: &str, n: usize, max_bytes: usize) -> String {
    let counter = format!(" ({})", n);
    let shortened = truncate_filename(name, max_bytes.saturating_sub(counter.len()));
    let (stem, extension) = match shortened.rfind('.') {
        Some(idx) if idx > 0 => shortened.split_at(idx),
        _ => (shortened.as_str(), ""),
    };
    format!("{}{}{}", stem.trim_end(), counter, extension)
}

/// Directory name for an album: `name (id)`, or whichever part is known
pub fn format_directory_name(album_name: Option<&str>, album_id: Option<&str>) -> Option<String> {
    let name = album_name
        .map(sanitize_filename)
        .filter(|name| !name.is_empty());

    match (name, album_id) {
        (Some(name), Some(id)) => Some(format!("{} ({})", name, id)),
        (Some(name), None) => Some(name),
        (None, Some(id)) => Some(id.to_string()),
        (None, None) => None,
    }
}

/// Directory listing result
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct DirectoryListing {
    /// The directory that was listed
    #[schema(value_type = String)]
    pub path: PathBuf,
    /// Sorted names of its subdirectories (at most 50)
    pub directories: Vec<String>,
}

/// List the subdirectories of `base`, sorted by name
///
/// When `root` is set, `base` must resolve (symlinks included) to a path
/// inside `root`, and entries that are symlinks pointing outside it are
/// left out.
pub async fn list_directories(base: &Path, root: Option<&Path>) -> Result<DirectoryListing> {
    let resolved = tokio::fs::canonicalize(base)
        .await
        .map_err(|e| Error::Filesystem {
            path: base.to_path_buf(),
            reason: e.to_string(),
        })?;

    let root = match root {
        Some(root) => Some(tokio::fs::canonicalize(root).await.map_err(|e| {
            Error::Filesystem {
                path: root.to_path_buf(),
                reason: e.to_string(),
            }
        })?),
        None => None,
    };

    if let Some(ref root) = root
        && !resolved.starts_with(root)
    {
        return Err(Error::Filesystem {
            path: base.to_path_buf(),
            reason: "path is outside the allowed root".to_string(),
        });
    }

    let mut entries = tokio::fs::read_dir(&resolved).await?;
    let mut directories = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_symlink() {
            let Ok(target) = tokio::fs::canonicalize(entry.path()).await else {
                continue;
            };
            let inside = root.as_ref().is_none_or(|root| target.starts_with(root));
            if !inside || !target.is_dir() {
                continue;
            }
        } else if !file_type.is_dir() {
            continue;
        }

        if let Some(name) = entry.file_name().to_str()
            && !name.starts_with('.')
        {
            directories.push(name.to_string());
        }
    }

    directories.sort();
    directories.truncate(MAX_DIRECTORY_ENTRIES);

    Ok(DirectoryListing {
        path: resolved,
        directories,
    })
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux: statvfs
/// - macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// # Arguments
///
/// * `path` - The path to check (typically the download directory)
///
/// # Returns
///
/// Returns the available disk space in bytes, or an IO error if the check fails.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid, null-terminated C string, stat is zeroed
        // before the call and only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is a valid, null-terminated wide string and all
        // output pointers point to properly aligned u64 variables.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

/// Walk up from `path` to the nearest existing ancestor
///
/// Download directories are created lazily, so the free-space check has to
/// look at the volume the directory will eventually live on.
pub fn nearest_existing_ancestor(path: &Path) -> PathBuf {
    let mut current = path;
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => return PathBuf::from("."),
        }
    }
}

/// Human-readable duration used in the closing log line (`01 hrs 02 mins 03 secs`)
pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02} hrs {:02} mins {:02} secs",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
