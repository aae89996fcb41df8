//! Utility functions for path sanitization, name cleanup and filesystem queries

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Replacement for characters that cannot appear in a path segment
const REPLACEMENT: char = '_';

/// Device names Windows refuses as file names regardless of extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn forbidden_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)] // literal pattern
        Regex::new(r#"[<>:"/\\|?*\x00-\x1f\x7f]"#).expect("valid regex")
    })
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)] // literal pattern
        Regex::new(r"\s+").expect("valid regex")
    })
}

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::expect_used)] // literal pattern
        Regex::new(r"[^a-zA-Z0-9\s]").expect("valid regex")
    })
}

/// Longest file name, in bytes, that mainstream filesystems accept
pub const MAX_NAME_BYTES: usize = 255;

/// Make a single path segment safe for any mainstream filesystem
///
/// - Path separators, reserved punctuation and control characters become `_`
/// - Leading/trailing whitespace and trailing dots are stripped
/// - `.`/`..`/empty results become `_`, so the segment can never traverse upward
/// - Windows device names (`CON`, `LPT1`, ...) get a `_` prefix
/// - The result is at most `max_len` bytes of UTF-8, cut on a char boundary
///
/// The trailing-dot and device-name rules hold for the truncated result too.
///
/// # Examples
///
/// ```
/// use scrape_toolkit::utils::sanitize_segment;
///
/// assert_eq!(sanitize_segment("../etc/passwd", 100), "_etc_passwd");
/// assert_eq!(sanitize_segment("a:b*c?", 100), "a_b_c_");
/// assert_eq!(sanitize_segment("..", 100), "_");
/// assert_eq!(sanitize_segment("写真", 4), "写");
/// ```
pub fn sanitize_segment(input: &str, max_len: usize) -> String {
    let max_len = max_len.max(1);
    let replaced = forbidden_chars().replace_all(input, REPLACEMENT.to_string().as_str());
    let trimmed = replaced.trim().trim_start_matches('.');

    let mut segment = trim_segment_end(truncate_bytes(trimmed, max_len));
    if is_reserved(&segment) {
        segment.insert(0, REPLACEMENT);
        segment = trim_segment_end(truncate_bytes(&segment, max_len));
    }
    segment
}

/// Sanitize a file name, preserving a short extension when truncating
///
/// `max_len` is in bytes, like [`sanitize_segment`].
///
/// ```
/// use scrape_toolkit::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("report<final>.pdf", 100), "report_final_.pdf");
/// assert_eq!(sanitize_filename("abcdefghij.jpg", 8), "abcd.jpg");
/// ```
pub fn sanitize_filename(input: &str, max_len: usize) -> String {
    let max_len = max_len.max(1);
    let cleaned = sanitize_segment(input, usize::MAX);
    if cleaned.len() <= max_len {
        return cleaned;
    }

    let path = Path::new(&cleaned);
    let extension = path.extension().and_then(|e| e.to_str());
    let stem = path.file_stem().and_then(|s| s.to_str());

    match (stem, extension) {
        (Some(stem), Some(ext)) if ext.len() + 2 <= max_len => {
            let keep = max_len - ext.len() - 1;
            format!("{}.{}", sanitize_segment(stem, keep), ext)
        }
        _ => sanitize_segment(&cleaned, max_len),
    }
}

fn is_reserved(segment: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or_default();
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem.trim_end()))
}

fn trim_segment_end(segment: &str) -> String {
    let trimmed = segment.trim_end_matches(['.', ' ']).trim_end();
    if trimmed.is_empty() {
        REPLACEMENT.to_string()
    } else {
        trimmed.to_string()
    }
}

fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Collapse whitespace runs to single spaces and trim
pub fn normalize_whitespace(name: &str) -> String {
    whitespace_runs().replace_all(name.trim(), " ").into_owned()
}

/// Lower-case alphanumeric form of a name for matching
///
/// ```
/// use scrape_toolkit::utils::clean_name;
///
/// assert_eq!(clean_name("  The Widget (Deluxe!)  "), "the widget deluxe");
/// ```
pub fn clean_name(name: &str) -> String {
    let normalized = normalize_whitespace(name);
    let stripped = non_alphanumeric().replace_all(&normalized, "");
    normalize_whitespace(&stripped.to_lowercase())
}

/// Whether `candidate` is an absolute URL with a scheme and a host
pub fn is_valid_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|u| u.has_host() && !u.scheme().is_empty())
        .unwrap_or(false)
}

/// Extract a file name from the last path segment of a URL
///
/// Percent-encoding is decoded. Returns `None` when the URL does not parse or
/// its path ends without a name.
///
/// ```
/// use scrape_toolkit::utils::filename_from_url;
///
/// assert_eq!(
///     filename_from_url("https://cdn.example.com/img/My%20Photo.jpg?w=200").as_deref(),
///     Some("My Photo.jpg")
/// );
/// assert_eq!(filename_from_url("https://example.com/"), None);
/// ```
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| last.to_string());
    Some(decoded)
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux/macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
///
/// # Errors
///
/// Returns an IO error if the query fails or the platform is unsupported.
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialized,
        // and stat is only read after statvfs reports success.
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

        // SAFETY: wide_path is NUL-terminated and every out pointer refers to a live u64.
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
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}
