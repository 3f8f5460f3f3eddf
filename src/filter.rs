/// Files ending with this suffix are never uploaded.
pub const IGNORE_SUFFIX: &str = ".ignore";

/// Appended to a file name once the broker has acknowledged it.
pub const UPLOADED_SUFFIX: &str = ".uploaded";

/// Whether a detected file name should be published.
///
/// Matching is case-insensitive, so `scan.IGNORE` and `a.txt.Uploaded` are
/// both excluded.
pub fn is_eligible(file_name: &str) -> bool {
    let name = file_name.to_lowercase();
    !name.ends_with(IGNORE_SUFFIX) && !name.ends_with(UPLOADED_SUFFIX)
}
