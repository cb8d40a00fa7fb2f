/// Replaces characters that are unsafe in file names.
///
/// Replaced characters:
/// - `/` and `\` -> `_` (path separators)
/// - `:` `*` `?` `<` `>` `|` -> `_` (reserved on Windows)
/// - `"` -> `'`
/// - control characters -> `_`
///
/// Leading/trailing whitespace and dots are trimmed. An empty result becomes `unnamed`.
///
/// # Example
///
/// ```
/// use mediarelay::core::utils::escape_filename;
///
/// let safe = escape_filename("clip/name*.mp4");
/// assert_eq!(safe, "clip_name_.mp4");
/// ```
pub fn escape_filename(filename: &str) -> String {
    let mut result = String::with_capacity(filename.len());

    for c in filename.chars() {
        match c {
            '/' | '\\' => result.push('_'),
            ':' | '*' | '?' | '<' | '>' | '|' => result.push('_'),
            '"' => result.push('\''),
            c if c.is_control() => result.push('_'),
            _ => result.push(c),
        }
    }

    let result = result.trim_matches(|c: char| c.is_whitespace() || c == '.');

    if result.is_empty() {
        "unnamed".to_string()
    } else {
        result.to_string()
    }
}

/// Whether `name` is exactly one normal path component, so joining it onto a
/// directory can never leave that directory.
///
/// ```
/// use mediarelay::core::utils::is_plain_file_name;
///
/// assert!(is_plain_file_name("clip.mp4"));
/// assert!(!is_plain_file_name("../clip.mp4"));
/// ```
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && std::path::Path::new(name).file_name() == Some(std::ffi::OsStr::new(name))
}

/// Default length limit for [`sanitize_filename`].
pub const SANITIZED_NAME_MAX_LEN: usize = 50;

/// Keeps only word characters, whitespace and `-`, then truncates to `max_len` characters.
///
/// Used for titles turned into captions or base names. The result may be empty.
///
/// # Example
///
/// ```
/// use mediarelay::core::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Hello, World! (2024)", 50), "Hello World 2024");
/// ```
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace() || *c == '-')
        .take(max_len)
        .collect()
}

/// Prefix of every temporary artifact owned by a session: `temp_<session>_`.
pub fn session_temp_prefix(session_id: i64) -> String {
    format!("temp_{}_", session_id)
}

/// Temporary base name for a destination file: the session prefix plus the
/// destination name without its extension.
///
/// `("clip.mp4", 42)` -> `temp_42_clip`
pub fn session_temp_stem(session_id: i64, file_name: &str) -> String {
    let stem = std::path::Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    format!("{}{}", session_temp_prefix(session_id), stem)
}
