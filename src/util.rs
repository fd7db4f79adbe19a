//! Small helpers shared across modules.

use std::borrow::Cow;
use std::path::Path;

use rand::Rng;

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Generate `prefix` + `len` random lowercase hex digits from the thread-local
/// PRNG (seeded from the OS entropy source on first use).
pub fn random_hex_id(prefix: &str, len: usize) -> String {
    let mut id = String::with_capacity(prefix.len() + len);
    id.push_str(prefix);
    let mut rng = rand::thread_rng();
    for _ in 0..len {
        id.push(HEX_CHARS[rng.gen_range(0..16)] as char);
    }
    id
}

/// Lowercase hex encoding (kept local rather than pulling in the `hex` crate).
pub fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    bytes
        .as_ref()
        .iter()
        .fold(String::with_capacity(bytes.as_ref().len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

/// Write `contents` to `path` atomically: temp file in the same directory,
/// then rename. Readers never observe a partial file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .map_or_else(|| "file".into(), |n| n.to_string_lossy())
    ));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Expand a leading `~` to `$HOME`.
///
/// - `"~"` → `"/home/user"`
/// - `"~/foo"` → `"/home/user/foo"`
/// - Anything else passes through unchanged.
pub fn expand_tilde(path: &str) -> Cow<'_, str> {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            if path == "~" {
                return Cow::Owned(home);
            }
            return Cow::Owned(format!("{}{}", home, &path[1..]));
        }
    }
    Cow::Borrowed(path)
}
