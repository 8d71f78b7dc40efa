/// Normalizes a package name the way the package index does (PEP 503): lowercase,
/// and any run of `-`, `_`, or `.` collapses to a single `-` (spec §3, §4.3).
///
/// `left-pad`, `Left_Pad`, and `left..pad` all normalize to `left-pad`.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.trim().chars() {
        if ch == '-' || ch == '_' || ch == '.' {
            if !last_was_sep && !out.is_empty() {
                out.push('-');
            }
            last_was_sep = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::normalize;

    #[test]
    fn lowercases() {
        assert_eq!(normalize("Left-Pad"), "left-pad");
    }

    #[test]
    fn collapses_separators() {
        assert_eq!(normalize("left_pad"), "left-pad");
        assert_eq!(normalize("left..pad"), "left-pad");
        assert_eq!(normalize("left___pad"), "left-pad");
        assert_eq!(normalize("left-_.pad"), "left-pad");
    }

    #[test]
    fn trims_surrounding_whitespace_and_separators() {
        assert_eq!(normalize("  left-pad  "), "left-pad");
        assert_eq!(normalize("-left-pad-"), "left-pad");
    }
}
