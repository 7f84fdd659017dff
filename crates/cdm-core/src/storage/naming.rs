//! Pure helpers behind the collision policy.

/// Split `name` into stem and extension at the last dot. A leading dot
/// (hidden file) or a trailing dot does not start an extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(i) if i > 0 && i + 1 < name.len() => (&name[..i], Some(&name[i + 1..])),
        _ => (name, None),
    }
}

/// `stem (n).ext` for `base_name`; `stem (n)` when there is no extension.
pub fn numbered_candidate(base_name: &str, n: u32) -> String {
    match split_extension(base_name) {
        (stem, Some(ext)) => format!("{stem} ({n}).{ext}"),
        (stem, None) => format!("{stem} ({n})"),
    }
}
