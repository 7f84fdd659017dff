//! Linux-safe filename sanitization for materialized downloads.

/// Name used when the display name sanitizes down to nothing.
const FALLBACK_STEM: &str = "download";

/// Sanitizes a candidate filename for safe use on Linux.
///
/// - Replaces NUL, `/`, `\`, and control characters with `_`
/// - Trims leading/trailing spaces, dots and underscores
/// - Collapses consecutive underscores
/// - Limits length to 255 bytes (Linux NAME_MAX)
///
/// Interior spaces are kept: display names such as "Week 1 Intro" stay readable.
pub fn sanitize_filename_for_linux(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;

    for c in name.chars() {
        let replacement = if c == '\0' || c == '/' || c == '\\' || c.is_control() {
            '_'
        } else {
            c
        };

        if replacement == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(replacement);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.' || c == '_');

    if trimmed.len() > NAME_MAX {
        let mut take = NAME_MAX;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    }
}

/// File name for an item's permanent copy: sanitized display name plus extension.
///
/// `extension` may carry a leading dot; an empty extension yields a bare stem.
pub fn destination_file_name(display_name: &str, extension: &str) -> String {
    let stem = sanitize_filename_for_linux(display_name);
    let stem = if stem.is_empty() {
        FALLBACK_STEM
    } else {
        stem.as_str()
    };
    let ext = sanitize_filename_for_linux(extension.trim_start_matches('.'));
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_slash_and_backslash() {
        assert_eq!(sanitize_filename_for_linux("a/b\\c.txt"), "a_b_c.txt");
    }

    #[test]
    fn trims_dots_and_spaces() {
        assert_eq!(
            sanitize_filename_for_linux("  ..  file.txt  ..  "),
            "file.txt"
        );
    }

    #[test]
    fn collapses_underscores() {
        assert_eq!(
            sanitize_filename_for_linux("file___name.txt"),
            "file_name.txt"
        );
    }

    #[test]
    fn control_chars() {
        assert_eq!(
            sanitize_filename_for_linux("file\x00name.txt"),
            "file_name.txt"
        );
    }

    #[test]
    fn keeps_interior_spaces() {
        assert_eq!(sanitize_filename_for_linux("Week 1 Intro"), "Week 1 Intro");
    }

    #[test]
    fn destination_name_joins_extension() {
        assert_eq!(destination_file_name("Lecture 3", "mp4"), "Lecture 3.mp4");
        assert_eq!(destination_file_name("Slides", ".pdf"), "Slides.pdf");
        assert_eq!(destination_file_name("Transcript", ""), "Transcript");
    }

    #[test]
    fn destination_name_falls_back_for_empty_title() {
        assert_eq!(destination_file_name("../..", "mp4"), "download.mp4");
        assert_eq!(destination_file_name("", ""), "download");
    }
}
