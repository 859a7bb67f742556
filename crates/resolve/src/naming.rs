//! Display-name inference and filename sanitization.

use url::Url;

/// Replace every run of characters outside `[A-Za-z0-9._-]` with `_` and
/// trim leading/trailing separators. Falls back to `"file"` when nothing
/// usable remains.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sub = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            last_was_sub = false;
        } else if !last_was_sub {
            out.push('_');
            last_was_sub = true;
        }
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "file".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Infer a display name from the last path segment of a URL.
pub(crate) fn display_name_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty());
    match segment {
        Some(s) => sanitize_filename(s),
        None => "video".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_forbidden_runs() {
        assert_eq!(sanitize_filename("my video (final).mp4"), "my_video_final_.mp4");
        assert_eq!(sanitize_filename("тест.mp4"), "mp4");
        assert_eq!(sanitize_filename("..."), "file");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[test]
    fn display_name_uses_last_segment() {
        let url = Url::parse("https://host.example/a/b/clip.mp4?x=1").unwrap();
        assert_eq!(display_name_from_url(&url), "clip.mp4");

        let url = Url::parse("https://host.example/").unwrap();
        assert_eq!(display_name_from_url(&url), "video");
    }
}
