//! Extension to media-type lookup for served files.

/// Returns the media type for a lowercase file extension, or
/// `application/octet-stream` for anything unrecognized.
///
/// `ext` should be the extension without the leading dot; case is not
/// normalized by this function — callers lowercase the path component first
/// so the table stays a flat match.
pub fn media_type(ext: &str) -> &'static str {
    match ext {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Derives the media type for a resolved filesystem path.
pub fn media_type_for_path(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    media_type(&ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn known_extensions_map_correctly() {
        assert_eq!(media_type("html"), "text/html");
        assert_eq!(media_type("htm"), "text/html");
        assert_eq!(media_type("css"), "text/css");
        assert_eq!(media_type("js"), "application/javascript");
        assert_eq!(media_type("json"), "application/json");
        assert_eq!(media_type("png"), "image/png");
        assert_eq!(media_type("jpg"), "image/jpeg");
        assert_eq!(media_type("jpeg"), "image/jpeg");
        assert_eq!(media_type("gif"), "image/gif");
        assert_eq!(media_type("pdf"), "application/pdf");
        assert_eq!(media_type("txt"), "text/plain");
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        assert_eq!(media_type("xyz"), "application/octet-stream");
        assert_eq!(media_type(""), "application/octet-stream");
    }

    #[test]
    fn path_extension_is_lowercased_before_lookup() {
        assert_eq!(media_type_for_path(Path::new("/www/INDEX.HTML")), "text/html");
        assert_eq!(media_type_for_path(Path::new("/www/no_ext")), "application/octet-stream");
    }
}
