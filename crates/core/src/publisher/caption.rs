//! Publish caption built from item metadata.

use crate::item::{ItemMetadata, VariantKey};

/// Longest caption most channels accept.
pub const MAX_CAPTION_CHARS: usize = 1024;

const MISSING: &str = "N/A";

fn or_missing(value: Option<&str>) -> &str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(MISSING)
}

/// One line per field, `N/A` where metadata is missing.
pub fn format_caption(metadata: &ItemMetadata, file_name: &str, variant: &VariantKey) -> String {
    let runtime = metadata
        .runtime
        .filter(|minutes| *minutes > 0)
        .map(|minutes| format!("{} min", minutes));
    let genres = (!metadata.genres.is_empty()).then(|| metadata.genres.join(", "));

    let caption = format!(
        "Title: {}\nFile: {}\nVariant: {}\nLanguage: {}\nOriginal language: {}\nRuntime: {}\nGenres: {}",
        or_missing(metadata.title.as_deref()),
        file_name,
        variant,
        or_missing(metadata.language.as_deref()),
        or_missing(metadata.original_language.as_deref()),
        or_missing(runtime.as_deref()),
        or_missing(genres.as_deref()),
    );

    if caption.chars().count() <= MAX_CAPTION_CHARS {
        caption
    } else {
        caption.chars().take(MAX_CAPTION_CHARS).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_metadata() {
        let metadata = ItemMetadata {
            title: Some("The Movie".to_string()),
            language: Some("English".to_string()),
            original_language: Some("French".to_string()),
            runtime: Some(118),
            genres: vec!["Drama".to_string(), "Thriller".to_string()],
        };
        let caption = format_caption(&metadata, "movie.1080p.mp4", &VariantKey::from("1080p"));
        assert_eq!(
            caption,
            "Title: The Movie\nFile: movie.1080p.mp4\nVariant: 1080p\nLanguage: English\n\
             Original language: French\nRuntime: 118 min\nGenres: Drama, Thriller"
        );
    }

    #[test]
    fn test_missing_fields_use_placeholder() {
        let metadata = ItemMetadata {
            title: Some("  ".to_string()),
            runtime: Some(0),
            ..Default::default()
        };
        let caption = format_caption(&metadata, "a.mp4", &VariantKey::from("720p"));
        assert!(caption.starts_with("Title: N/A\n"));
        assert!(caption.contains("Runtime: N/A"));
        assert!(caption.ends_with("Genres: N/A"));
    }

    #[test]
    fn test_long_caption_truncated() {
        let metadata = ItemMetadata {
            title: Some("x".repeat(2000)),
            ..Default::default()
        };
        let caption = format_caption(&metadata, "a.mp4", &VariantKey::from("720p"));
        assert_eq!(caption.chars().count(), MAX_CAPTION_CHARS);
    }
}
