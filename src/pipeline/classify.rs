//! Attachment classifier: decides what a content part is and whether it
//! is small enough (and of a suitable type) to forward.

use crate::mail::envelope::{ContentPart, PartRole};
use crate::mail::mime::OCTET_STREAM;
use crate::pipeline::types::AttachmentKind;

/// Types Telegram renders as photos. GIF is sent as a static image and BMP
/// is rendered as a document, so neither qualifies.
const PHOTO_TYPES: &[&str] = &["image/jpeg", "image/png"];

/// Extension → MIME type table used when a part is declared as
/// `application/octet-stream`.
const EXTENSION_TYPES: &[(&str, &str)] = &[
    ("7z", "application/x-7z-compressed"),
    ("avif", "image/avif"),
    ("bmp", "image/bmp"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("eml", "message/rfc822"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("heic", "image/heic"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/vnd.microsoft.icon"),
    ("ics", "text/calendar"),
    ("jpe", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("mjs", "text/javascript"),
    ("mov", "video/quicktime"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("odp", "application/vnd.oasis.opendocument.presentation"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("ogg", "audio/ogg"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("ppt", "application/vnd.ms-powerpoint"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("rar", "application/vnd.rar"),
    ("rtf", "application/rtf"),
    ("svg", "image/svg+xml"),
    ("tar", "application/x-tar"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("txt", "text/plain"),
    ("wasm", "application/wasm"),
    ("wav", "audio/wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("xml", "text/xml"),
    ("zip", "application/zip"),
];

/// Size ceilings, in bytes, for each forwarding path. Zero disables the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub photo: usize,
    pub document: usize,
}

/// What to do with a classified part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Photo,
    Document,
    Discard,
}

impl Disposition {
    /// Outcome word shown in the attachment summary.
    pub fn outcome(self) -> &'static str {
        match self {
            Self::Photo | Self::Document => "sending...",
            Self::Discard => "discarded",
        }
    }

    /// Upload kind, or `None` for discarded parts.
    pub fn attachment_kind(self) -> Option<AttachmentKind> {
        match self {
            Self::Photo => Some(AttachmentKind::Photo),
            Self::Document => Some(AttachmentKind::Document),
            Self::Discard => None,
        }
    }
}

/// A content part with its resolved type and forwarding decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPart<'a> {
    pub part: &'a ContentPart,
    pub content_type: String,
    pub disposition: Disposition,
}

/// Classify a single part. Pure function of its inputs.
///
/// `PartRole::Other` parts are never forwarded.
pub fn classify(part: &ContentPart, limits: SizeLimits) -> ClassifiedPart<'_> {
    let content_type = resolve_content_type(&part.content_type, &part.filename);
    let size = part.content.len();

    let disposition = if part.role == PartRole::Other {
        Disposition::Discard
    } else if is_photo(&content_type) && fits(size, limits.photo) {
        Disposition::Photo
    } else if fits(size, limits.document) {
        Disposition::Document
    } else {
        Disposition::Discard
    };

    ClassifiedPart {
        part,
        content_type,
        disposition,
    }
}

fn fits(size: usize, ceiling: usize) -> bool {
    ceiling > 0 && size <= ceiling
}

/// Resolve the effective type of a part.
///
/// Declared types are kept as is, except the generic octet-stream marker,
/// which is replaced by a guess from the file extension when one exists.
pub fn resolve_content_type(declared: &str, filename: &str) -> String {
    if declared != OCTET_STREAM {
        return declared.to_string();
    }
    extension(filename)
        .and_then(type_for_extension)
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

/// Whether the type is rendered as a photo by the platform.
pub fn is_photo(content_type: &str) -> bool {
    PHOTO_TYPES.contains(&content_type)
}

fn extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

fn type_for_extension(ext: String) -> Option<&'static str> {
    EXTENSION_TYPES
        .binary_search_by(|(e, _)| (*e).cmp(ext.as_str()))
        .ok()
        .map(|i| EXTENSION_TYPES[i].1)
}

/// Human-readable decimal size with four significant digits: `3B`,
/// `1.024kB`, `10MB`.
pub fn human_size(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "kB", "MB", "GB", "TB", "PB", "EB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    let int_digits = if value >= 100.0 {
        3
    } else if value >= 10.0 {
        2
    } else {
        1
    };
    let formatted = format!("{:.*}", 4 - int_digits, value);
    let formatted = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        formatted.as_str()
    };
    format!("{formatted}{}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: SizeLimits = SizeLimits {
        photo: 1024,
        document: 2048,
    };

    #[test]
    fn extension_table_is_sorted() {
        assert!(EXTENSION_TYPES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn declared_type_is_kept() {
        assert_eq!(resolve_content_type("text/plain", "a.jpg"), "text/plain");
    }

    #[test]
    fn octet_stream_guessed_from_extension() {
        assert_eq!(resolve_content_type(OCTET_STREAM, "photo.JPG"), "image/jpeg");
        assert_eq!(resolve_content_type(OCTET_STREAM, "report.pdf"), "application/pdf");
        assert_eq!(resolve_content_type(OCTET_STREAM, "dir/a.tar.gz"), "application/gzip");
    }

    #[test]
    fn octet_stream_gives_up_on_unknown_extension() {
        assert_eq!(resolve_content_type(OCTET_STREAM, "blob.xyz123"), OCTET_STREAM);
        assert_eq!(resolve_content_type(OCTET_STREAM, "noext"), OCTET_STREAM);
        assert_eq!(resolve_content_type(OCTET_STREAM, "trailing."), OCTET_STREAM);
        assert_eq!(resolve_content_type(OCTET_STREAM, ""), OCTET_STREAM);
    }

    #[test]
    fn only_jpeg_and_png_are_photos() {
        assert!(is_photo("image/jpeg"));
        assert!(is_photo("image/png"));
        assert!(!is_photo("image/gif"));
        assert!(!is_photo("image/x-ms-bmp"));
        assert!(!is_photo("image/bmp"));
        assert!(!is_photo("text/plain"));
    }

    #[test]
    fn small_image_is_photo() {
        let part = ContentPart::inline("a.jpg", "image/jpeg", "JPG");
        let c = classify(&part, LIMITS);
        assert_eq!(c.disposition, Disposition::Photo);
        assert_eq!(c.content_type, "image/jpeg");
    }

    #[test]
    fn image_over_photo_limit_falls_back_to_document() {
        let part = ContentPart::attachment("a.png", "image/png", vec![0u8; 1500]);
        assert_eq!(classify(&part, LIMITS).disposition, Disposition::Document);
    }

    #[test]
    fn gif_is_a_document() {
        let part = ContentPart::attachment("a.gif", "image/gif", "GIF");
        assert_eq!(classify(&part, LIMITS).disposition, Disposition::Document);
    }

    #[test]
    fn part_over_both_limits_is_discarded() {
        let part = ContentPart::attachment("big.bin", OCTET_STREAM, vec![0u8; 4096]);
        assert_eq!(classify(&part, LIMITS).disposition, Disposition::Discard);
    }

    #[test]
    fn size_equal_to_limit_is_forwarded() {
        let part = ContentPart::attachment("x.txt", "text/plain", vec![b'a'; 2048]);
        assert_eq!(classify(&part, LIMITS).disposition, Disposition::Document);
    }

    #[test]
    fn disposition_maps_to_upload_kind() {
        assert_eq!(Disposition::Photo.attachment_kind(), Some(AttachmentKind::Photo));
        assert_eq!(Disposition::Document.attachment_kind(), Some(AttachmentKind::Document));
        assert_eq!(Disposition::Discard.attachment_kind(), None);
        assert_eq!(Disposition::Discard.outcome(), "discarded");
    }

    #[test]
    fn zero_limits_disable_forwarding() {
        let off = SizeLimits {
            photo: 0,
            document: 0,
        };
        let photo = ContentPart::inline("a.jpg", "image/jpeg", "JPG");
        let empty = ContentPart::attachment("empty.txt", "text/plain", "");
        assert_eq!(classify(&photo, off).disposition, Disposition::Discard);
        assert_eq!(classify(&empty, off).disposition, Disposition::Discard);
    }

    #[test]
    fn zero_photo_limit_routes_images_to_documents() {
        let limits = SizeLimits {
            photo: 0,
            document: 1024,
        };
        let photo = ContentPart::inline("a.jpg", "image/jpeg", "JPG");
        assert_eq!(classify(&photo, limits).disposition, Disposition::Document);
    }

    #[test]
    fn other_parts_are_never_forwarded() {
        let part = ContentPart::other("", "text/calendar", "BEGIN:VCALENDAR");
        assert_eq!(classify(&part, LIMITS).disposition, Disposition::Discard);
    }

    #[test]
    fn outcome_words() {
        assert_eq!(Disposition::Photo.outcome(), "sending...");
        assert_eq!(Disposition::Document.outcome(), "sending...");
        assert_eq!(Disposition::Discard.outcome(), "discarded");
    }

    #[test]
    fn human_size_formats() {
        assert_eq!(human_size(0), "0B");
        assert_eq!(human_size(3), "3B");
        assert_eq!(human_size(999), "999B");
        assert_eq!(human_size(1000), "1kB");
        assert_eq!(human_size(1024), "1.024kB");
        assert_eq!(human_size(1500), "1.5kB");
        assert_eq!(human_size(10_000_000), "10MB");
        assert_eq!(human_size(123_456_789), "123.5MB");
    }
}
