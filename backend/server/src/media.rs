//! Upload inspection: content-type allow list, checksums and thumbnails.
use image::{ImageFormat, codecs::jpeg::JpegEncoder};
use models::AttachmentKind;
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub const THUMBNAIL_EDGE: u32 = 320;
pub const THUMBNAIL_NAME: &str = "thumb.jpg";
pub const THUMBNAIL_TYPE: &str = "image/jpeg";

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/quicktime"];
const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/csv",
    "application/zip",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lower-cased media type without parameters (`text/plain; charset=utf-8`
/// becomes `text/plain`).
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn classify(content_type: &str) -> Result<AttachmentKind, AppError> {
    let essence = essence(content_type);

    if IMAGE_TYPES.contains(&essence.as_str()) {
        Ok(AttachmentKind::Image)
    } else if VIDEO_TYPES.contains(&essence.as_str()) {
        Ok(AttachmentKind::Video)
    } else if DOCUMENT_TYPES.contains(&essence.as_str()) {
        Ok(AttachmentKind::Document)
    } else {
        Err(AppError::UnsupportedMediaType(essence))
    }
}

/// Fallback when a multipart field carries no content type.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => "application/octet-stream",
    }
}

/// JPEG preview that fits in a 320x320 box, aspect ratio kept. `None` when
/// the bytes do not decode as the declared image type.
pub fn thumbnail(bytes: &[u8], content_type: &str) -> Option<Vec<u8>> {
    let format = ImageFormat::from_mime_type(essence(content_type))?;
    let image = image::load_from_memory_with_format(bytes, format).ok()?;
    let preview = if image.width() > THUMBNAIL_EDGE || image.height() > THUMBNAIL_EDGE {
        image.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE).to_rgb8()
    } else {
        image.to_rgb8()
    };

    let mut buf = Vec::new();
    JpegEncoder::new(&mut buf).encode_image(&preview).ok()?;
    Some(buf)
}
