//! MIME type / file extension helpers

use image::ImageFormat;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Extensions an original may carry in the local cache, tried in order
pub const KNOWN_EXTENSIONS: &[&str] = &["jpg", "png", "gif", "webp", "bin"];

/// Extension used for cached files of the given MIME type
pub fn extension_for_mime(mimetype: &str) -> &'static str {
    let Ok(parsed) = mimetype.parse::<mime::Mime>() else {
        return "bin";
    };
    if parsed.type_() != mime::IMAGE {
        return "bin";
    }
    let subtype = parsed.subtype();
    if subtype == mime::JPEG {
        "jpg"
    } else if subtype == mime::PNG {
        "png"
    } else if subtype == mime::GIF {
        "gif"
    } else if subtype.as_str() == "webp" {
        "webp"
    } else {
        "bin"
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => OCTET_STREAM,
    }
}

/// Content type from the leading bytes of a file
pub fn sniff_content_type(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Tiff) => "image/tiff",
        _ => OCTET_STREAM,
    }
}
