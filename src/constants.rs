//! Shared constants used across the application.

/// User agent string used for requests to the board.
///
/// A realistic desktop browser user agent; the board serves its regular HTML to it.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";

/// Format of the machine-readable timestamp in a post's `span.post-time` title.
pub const POST_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Suffix inserted before the file extension of a thumbnail.
pub const THUMBNAIL_SUFFIX: &str = "_thumb";

/// JPEG quality used when encoding thumbnails.
pub const THUMBNAIL_JPEG_QUALITY: u8 = 85;
