//! Local vetting of pack icon files.
//!
//! The backend relays the icon straight into a bot conversation that cannot
//! recover from a rejected file, so anything Telegram would refuse is caught
//! here, before the decision leaves the machine.

use std::fs;
use std::path::Path;

use image::{GenericImageView, ImageFormat};
use thiserror::Error;

pub const MAX_ICON_BYTES: u64 = 128 * 1024;
pub const ICON_SIDE_PX: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IconRejection {
    #[error("icon file is not readable: {message}")]
    Unreadable { message: String },
    #[error("icon file is {size} bytes; the limit is {}", MAX_ICON_BYTES)]
    TooLarge { size: u64 },
    #[error("icon must be a PNG or WebP image")]
    UnsupportedFormat,
    #[error("icon failed to decode: {message}")]
    Undecodable { message: String },
    #[error("icon must be exactly {0}x{0} pixels, got {width}x{height}", ICON_SIDE_PX)]
    WrongDimensions { width: u32, height: u32 },
}

/// Checks that a file is a decodable PNG or WebP, within the size cap, and
/// exactly [`ICON_SIDE_PX`] square.
pub fn validate_icon_file(path: &Path) -> Result<(), IconRejection> {
    let metadata = fs::metadata(path).map_err(|error| IconRejection::Unreadable {
        message: error.to_string(),
    })?;
    if metadata.len() > MAX_ICON_BYTES {
        return Err(IconRejection::TooLarge {
            size: metadata.len(),
        });
    }

    let bytes = fs::read(path).map_err(|error| IconRejection::Unreadable {
        message: error.to_string(),
    })?;

    let format = image::guess_format(&bytes).map_err(|_| IconRejection::UnsupportedFormat)?;
    if !matches!(format, ImageFormat::Png | ImageFormat::WebP) {
        return Err(IconRejection::UnsupportedFormat);
    }

    let decoded = image::load_from_memory_with_format(&bytes, format).map_err(|error| {
        IconRejection::Undecodable {
            message: error.to_string(),
        }
    })?;

    let (width, height) = decoded.dimensions();
    if width != ICON_SIDE_PX || height != ICON_SIDE_PX {
        return Err(IconRejection::WrongDimensions { width, height });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use image::RgbaImage;

    use super::*;

    fn temp_icon_dir() -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after the epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("stickerdeck-icon-tests-{stamp}"));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn save_png(dir: &Path, name: &str, side: u32) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::new(side, side)
            .save_with_format(&path, ImageFormat::Png)
            .expect("test png should save");
        path
    }

    #[test]
    fn accepts_a_square_png_of_the_right_size() {
        let dir = temp_icon_dir();
        let path = save_png(&dir, "good.png", ICON_SIDE_PX);
        validate_icon_file(&path).expect("valid icon should pass");
    }

    #[test]
    fn rejects_wrong_dimensions() {
        let dir = temp_icon_dir();
        let path = save_png(&dir, "small.png", 64);
        assert_eq!(
            validate_icon_file(&path),
            Err(IconRejection::WrongDimensions {
                width: 64,
                height: 64
            })
        );
    }

    #[test]
    fn rejects_a_missing_file() {
        let dir = temp_icon_dir();
        let result = validate_icon_file(&dir.join("nope.png"));
        assert!(matches!(result, Err(IconRejection::Unreadable { .. })));
    }

    #[test]
    fn rejects_oversized_files_before_decoding() {
        let dir = temp_icon_dir();
        let path = dir.join("huge.png");
        fs::write(&path, vec![0u8; MAX_ICON_BYTES as usize + 1]).expect("test file should write");
        assert_eq!(
            validate_icon_file(&path),
            Err(IconRejection::TooLarge {
                size: MAX_ICON_BYTES + 1
            })
        );
    }

    #[test]
    fn rejects_formats_other_than_png_and_webp() {
        let dir = temp_icon_dir();
        let path = dir.join("photo.jpg");
        // JPEG SOI + APP0 marker; enough for format sniffing.
        fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00])
            .expect("test file should write");
        assert_eq!(validate_icon_file(&path), Err(IconRejection::UnsupportedFormat));
    }

    #[test]
    fn rejects_unrecognizable_bytes() {
        let dir = temp_icon_dir();
        let path = dir.join("noise.bin");
        fs::write(&path, b"definitely not an image").expect("test file should write");
        assert_eq!(validate_icon_file(&path), Err(IconRejection::UnsupportedFormat));
    }

    #[test]
    fn rejects_a_png_that_does_not_decode() {
        let dir = temp_icon_dir();
        let path = dir.join("torn.png");
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(b"garbage where chunks should be");
        fs::write(&path, bytes).expect("test file should write");
        assert!(matches!(
            validate_icon_file(&path),
            Err(IconRejection::Undecodable { .. })
        ));
    }
}
