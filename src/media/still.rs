use std::path::Path;

use image::{ImageFormat, ImageReader};

use crate::error::{RelayError, RelayResult};
use crate::frame::Frame;

/// Decode an image file, sniffing the format from its bytes.
pub fn decode_image_file(path: &Path) -> RelayResult<Frame> {
    let reader = ImageReader::open(path)
        .map_err(|e| RelayError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| RelayError::io(path, e))?;
    if reader.format().is_none() {
        return Err(RelayError::decode(format!(
            "unrecognised image format in {}",
            path.display()
        )));
    }
    let image = reader
        .decode()
        .map_err(|e| RelayError::decode_with(format!("decode {}", path.display()), e))?;
    Frame::from_image(image.to_rgb8())
        .map_err(|e| RelayError::decode_with(format!("decode {}", path.display()), e))
}

/// Encode `frame` to `path`; the format follows the extension (JPEG when
/// unknown).
pub fn encode_image_file(frame: &Frame, path: &Path) -> RelayResult<()> {
    let format = ImageFormat::from_path(path).unwrap_or(ImageFormat::Jpeg);
    let image = frame
        .to_image()
        .ok_or_else(|| RelayError::encode("frame buffer does not match its dimensions"))?;
    image
        .save_with_format(path, format)
        .map_err(|e| RelayError::encode_with(format!("write {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_round_trip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::filled(9, 4, [1, 128, 250]).unwrap();
        encode_image_file(&frame, &path).unwrap();
        assert_eq!(decode_image_file(&path).unwrap(), frame);
    }

    #[test]
    fn decodes_the_document_formats_accepted_from_chat() {
        let dir = tempfile::tempdir().unwrap();
        let frame = Frame::filled(6, 5, [200, 40, 10]).unwrap();
        for name in ["frame.bmp", "frame.webp"] {
            let path = dir.path().join(name);
            encode_image_file(&frame, &path).unwrap();
            assert_eq!(decode_image_file(&path).unwrap(), frame, "{}", name);
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        let err = decode_image_file(&path).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }
}
