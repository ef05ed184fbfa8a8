use serde::{Deserialize, Serialize};

/// Packed, row-major pixel layouts the recorder can stream to ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Rgba,
    Bgra,
    Gray8,
}

impl PixelFormat {
    pub const ALL: &[PixelFormat] = &[
        PixelFormat::Rgb24,
        PixelFormat::Rgba,
        PixelFormat::Bgra,
        PixelFormat::Gray8,
    ];

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Name accepted by ffmpeg's `-pix_fmt` for rawvideo input.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Gray8 => "gray",
        }
    }

    /// Byte length of one `width x height` frame in this layout.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * self.bytes_per_pixel()
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::rgb24(PixelFormat::Rgb24, 3, "rgb24")]
    #[case::rgba(PixelFormat::Rgba, 4, "rgba")]
    #[case::bgra(PixelFormat::Bgra, 4, "bgra")]
    #[case::gray(PixelFormat::Gray8, 1, "gray")]
    fn test_layout(#[case] format: PixelFormat, #[case] bpp: usize, #[case] name: &str) {
        assert_eq!(format.bytes_per_pixel(), bpp);
        assert_eq!(format.ffmpeg_name(), name);
        assert_eq!(format.to_string(), name);
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(PixelFormat::Rgb24.frame_len(640, 480), 640 * 480 * 3);
        assert_eq!(PixelFormat::Gray8.frame_len(3, 2), 6);
        assert_eq!(PixelFormat::Rgba.frame_len(0, 10), 0);
    }

    #[test]
    fn test_default_is_rgb24() {
        assert_eq!(PixelFormat::default(), PixelFormat::Rgb24);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&PixelFormat::Bgra).unwrap();
        assert_eq!(json, "\"bgra\"");
        let parsed: PixelFormat = serde_json::from_str("\"gray8\"").unwrap();
        assert_eq!(parsed, PixelFormat::Gray8);
    }
}
