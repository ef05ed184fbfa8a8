use std::sync::Arc;

use thiserror::Error;

use crate::shared::pixel_format::PixelFormat;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame data is {actual} bytes, expected {expected} for {width}x{height} {format}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },
}

/// Whether a buffer is responsible for its pixel memory or only views it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owning,
    Aliasing,
}

/// A raw frame: contiguous pixel bytes in row-major order, no padding.
///
/// Memory is reference counted. An *owning* buffer is the one produced by
/// a copy; `alias()` hands out *aliasing* views of the same bytes without
/// copying them. The recorder queues aliases ahead of their owner, so the
/// owner is always the last handle to be dropped.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    format: PixelFormat,
    ownership: Ownership,
}

impl FrameBuffer {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, FrameError> {
        let expected = format.frame_len(width, height);
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width,
                height,
                format,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data: Arc::from(data),
            width,
            height,
            format,
            ownership: Ownership::Owning,
        })
    }

    /// Zero-filled buffer of the given size.
    pub fn allocate(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: Arc::from(vec![0u8; format.frame_len(width, height)]),
            width,
            height,
            format,
            ownership: Ownership::Owning,
        }
    }

    /// Independent owning copy of the pixel bytes.
    pub fn deep_copy(&self) -> Self {
        Self {
            data: Arc::from(&self.data[..]),
            width: self.width,
            height: self.height,
            format: self.format,
            ownership: Ownership::Owning,
        }
    }

    /// View of this buffer's memory that does not own it.
    pub fn alias(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            width: self.width,
            height: self.height,
            format: self.format,
            ownership: Ownership::Aliasing,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixels, available only while no alias shares the memory.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn is_owning(&self) -> bool {
        self.ownership == Ownership::Owning
    }

    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when both buffers view the same memory.
    pub fn is_alias_of(&self, other: &FrameBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Number of live handles (owner plus aliases) sharing this memory.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.data)
    }
}

impl From<image::RgbImage> for FrameBuffer {
    fn from(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: Arc::from(img.into_raw()),
            width,
            height,
            format: PixelFormat::Rgb24,
            ownership: Ownership::Owning,
        }
    }
}

impl From<image::RgbaImage> for FrameBuffer {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            data: Arc::from(img.into_raw()),
            width,
            height,
            format: PixelFormat::Rgba,
            ownership: Ownership::Owning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> FrameBuffer {
        let len = PixelFormat::Rgb24.frame_len(width, height);
        let data = (0..len).map(|i| (i % 251) as u8).collect();
        FrameBuffer::new(data, width, height, PixelFormat::Rgb24).unwrap()
    }

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![7u8; 12]; // 2x2 rgb24
        let frame = FrameBuffer::new(data.clone(), 2, 2, PixelFormat::Rgb24).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.format(), PixelFormat::Rgb24);
        assert_eq!(frame.data(), &data[..]);
        assert!(frame.is_owning());
        assert!(frame.is_allocated());
    }

    #[test]
    fn test_mismatched_data_length_is_rejected() {
        let err = FrameBuffer::new(vec![0u8; 10], 2, 2, PixelFormat::Rgb24).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                width: 2,
                height: 2,
                format: PixelFormat::Rgb24,
                expected: 12,
                actual: 10,
            }
        );
    }

    #[test]
    fn test_deep_copy_reads_back_identical_bytes() {
        let source = gradient(17, 9);
        let copy = source.deep_copy();
        assert_eq!(copy.data(), source.data());
        assert!(!copy.is_alias_of(&source));
        assert!(copy.is_owning());
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let source = FrameBuffer::new(vec![100u8; 12], 2, 2, PixelFormat::Rgb24).unwrap();
        let mut copy = source.deep_copy();
        copy.data_mut().unwrap()[0] = 0;
        assert_eq!(source.data()[0], 100);
        assert_eq!(copy.data()[0], 0);
    }

    #[test]
    fn test_alias_shares_memory_without_owning() {
        let owner = gradient(4, 4);
        let alias = owner.alias();
        assert!(alias.is_alias_of(&owner));
        assert_eq!(alias.ownership(), Ownership::Aliasing);
        assert_eq!(alias.data().as_ptr(), owner.data().as_ptr());
        assert_eq!(owner.handle_count(), 2);
        drop(alias);
        assert_eq!(owner.handle_count(), 1);
    }

    #[test]
    fn test_data_mut_unavailable_while_aliased() {
        let mut owner = FrameBuffer::allocate(2, 1, PixelFormat::Gray8);
        let alias = owner.alias();
        assert!(owner.data_mut().is_none());
        drop(alias);
        owner.data_mut().unwrap()[1] = 9;
        assert_eq!(owner.data(), &[0, 9]);
    }

    #[test]
    fn test_zero_sized_buffer_is_unallocated() {
        let frame = FrameBuffer::allocate(0, 0, PixelFormat::Rgba);
        assert!(!frame.is_allocated());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_from_rgb_image() {
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]));
        let frame = FrameBuffer::from(img);
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.format(), PixelFormat::Rgb24);
        assert_eq!(frame.len(), 18);
        assert_eq!(&frame.data()[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_from_rgba_image() {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([9, 8, 7, 255]));
        let frame = FrameBuffer::from(img);
        assert_eq!(frame.format(), PixelFormat::Rgba);
        assert_eq!(frame.len(), 16);
    }
}
