//! Frame readback for still images and movie frames.

use super::RenderError;
use std::path::Path;

/// Tightly packed RGBA8 frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaFrame {
    pub fn save_png(&self, path: &Path) -> Result<(), RenderError> {
        use image::ImageEncoder;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        let encoder = image::codecs::png::PngEncoder::new_with_quality(
            file,
            image::codecs::png::CompressionType::Fast,
            image::codecs::png::FilterType::Adaptive,
        );
        encoder.write_image(
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )?;
        Ok(())
    }
}

fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strip row padding and swizzle BGRA to RGBA. Alpha is forced opaque.
fn unpack_rows(data: &[u8], width: u32, height: u32, padded: u32, bgra: bool) -> Vec<u8> {
    let row_bytes = (width * 4) as usize;
    let mut rgba = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * padded as usize;
        for px in data[start..start + row_bytes].chunks_exact(4) {
            if bgra {
                rgba.extend_from_slice(&[px[2], px[1], px[0], 255]);
            } else {
                rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
    }
    rgba
}

/// A texture copy recorded into an encoder, readable after submission.
pub struct PendingCapture {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded: u32,
    bgra: bool,
}

impl PendingCapture {
    /// Record a copy of `texture` into a mappable buffer. The texture needs
    /// `COPY_SRC` usage.
    pub fn record(
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        texture: &wgpu::Texture,
    ) -> Self {
        let width = texture.width();
        let height = texture.height();
        let padded = padded_row_bytes(width);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Capture Buffer"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        let bgra = matches!(
            texture.format(),
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        );
        Self {
            buffer,
            width,
            height,
            padded,
            bgra,
        }
    }

    /// Block until the copy lands and return the frame. Call after the
    /// encoder holding the copy has been submitted.
    pub fn read(self, device: &wgpu::Device) -> Result<RgbaFrame, RenderError> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        rx.recv().map_err(|_| RenderError::ReadbackLost)??;

        let pixels = {
            let data = slice.get_mapped_range();
            unpack_rows(&data, self.width, self.height, self.padded, self.bgra)
        };
        self.buffer.unmap();
        self.buffer.destroy();

        Ok(RgbaFrame {
            width: self.width,
            height: self.height,
            pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_row_bytes(64), 256);
        assert_eq!(padded_row_bytes(65), 512);
        assert_eq!(padded_row_bytes(1), 256);
    }

    #[test]
    fn test_unpack_strips_padding_and_swizzles() {
        let padded = padded_row_bytes(2);
        let mut data = vec![0u8; (padded * 2) as usize];
        data[0..8].copy_from_slice(&[1, 2, 3, 0, 4, 5, 6, 0]);
        let row2 = padded as usize;
        data[row2..row2 + 8].copy_from_slice(&[7, 8, 9, 0, 10, 11, 12, 0]);

        let bgra = unpack_rows(&data, 2, 2, padded, true);
        assert_eq!(bgra, vec![3, 2, 1, 255, 6, 5, 4, 255, 9, 8, 7, 255, 12, 11, 10, 255]);

        let rgba = unpack_rows(&data, 2, 2, padded, false);
        assert_eq!(&rgba[0..4], &[1, 2, 3, 255]);
        assert_eq!(rgba.len(), 16);
    }

    #[test]
    fn test_poll_failure_becomes_render_error() {
        let poll = || -> Result<(), RenderError> {
            Err::<(), _>(wgpu::PollError::Timeout)?;
            Ok(())
        };
        let err = poll().unwrap_err();
        assert!(matches!(err, RenderError::Poll(wgpu::PollError::Timeout)));
        assert!(err.to_string().starts_with("device poll failed"));
    }

    #[test]
    fn test_save_png_writes_file() {
        let dir = std::env::temp_dir().join(format!("brainstem_capture_{}", std::process::id()));
        let path = dir.join("frame.png");
        let frame = RgbaFrame {
            width: 2,
            height: 1,
            pixels: vec![255, 0, 0, 255, 0, 255, 0, 255],
        };
        frame.save_png(&path).unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
