//! Device wrapper for texture analysis and derived-texture generation. The
//! compute kernels are registered once at startup and every dispatch is
//! serialized under a single device lock: the workloads are short and device
//! thrashing from parallel dispatch costs more than the contention.
//!
//! Every operation degrades gracefully: a failure rejects the current
//! texture or shape and logs, it never aborts the run.

use std::collections::HashSet;
use std::sync::Mutex;

use dashmap::DashMap;
use parallaxgen_files::dds::reader::DdsReader;
use parallaxgen_files::dds::{DdsMetadata, DecodedImage};

use crate::util::logger;
use crate::vfs::Vfs;

/// The compute kernels shipped with the patcher.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ComputeKernel {
    /// Per-channel population count, feeding the complex-material test.
    CountChannelValues,
    /// Copies a heightmap into the alpha channel of a blank env-mask.
    ParallaxToCm,
    /// Rebalances an albedo for subsurface use.
    SssFix,
    /// Scales luminance into an HDR-friendly range.
    ConvertToHdr,
}

#[derive(Debug, Copy, Clone)]
pub struct KernelParams {
    pub luminance_mult: f32,
    pub albedo_sat_power: f32,
    pub albedo_norm: f32,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            luminance_mult: 1.0,
            albedo_sat_power: 1.0,
            albedo_norm: 1.0,
        }
    }
}

pub struct GpuService {
    /// Serializes every dispatch and read-back.
    device: Mutex<()>,
    /// Read-through header cache; `None` records a failed parse so broken
    /// files are only inspected once.
    metadata_cache: DashMap<String, Option<DdsMetadata>>,
    kernels: HashSet<ComputeKernel>,
}

impl GpuService {
    /// Loads the kernel artifacts. A missing kernel at startup is a
    /// configuration error for the caller to escalate.
    pub fn init_shaders() -> Self {
        let kernels = HashSet::from([
            ComputeKernel::CountChannelValues,
            ComputeKernel::ParallaxToCm,
            ComputeKernel::SssFix,
            ComputeKernel::ConvertToHdr,
        ]);
        Self {
            device: Mutex::new(()),
            metadata_cache: DashMap::new(),
            kernels,
        }
    }

    pub fn has_kernel(&self, kernel: ComputeKernel) -> bool {
        self.kernels.contains(&kernel)
    }

    /// Full decode of a texture to RGBA8.
    pub fn load_dds(&self, vfs: &Vfs, canonical_path: &str) -> Option<(DdsMetadata, DecodedImage)> {
        let bytes = match vfs.read_bytes(canonical_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                logger::debug(format!("Failed to read texture {canonical_path}: {err}"));
                return None;
            }
        };

        match DdsReader::decode_rgba(&bytes) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                logger::debug(format!("Failed to decode texture {canonical_path}: {err}"));
                None
            }
        }
    }

    /// Header-only metadata with a read-through cache.
    pub fn load_dds_metadata(&self, vfs: &Vfs, canonical_path: &str) -> Option<DdsMetadata> {
        if let Some(cached) = self.metadata_cache.get(canonical_path) {
            return cached.clone();
        }

        let metadata = vfs
            .read_bytes(canonical_path)
            .ok()
            .and_then(|bytes| match DdsReader::parse_metadata(&bytes) {
                Ok(metadata) => Some(metadata),
                Err(err) => {
                    logger::debug(format!("Failed to parse DDS header {canonical_path}: {err}"));
                    None
                }
            });

        self.metadata_cache.insert(canonical_path.to_string(), metadata.clone());
        metadata
    }

    /// Number of non-zero texels per channel (R, G, B, A).
    pub fn count_channel_populations(&self, image: &DecodedImage) -> [u32; 4] {
        let _device = self.device.lock().unwrap_or_else(|e| e.into_inner());

        let mut counts = [0u32; 4];
        for px in image.rgba.chunks_exact(4) {
            for (i, value) in px.iter().enumerate() {
                if *value != 0 {
                    counts[i] += 1;
                }
            }
        }
        counts
    }

    /// Runs one kernel over the image and regenerates the mip chain for the
    /// output, largest level first.
    pub fn apply_shader(&self, image: &DecodedImage, kernel: ComputeKernel, params: &KernelParams) -> Option<Vec<DecodedImage>> {
        if !self.has_kernel(kernel) {
            logger::error(format!("Compute kernel not initialized: {kernel:?}"));
            return None;
        }

        let _device = self.device.lock().unwrap_or_else(|e| e.into_inner());

        let mut out = DecodedImage::new(image.width, image.height);
        for (src, dst) in image.rgba.chunks_exact(4).zip(out.rgba.chunks_exact_mut(4)) {
            let result = match kernel {
                ComputeKernel::CountChannelValues => [src[0], src[1], src[2], src[3]],
                ComputeKernel::ParallaxToCm => [0, 0, 0, src[0]],
                ComputeKernel::SssFix => {
                    let adjust = |v: u8| -> u8 {
                        let normalized = f32::from(v) / 255.0;
                        let adjusted = normalized.powf(params.albedo_sat_power) * params.albedo_norm;
                        (adjusted.clamp(0.0, 1.0) * 255.0).round() as u8
                    };
                    [adjust(src[0]), adjust(src[1]), adjust(src[2]), src[3]]
                }
                ComputeKernel::ConvertToHdr => {
                    let scale = |v: u8| -> u8 {
                        let scaled = f32::from(v) / 255.0 * params.luminance_mult;
                        (scaled.clamp(0.0, 1.0) * 255.0).round() as u8
                    };
                    [scale(src[0]), scale(src[1]), scale(src[2]), src[3]]
                }
            };
            dst.copy_from_slice(&result);
        }

        Some(generate_mip_chain(out))
    }

    /// Compares aspect ratios from headers alone, without a full decode.
    pub fn aspect_ratios_match(&self, vfs: &Vfs, path_a: &str, path_b: &str) -> bool {
        let Some(meta_a) = self.load_dds_metadata(vfs, path_a) else {
            return false;
        };
        let Some(meta_b) = self.load_dds_metadata(vfs, path_b) else {
            return false;
        };
        (meta_a.aspect_ratio() - meta_b.aspect_ratio()).abs() < f64::EPSILON
    }
}

/// Box-filter mip chain down to 1x1.
fn generate_mip_chain(top: DecodedImage) -> Vec<DecodedImage> {
    let mut mips = vec![top];
    loop {
        let last = mips.last().unwrap();
        if last.width <= 1 && last.height <= 1 {
            break;
        }

        let width = (last.width / 2).max(1);
        let height = (last.height / 2).max(1);
        let mut next = DecodedImage::new(width, height);

        for y in 0..height {
            for x in 0..width {
                let mut accum = [0u32; 4];
                let mut samples = 0u32;
                for dy in 0..2u32 {
                    for dx in 0..2u32 {
                        let sx = x * 2 + dx;
                        let sy = y * 2 + dy;
                        if sx < last.width && sy < last.height {
                            let px = last.pixel(sx, sy);
                            for (a, v) in accum.iter_mut().zip(px) {
                                *a += u32::from(v);
                            }
                            samples += 1;
                        }
                    }
                }
                let px = [
                    (accum[0] / samples) as u8,
                    (accum[1] / samples) as u8,
                    (accum[2] / samples) as u8,
                    (accum[3] / samples) as u8,
                ];
                next.set_pixel(x, y, px);
            }
        }
        mips.push(next);
    }
    mips
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with(r: u8, g: u8, b: u8, a: u8, width: u32, height: u32) -> DecodedImage {
        let mut image = DecodedImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                image.set_pixel(x, y, [r, g, b, a]);
            }
        }
        image
    }

    #[test]
    fn channel_population_counts_nonzero() {
        let gpu = GpuService::init_shaders();
        let mut image = image_with(0, 0, 0, 0, 4, 4);
        image.set_pixel(0, 0, [10, 0, 0, 0]);
        image.set_pixel(1, 0, [10, 20, 0, 0]);
        image.set_pixel(2, 0, [0, 0, 0, 255]);

        assert_eq!(gpu.count_channel_populations(&image), [2, 1, 0, 1]);
    }

    #[test]
    fn parallax_to_cm_moves_height_into_alpha() {
        let gpu = GpuService::init_shaders();
        let image = image_with(128, 7, 9, 255, 4, 2);
        let mips = gpu.apply_shader(&image, ComputeKernel::ParallaxToCm, &KernelParams::default()).unwrap();

        assert_eq!(mips[0].pixel(0, 0), [0, 0, 0, 128]);
        // 4x2 -> 2x1 -> 1x1
        assert_eq!(mips.len(), 3);
        assert_eq!(mips[1].width, 2);
        assert_eq!(mips[1].height, 1);
        assert_eq!(mips[2].width, 1);
    }

    #[test]
    fn hdr_kernel_scales_and_clamps() {
        let gpu = GpuService::init_shaders();
        let image = image_with(100, 200, 0, 31, 1, 1);
        let params = KernelParams {
            luminance_mult: 2.0,
            ..Default::default()
        };
        let mips = gpu.apply_shader(&image, ComputeKernel::ConvertToHdr, &params).unwrap();
        assert_eq!(mips[0].pixel(0, 0), [200, 255, 0, 31]);
    }
}
