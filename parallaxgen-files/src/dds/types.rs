/// Pixel formats the pipeline distinguishes. Everything else is carried as
/// `Other` with the raw DXGI id preserved in the metadata.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DdsFormat {
    Bc1,
    Bc2,
    Bc3,
    Bc7,
    Rgba8,
    Bgra8,
    Rgba16,
    Rgba16F,
    Rgba32F,
    Rgb10A2,
    Other,
}

impl DdsFormat {
    /// Whether the format carries a meaningful alpha channel at all.
    pub fn has_alpha(&self) -> bool {
        !matches!(self, DdsFormat::Bc1 | DdsFormat::Other)
    }

    pub fn is_block_compressed(&self) -> bool {
        matches!(self, DdsFormat::Bc1 | DdsFormat::Bc2 | DdsFormat::Bc3 | DdsFormat::Bc7)
    }

    /// Whether [`crate::dds::reader::DdsReader::decode_rgba`] can produce
    /// pixels for this format. BC7's bit-stream modes are out of scope.
    pub fn is_decodable(&self) -> bool {
        matches!(
            self,
            DdsFormat::Bc1 | DdsFormat::Bc2 | DdsFormat::Bc3 | DdsFormat::Rgba8 | DdsFormat::Bgra8
        )
    }
}

/// DDS_HEADER_DXT10 miscFlags2 & 0x7.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AlphaMode {
    Unknown,
    Straight,
    Premultiplied,
    Opaque,
    Custom,
}

impl From<u32> for AlphaMode {
    fn from(value: u32) -> Self {
        match value & 0x7 {
            1 => AlphaMode::Straight,
            2 => AlphaMode::Premultiplied,
            3 => AlphaMode::Opaque,
            4 => AlphaMode::Custom,
            _ => AlphaMode::Unknown,
        }
    }
}

/// Header-only view of a texture; obtainable without touching pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct DdsMetadata {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: DdsFormat,
    /// Raw DXGI format id when a DX10 header was present, 0 otherwise.
    pub dxgi_format: u32,
    pub alpha_mode: AlphaMode,
}

impl DdsMetadata {
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }
}

/// Top-level mip decoded to tightly packed RGBA8.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: vec![0u8; (width * height * 4) as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let off = ((y * self.width + x) * 4) as usize;
        [self.rgba[off], self.rgba[off + 1], self.rgba[off + 2], self.rgba[off + 3]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: [u8; 4]) {
        let off = ((y * self.width + x) * 4) as usize;
        self.rgba[off..off + 4].copy_from_slice(&value);
    }

    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }
}
