use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ParserError;

pub const NUM_TEXTURE_SLOTS: usize = 9;

/// "no block" / "no string" sentinel used by every ref field.
pub const NIF_NONE_REF: u32 = 0xFFFF_FFFF;

/// Block type names that count as renderable shapes. The ordinal of a shape
/// within this filtered sequence is its 3D index, which plugin
/// alternate-texture records key on.
pub const SHAPE_BLOCK_TYPES: &[&str] = &[
    "NiTriShape",
    "NiTriStrips",
    "BSTriShape",
    "BSDynamicTriShape",
    "BSLODTriShape",
    "BSMeshLODTriShape",
    "BSSubIndexTriShape",
];

/// The nine texture slots of a BSShaderTextureSet.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum TextureSlot {
    Diffuse = 0,
    Normal = 1,
    Glow = 2,
    Parallax = 3,
    Cubemap = 4,
    EnvMask = 5,
    MultiLayer = 6,
    Backlight = 7,
    Unused = 8,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; NUM_TEXTURE_SLOTS] = [
        TextureSlot::Diffuse,
        TextureSlot::Normal,
        TextureSlot::Glow,
        TextureSlot::Parallax,
        TextureSlot::Cubemap,
        TextureSlot::EnvMask,
        TextureSlot::MultiLayer,
        TextureSlot::Backlight,
        TextureSlot::Unused,
    ];
}

/// BSLightingShaderProperty shader type, serialized ahead of the block body.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum LightingShaderType {
    Default = 0,
    EnvironmentMap = 1,
    Glow = 2,
    Parallax = 3,
    FaceTint = 4,
    SkinTint = 5,
    HairTint = 6,
    ParallaxOcclusion = 7,
    MultitextureLandscape = 8,
    LodLandscape = 9,
    Snow = 10,
    MultiLayerParallax = 11,
    TreeAnim = 12,
    LodObjects = 13,
    SparkleSnow = 14,
    LodObjectsHd = 15,
    EyeEnvmap = 16,
    Cloud = 17,
    LodLandscapeNoise = 18,
    MultitextureLandscapeLodBlend = 19,
    Dismemberment = 20,
}

bitflags! {
    /// SkyrimShaderPropertyFlags1
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ShaderFlags1: u32 {
        const SPECULAR = 1 << 0;
        const SKINNED = 1 << 1;
        const TEMP_REFRACTION = 1 << 2;
        const VERTEX_ALPHA = 1 << 3;
        const GREYSCALE_TO_PALETTE_COLOR = 1 << 4;
        const GREYSCALE_TO_PALETTE_ALPHA = 1 << 5;
        const USE_FALLOFF = 1 << 6;
        const ENVIRONMENT_MAPPING = 1 << 7;
        const RECEIVE_SHADOWS = 1 << 8;
        const CAST_SHADOWS = 1 << 9;
        const FACEGEN_DETAIL_MAP = 1 << 10;
        const PARALLAX = 1 << 11;
        const MODEL_SPACE_NORMALS = 1 << 12;
        const NON_PROJECTIVE_SHADOWS = 1 << 13;
        const LANDSCAPE = 1 << 14;
        const REFRACTION = 1 << 15;
        const FIRE_REFRACTION = 1 << 16;
        const EYE_ENVIRONMENT_MAPPING = 1 << 17;
        const HAIR_SOFT_LIGHTING = 1 << 18;
        const SCREENDOOR_ALPHA_FADE = 1 << 19;
        const LOCALMAP_HIDE_SECRET = 1 << 20;
        const FACEGEN_RGB_TINT = 1 << 21;
        const OWN_EMIT = 1 << 22;
        const PROJECTED_UV = 1 << 23;
        const MULTIPLE_TEXTURES = 1 << 24;
        const REMAPPABLE_TEXTURES = 1 << 25;
        const DECAL = 1 << 26;
        const DYNAMIC_DECAL = 1 << 27;
        const PARALLAX_OCCLUSION = 1 << 28;
        const EXTERNAL_EMITTANCE = 1 << 29;
        const SOFT_EFFECT = 1 << 30;
        const ZBUFFER_TEST = 1 << 31;
    }
}

bitflags! {
    /// SkyrimShaderPropertyFlags2
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ShaderFlags2: u32 {
        const ZBUFFER_WRITE = 1 << 0;
        const LOD_LANDSCAPE = 1 << 1;
        const LOD_OBJECTS = 1 << 2;
        const NO_FADE = 1 << 3;
        const DOUBLE_SIDED = 1 << 4;
        const VERTEX_COLORS = 1 << 5;
        const GLOW_MAP = 1 << 6;
        const ASSUME_SHADOWMASK = 1 << 7;
        const PACKED_TANGENT = 1 << 8;
        const MULTI_INDEX_SNOW = 1 << 9;
        const VERTEX_LIGHTING = 1 << 10;
        const UNIFORM_SCALE = 1 << 11;
        const FIT_SLOPE = 1 << 12;
        const BILLBOARD = 1 << 13;
        const NO_LOD_LAND_BLEND = 1 << 14;
        const ENVMAP_LIGHT_FADE = 1 << 15;
        const WIREFRAME = 1 << 16;
        const WEAPON_BLOOD = 1 << 17;
        const HIDE_ON_LOCAL_MAP = 1 << 18;
        const PREMULT_ALPHA = 1 << 19;
        const CLOUD_LOD = 1 << 20;
        const ANISOTROPIC_LIGHTING = 1 << 21;
        const NO_TRANSPARENCY_MULTISAMPLING = 1 << 22;
        const UNUSED01 = 1 << 23;
        const MULTI_LAYER_PARALLAX = 1 << 24;
        const SOFT_LIGHTING = 1 << 25;
        const RIM_LIGHTING = 1 << 26;
        const BACK_LIGHTING = 1 << 27;
        const UNUSED02 = 1 << 28;
        const TREE_ANIM = 1 << 29;
        const EFFECT_LIGHTING = 1 << 30;
        const HD_LOD_OBJECTS = 1 << 31;
    }
}

/// BSVertexDesc attribute bit for per-vertex colors.
const VERTEX_ATTR_COLOR: u64 = 1 << (44 + 5);

/// BSTriShape-family geometry block. Everything after the alpha property ref
/// is carried opaquely in `tail` (vertex streams, triangles, LOD extras).
#[derive(Debug, Clone, PartialEq)]
pub struct TriShape {
    pub name_ref: u32,
    pub extra_refs: Vec<u32>,
    pub controller_ref: u32,
    pub flags: u32,
    pub translation: [f32; 3],
    pub rotation: [f32; 9],
    pub scale: f32,
    pub collision_ref: u32,
    pub bounding_sphere: [f32; 4],
    pub skin_ref: u32,
    pub shader_ref: u32,
    pub alpha_ref: u32,
    pub vertex_desc: u64,
    pub tail: Vec<u8>,
}

impl TriShape {
    pub fn new() -> Self {
        Self {
            name_ref: NIF_NONE_REF,
            extra_refs: Vec::new(),
            controller_ref: NIF_NONE_REF,
            flags: 0x000E_0000,
            translation: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            scale: 1.0,
            collision_ref: NIF_NONE_REF,
            bounding_sphere: [0.0; 4],
            skin_ref: NIF_NONE_REF,
            shader_ref: NIF_NONE_REF,
            alpha_ref: NIF_NONE_REF,
            vertex_desc: 0,
            tail: Vec::new(),
        }
    }

    pub fn is_skinned(&self) -> bool {
        self.skin_ref != NIF_NONE_REF
    }

    pub fn has_vertex_colors(&self) -> bool {
        self.vertex_desc & VERTEX_ATTR_COLOR != 0
    }
}

impl Default for TriShape {
    fn default() -> Self {
        Self::new()
    }
}

/// BSLightingShaderProperty. Decoded through the fields the patchers touch;
/// `env_map_scale` is present on disk only for the EnvironmentMap type.
#[derive(Debug, Clone, PartialEq)]
pub struct LightingShaderProperty {
    pub shader_type: LightingShaderType,
    pub name_ref: u32,
    pub extra_refs: Vec<u32>,
    pub controller_ref: u32,
    pub flags1: ShaderFlags1,
    pub flags2: ShaderFlags2,
    pub uv_offset: [f32; 2],
    pub uv_scale: [f32; 2],
    pub texture_set_ref: u32,
    pub emissive_color: [f32; 3],
    pub emissive_mult: f32,
    pub texture_clamp_mode: u32,
    pub alpha: f32,
    pub refraction_strength: f32,
    pub glossiness: f32,
    pub specular_color: [f32; 3],
    pub specular_strength: f32,
    pub lighting_effect1: f32,
    pub lighting_effect2: f32,
    pub env_map_scale: Option<f32>,
    pub tail: Vec<u8>,
}

/// Shader floats compare within this tolerance before a write is considered
/// a change.
pub const MIN_FLOAT_COMPARISON: f32 = 1e-4;

impl LightingShaderProperty {
    pub fn new(shader_type: LightingShaderType) -> Self {
        Self {
            shader_type,
            name_ref: NIF_NONE_REF,
            extra_refs: Vec::new(),
            controller_ref: NIF_NONE_REF,
            flags1: ShaderFlags1::ZBUFFER_TEST,
            flags2: ShaderFlags2::ZBUFFER_WRITE,
            uv_offset: [0.0, 0.0],
            uv_scale: [1.0, 1.0],
            texture_set_ref: NIF_NONE_REF,
            emissive_color: [0.0; 3],
            emissive_mult: 1.0,
            texture_clamp_mode: 3,
            alpha: 1.0,
            refraction_strength: 0.0,
            glossiness: 80.0,
            specular_color: [1.0; 3],
            specular_strength: 1.0,
            lighting_effect1: 0.3,
            lighting_effect2: 2.0,
            env_map_scale: if shader_type == LightingShaderType::EnvironmentMap {
                Some(1.0)
            } else {
                None
            },
            tail: Vec::new(),
        }
    }

    /// Returns true when the type actually changed. Switching to or away from
    /// EnvironmentMap adds or drops the env-map-scale field.
    pub fn set_shader_type(&mut self, shader_type: LightingShaderType) -> bool {
        if self.shader_type == shader_type {
            return false;
        }

        self.shader_type = shader_type;
        self.env_map_scale = if shader_type == LightingShaderType::EnvironmentMap {
            Some(self.env_map_scale.unwrap_or(1.0))
        } else {
            None
        };
        true
    }

    pub fn set_flag1(&mut self, flag: ShaderFlags1, enable: bool) -> bool {
        if self.flags1.contains(flag) == enable {
            return false;
        }
        self.flags1.set(flag, enable);
        true
    }

    pub fn set_flag2(&mut self, flag: ShaderFlags2, enable: bool) -> bool {
        if self.flags2.contains(flag) == enable {
            return false;
        }
        self.flags2.set(flag, enable);
        true
    }

    pub fn set_float(value: &mut f32, new_value: f32) -> bool {
        if (*value - new_value).abs() > MIN_FLOAT_COMPARISON {
            *value = new_value;
            return true;
        }
        false
    }
}

/// BSEffectShaderProperty, decoded through the texture clamp mode; the
/// falloff and color fields beyond it stay opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectShaderProperty {
    pub name_ref: u32,
    pub extra_refs: Vec<u32>,
    pub controller_ref: u32,
    pub flags1: ShaderFlags1,
    pub flags2: ShaderFlags2,
    pub uv_offset: [f32; 2],
    pub uv_scale: [f32; 2],
    pub source_texture: String,
    pub texture_clamp_mode: u32,
    pub tail: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShaderTextureSet {
    pub textures: Vec<String>,
}

impl ShaderTextureSet {
    pub fn new() -> Self {
        Self {
            textures: vec![String::new(); NUM_TEXTURE_SLOTS],
        }
    }

    /// The nine slots, padded or truncated to the fixed length.
    pub fn slots(&self) -> [String; NUM_TEXTURE_SLOTS] {
        let mut out: [String; NUM_TEXTURE_SLOTS] = Default::default();
        for (i, slot) in out.iter_mut().enumerate() {
            if let Some(tex) = self.textures.get(i) {
                *slot = tex.clone();
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnknownBlock {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    TriShape(TriShape),
    LightingShader(LightingShaderProperty),
    EffectShader(EffectShaderProperty),
    TextureSet(ShaderTextureSet),
    Unknown(UnknownBlock),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NifBlock {
    pub type_name: String,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NifFile {
    pub user_version: u32,
    pub bs_version: u32,
    pub author: String,
    pub process_script: String,
    pub export_script: String,
    pub strings: Vec<String>,
    pub blocks: Vec<NifBlock>,
}

impl NifFile {
    pub fn new() -> Self {
        Self {
            user_version: 12,
            bs_version: 100,
            author: String::new(),
            process_script: String::new(),
            export_script: String::new(),
            strings: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn add_string(&mut self, value: &str) -> u32 {
        if let Some(idx) = self.strings.iter().position(|s| s == value) {
            return idx as u32;
        }
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    pub fn string(&self, string_ref: u32) -> &str {
        if string_ref == NIF_NONE_REF {
            return "";
        }
        self.strings.get(string_ref as usize).map(String::as_str).unwrap_or("")
    }

    pub fn add_block(&mut self, type_name: &str, block: Block) -> usize {
        self.blocks.push(NifBlock {
            type_name: type_name.to_string(),
            block,
        });
        self.blocks.len() - 1
    }

    /// Every renderable shape with its block id and 3D index. The 3D index is
    /// the ordinal among shape-typed blocks, which is what plugin
    /// alternate-texture records reference.
    pub fn shapes(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut index3d = 0usize;
        for (block_id, nif_block) in self.blocks.iter().enumerate() {
            if SHAPE_BLOCK_TYPES.contains(&nif_block.type_name.as_str()) {
                out.push((block_id, index3d));
                index3d += 1;
            }
        }
        out
    }

    /// Normalizes block order before save: shapes sorted by display name
    /// (stable on the original order), each followed by its shader property
    /// and the shader's texture set, then every remaining block in its
    /// original order. All refs in decoded blocks are remapped to the new
    /// ids. Files carrying opaque blocks are left untouched, since those may
    /// embed refs this codec cannot rewrite.
    ///
    /// Returns the old-block-id -> new-block-id mapping; identity when no
    /// reorder happened. Shape 3D indices shift with the sorted order, so
    /// callers that mirror indices into plugin records must diff the shape
    /// list before and after.
    pub fn sort_blocks(&mut self) -> Vec<usize> {
        let identity: Vec<usize> = (0..self.blocks.len()).collect();

        if self.blocks.iter().any(|b| matches!(b.block, Block::Unknown(_))) {
            return identity;
        }

        let mut shape_ids: Vec<usize> = self.shapes().iter().map(|(block_id, _)| *block_id).collect();
        shape_ids.sort_by(|a, b| {
            self.block_display_name(*a)
                .cmp(self.block_display_name(*b))
                .then(a.cmp(b))
        });

        let mut order: Vec<usize> = Vec::with_capacity(self.blocks.len());
        let mut placed = vec![false; self.blocks.len()];
        let place = |order: &mut Vec<usize>, placed: &mut Vec<bool>, block_id: usize| {
            if block_id < placed.len() && !placed[block_id] {
                placed[block_id] = true;
                order.push(block_id);
            }
        };

        for shape_id in shape_ids {
            place(&mut order, &mut placed, shape_id);

            let Some(shader_id) = self.shader_for_shape(shape_id) else {
                continue;
            };
            if self.lighting_shader(shader_id).is_none() {
                continue;
            }
            place(&mut order, &mut placed, shader_id);

            if let Some(set_id) = self.texture_set_for_shape(shape_id) {
                place(&mut order, &mut placed, set_id);
            }
        }
        for block_id in 0..self.blocks.len() {
            place(&mut order, &mut placed, block_id);
        }

        if order == identity {
            return identity;
        }

        let mut mapping = vec![0usize; self.blocks.len()];
        for (new_id, old_id) in order.iter().enumerate() {
            mapping[*old_id] = new_id;
        }

        let remap = |block_ref: u32| -> u32 {
            if block_ref == NIF_NONE_REF || block_ref as usize >= mapping.len() {
                // none and dangling refs pass through untouched
                return block_ref;
            }
            mapping[block_ref as usize] as u32
        };

        let mut old_blocks: Vec<Option<NifBlock>> = std::mem::take(&mut self.blocks).into_iter().map(Some).collect();
        self.blocks = order
            .iter()
            .map(|old_id| old_blocks[*old_id].take().expect("every block placed exactly once"))
            .collect();

        for nif_block in &mut self.blocks {
            match &mut nif_block.block {
                Block::TriShape(shape) => {
                    shape.controller_ref = remap(shape.controller_ref);
                    for extra_ref in &mut shape.extra_refs {
                        *extra_ref = remap(*extra_ref);
                    }
                    shape.collision_ref = remap(shape.collision_ref);
                    shape.skin_ref = remap(shape.skin_ref);
                    shape.shader_ref = remap(shape.shader_ref);
                    shape.alpha_ref = remap(shape.alpha_ref);
                }
                Block::LightingShader(shader) => {
                    shader.controller_ref = remap(shader.controller_ref);
                    shader.texture_set_ref = remap(shader.texture_set_ref);
                }
                Block::EffectShader(shader) => {
                    shader.controller_ref = remap(shader.controller_ref);
                }
                Block::TextureSet(_) => {}
                Block::Unknown(_) => unreachable!("opaque blocks bail out before sorting"),
            }
        }

        mapping
    }

    pub fn tri_shape(&self, block_id: usize) -> Option<&TriShape> {
        match self.blocks.get(block_id).map(|b| &b.block) {
            Some(Block::TriShape(shape)) => Some(shape),
            _ => None,
        }
    }

    pub fn tri_shape_mut(&mut self, block_id: usize) -> Option<&mut TriShape> {
        match self.blocks.get_mut(block_id).map(|b| &mut b.block) {
            Some(Block::TriShape(shape)) => Some(shape),
            _ => None,
        }
    }

    /// Block id of the shape's BSLightingShaderProperty, if it has one.
    pub fn shader_for_shape(&self, shape_block: usize) -> Option<usize> {
        let shape = self.tri_shape(shape_block)?;
        if shape.shader_ref == NIF_NONE_REF {
            return None;
        }
        Some(shape.shader_ref as usize)
    }

    pub fn lighting_shader(&self, block_id: usize) -> Option<&LightingShaderProperty> {
        match self.blocks.get(block_id).map(|b| &b.block) {
            Some(Block::LightingShader(shader)) => Some(shader),
            _ => None,
        }
    }

    pub fn lighting_shader_mut(&mut self, block_id: usize) -> Option<&mut LightingShaderProperty> {
        match self.blocks.get_mut(block_id).map(|b| &mut b.block) {
            Some(Block::LightingShader(shader)) => Some(shader),
            _ => None,
        }
    }

    /// Block id of the texture set attached to the shape's shader.
    pub fn texture_set_for_shape(&self, shape_block: usize) -> Option<usize> {
        let shader_block = self.shader_for_shape(shape_block)?;
        let shader = self.lighting_shader(shader_block)?;
        if shader.texture_set_ref == NIF_NONE_REF {
            return None;
        }

        let set_ref = shader.texture_set_ref as usize;
        match self.blocks.get(set_ref).map(|b| &b.block) {
            Some(Block::TextureSet(_)) => Some(set_ref),
            _ => None,
        }
    }

    /// The shape's nine texture slots, lowercased for canonical comparison.
    /// Slots come back empty when the shape has no (or a dangling) set.
    pub fn texture_slots(&self, shape_block: usize) -> [String; NUM_TEXTURE_SLOTS] {
        let Some(set_block) = self.texture_set_for_shape(shape_block) else {
            return Default::default();
        };

        let Some(Block::TextureSet(set)) = self.blocks.get(set_block).map(|b| &b.block) else {
            return Default::default();
        };

        let mut slots = set.slots();
        for slot in &mut slots {
            *slot = slot.to_lowercase();
        }
        slots
    }

    /// Writes one slot; returns whether the stored value changed (comparison
    /// is case-insensitive, matching the game's path handling).
    pub fn set_texture_slot(
        &mut self,
        shape_block: usize,
        slot: TextureSlot,
        texture: &str,
    ) -> Result<bool, ParserError> {
        if !texture.is_ascii() {
            return Err(ParserError::NonAsciiTextureSlot {
                slot: texture.to_string(),
            });
        }

        let Some(set_block) = self.texture_set_for_shape(shape_block) else {
            return Ok(false);
        };

        let Some(Block::TextureSet(set)) = self.blocks.get_mut(set_block).map(|b| &mut b.block) else {
            return Ok(false);
        };

        let idx = u32::from(slot) as usize;
        while set.textures.len() < NUM_TEXTURE_SLOTS {
            set.textures.push(String::new());
        }

        if set.textures[idx].eq_ignore_ascii_case(texture) {
            return Ok(false);
        }

        set.textures[idx] = texture.to_string();
        Ok(true)
    }

    /// The display name of a block, resolved through the string table.
    pub fn block_display_name(&self, block_id: usize) -> &str {
        let name_ref = match self.blocks.get(block_id).map(|b| &b.block) {
            Some(Block::TriShape(shape)) => shape.name_ref,
            Some(Block::LightingShader(shader)) => shader.name_ref,
            Some(Block::EffectShader(shader)) => shader.name_ref,
            _ => NIF_NONE_REF,
        };
        self.string(name_ref)
    }

    pub fn block_type_name(&self, block_id: usize) -> &str {
        self.blocks.get(block_id).map(|b| b.type_name.as_str()).unwrap_or("")
    }

    /// Checks every shape's texture slots for the lower-ASCII constraint.
    /// Dangling texture-set refs are tolerated (the shape is simply skipped
    /// by consumers); non-ASCII slots reject the whole file.
    pub fn validate_slots(&self) -> Result<(), ParserError> {
        for nif_block in &self.blocks {
            if let Block::TextureSet(set) = &nif_block.block {
                for texture in &set.textures {
                    if !texture.is_ascii() {
                        return Err(ParserError::NonAsciiTextureSlot {
                            slot: texture.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for NifFile {
    fn default() -> Self {
        Self::new()
    }
}
