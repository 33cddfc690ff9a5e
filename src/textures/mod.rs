//! Texture semantics shared by the classifier and the patchers: the role a
//! texture plays, the suffix conventions that hint at it, and the search
//! maps the shader patchers resolve candidate bindings through.

use std::collections::{BTreeSet, HashMap, HashSet};

use bitflags::bitflags;
use parallaxgen_files::nif::{LightingShaderType, ShaderFlags1, ShaderFlags2, TextureSlot};
use serde::{Deserialize, Serialize};

use crate::util;

pub const NUM_TEXTURE_SLOTS: usize = parallaxgen_files::nif::NUM_TEXTURE_SLOTS;

/// The nine slot strings of one shape or TXST record, canonical lowercase.
pub type TextureSet = [String; NUM_TEXTURE_SLOTS];

/// Semantic role of a texture, independent of which slot it sits in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureType {
    Diffuse,
    Normal,
    ModelSpaceNormal,
    Emissive,
    SkinTint,
    SubsurfaceColor,
    Height,
    HeightPbr,
    Cubemap,
    EnvironmentMask,
    ComplexMaterial,
    Rmaos,
    SubsurfaceTint,
    InnerLayer,
    FuzzPbr,
    CoatNormalRoughness,
    Backlight,
    Specular,
    HairFlowMap,
    SubsurfacePbr,
    Unknown,
}

impl TextureType {
    /// The slot a texture of this role binds to.
    pub fn slot(&self) -> Option<TextureSlot> {
        match self {
            TextureType::Diffuse => Some(TextureSlot::Diffuse),
            TextureType::Normal | TextureType::ModelSpaceNormal => Some(TextureSlot::Normal),
            TextureType::Emissive | TextureType::SkinTint | TextureType::SubsurfaceColor => Some(TextureSlot::Glow),
            TextureType::Height | TextureType::HeightPbr => Some(TextureSlot::Parallax),
            TextureType::Cubemap => Some(TextureSlot::Cubemap),
            TextureType::EnvironmentMask | TextureType::ComplexMaterial | TextureType::Rmaos => {
                Some(TextureSlot::EnvMask)
            }
            TextureType::SubsurfaceTint
            | TextureType::InnerLayer
            | TextureType::FuzzPbr
            | TextureType::CoatNormalRoughness => Some(TextureSlot::MultiLayer),
            TextureType::Backlight | TextureType::Specular | TextureType::HairFlowMap | TextureType::SubsurfacePbr => {
                Some(TextureSlot::Backlight)
            }
            TextureType::Unknown => None,
        }
    }
}

bitflags! {
    /// Complex-material channel population, attached by the classifier.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct TextureAttributes: u8 {
        const CM_ENV_MASK = 1 << 0;
        const CM_GLOSSINESS = 1 << 1;
        const CM_METALNESS = 1 << 2;
        const CM_HEIGHT = 1 << 3;
    }
}

/// Mesh-level shader family a shape ends up patched as.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeShader {
    None,
    Unknown,
    VanillaParallax,
    ComplexMaterial,
    TruePbr,
}

impl ShapeShader {
    pub fn label(&self) -> &'static str {
        match self {
            ShapeShader::None => "Default",
            ShapeShader::Unknown => "Unknown",
            ShapeShader::VanillaParallax => "Parallax",
            ShapeShader::ComplexMaterial => "Complex Material",
            ShapeShader::TruePbr => "PBR",
        }
    }
}

/// One classified texture inside the search maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PgTexture {
    pub path: String,
    pub ttype: TextureType,
}

/// `slot -> base prefix -> textures` search structure plus the reverse
/// per-path role map. Frozen after classification; generated textures are
/// appended through the context's write lock.
#[derive(Debug, Default, PartialEq)]
pub struct TextureMappings {
    pub map: HashMap<TextureSlot, HashMap<String, HashSet<PgTexture>>>,
    pub types: HashMap<String, (TextureType, TextureAttributes)>,
}

impl TextureMappings {
    pub fn insert(&mut self, slot: TextureSlot, path: &str, ttype: TextureType, attributes: TextureAttributes) {
        let base = tex_base(path, Some(slot));
        self.map.entry(slot).or_default().entry(base).or_default().insert(PgTexture {
            path: path.to_string(),
            ttype,
        });
        self.types.insert(path.to_string(), (ttype, attributes));
    }

    pub fn texture_type(&self, path: &str) -> TextureType {
        self.types.get(path).map(|(t, _)| *t).unwrap_or(TextureType::Unknown)
    }

    pub fn has_attribute(&self, path: &str, attribute: TextureAttributes) -> bool {
        self.types
            .get(path)
            .map(|(_, attrs)| attrs.contains(attribute))
            .unwrap_or(false)
    }

    /// All textures of `desired` role registered under `base` in `slot`,
    /// shortest path first so the terser suffix wins deterministically when
    /// both `_m` and `_em` variants exist.
    pub fn matches(&self, slot: TextureSlot, base: &str, desired: TextureType) -> Vec<PgTexture> {
        let mut out: Vec<PgTexture> = self
            .map
            .get(&slot)
            .and_then(|bases| bases.get(base))
            .map(|set| set.iter().filter(|t| t.ttype == desired).cloned().collect())
            .unwrap_or_default();

        out.sort_by(|a, b| a.path.len().cmp(&b.path.len()).then_with(|| a.path.cmp(&b.path)));
        out
    }
}

/// Suffix convention table. Ordering only matters for stripping, where the
/// longest suffix is tried first.
const SUFFIX_TABLE: &[(&str, TextureSlot, TextureType)] = &[
    ("_envmask", TextureSlot::EnvMask, TextureType::EnvironmentMask),
    ("_rmaos", TextureSlot::EnvMask, TextureType::Rmaos),
    ("_flow", TextureSlot::Backlight, TextureType::HairFlowMap),
    ("_cnr", TextureSlot::MultiLayer, TextureType::CoatNormalRoughness),
    ("_msn", TextureSlot::Normal, TextureType::Normal),
    ("mask", TextureSlot::Diffuse, TextureType::Diffuse),
    ("_bl", TextureSlot::Backlight, TextureType::Backlight),
    ("_em", TextureSlot::EnvMask, TextureType::EnvironmentMask),
    ("_sk", TextureSlot::Glow, TextureType::SkinTint),
    ("_b", TextureSlot::Backlight, TextureType::Backlight),
    ("_s", TextureSlot::MultiLayer, TextureType::SubsurfaceTint),
    ("_i", TextureSlot::MultiLayer, TextureType::InnerLayer),
    ("_f", TextureSlot::MultiLayer, TextureType::FuzzPbr),
    ("_m", TextureSlot::EnvMask, TextureType::EnvironmentMask),
    ("_e", TextureSlot::Cubemap, TextureType::Cubemap),
    ("_p", TextureSlot::Parallax, TextureType::Height),
    ("_g", TextureSlot::Glow, TextureType::Emissive),
    ("_n", TextureSlot::Normal, TextureType::Normal),
    ("_d", TextureSlot::Diffuse, TextureType::Diffuse),
];

const PBR_PREFIX: &str = "textures\\pbr";

/// Slot and role derived purely from the file name, used when no shape ever
/// voted for the texture.
pub fn defaults_from_suffix(canonical_path: &str) -> (Option<TextureSlot>, TextureType) {
    let stem_path = util::strip_extension(canonical_path);

    for (suffix, slot, ttype) in SUFFIX_TABLE {
        if stem_path.ends_with(suffix) {
            if *ttype == TextureType::Height && stem_path.starts_with(PBR_PREFIX) {
                return (Some(TextureSlot::Parallax), TextureType::HeightPbr);
            }
            return (Some(*slot), *ttype);
        }
    }

    // no recognized suffix: a plain diffuse
    (Some(TextureSlot::Diffuse), TextureType::Diffuse)
}

/// The base prefix: path without extension, with the slot's recognized
/// suffix stripped. With no slot the extension alone is stripped.
pub fn tex_base(canonical_path: &str, slot: Option<TextureSlot>) -> String {
    let stem_path = util::strip_extension(canonical_path);

    let Some(slot) = slot else {
        return stem_path.to_string();
    };

    for (suffix, entry_slot, _) in SUFFIX_TABLE {
        if *entry_slot != slot {
            continue;
        }
        if stem_path.ends_with(suffix) {
            return stem_path[..stem_path.len() - suffix.len()].to_string();
        }
    }

    stem_path.to_string()
}

/// Base prefixes of every filled slot of a texture set.
pub fn search_prefixes(slots: &TextureSet) -> [String; NUM_TEXTURE_SLOTS] {
    let mut out: [String; NUM_TEXTURE_SLOTS] = Default::default();
    for (i, slot) in TextureSlot::ALL.iter().enumerate() {
        if slots[i].is_empty() {
            continue;
        }
        out[i] = tex_base(&slots[i], Some(*slot));
    }
    out
}

/// Role inferred from the owning shape's shader state during the NIF scan.
pub fn infer_type_from_shape(
    slot: TextureSlot,
    shader_type: LightingShaderType,
    flags1: ShaderFlags1,
    flags2: ShaderFlags2,
) -> TextureType {
    use LightingShaderType as St;

    match slot {
        TextureSlot::Diffuse => TextureType::Diffuse,
        TextureSlot::Normal => {
            if shader_type == St::SkinTint && flags1.contains(ShaderFlags1::FACEGEN_RGB_TINT) {
                TextureType::ModelSpaceNormal
            } else {
                TextureType::Normal
            }
        }
        TextureSlot::Glow => {
            if (shader_type == St::Glow && flags2.contains(ShaderFlags2::GLOW_MAP))
                || (shader_type == St::Default && flags2.contains(ShaderFlags2::UNUSED01))
            {
                TextureType::Emissive
            } else if shader_type == St::MultiLayerParallax && flags2.contains(ShaderFlags2::MULTI_LAYER_PARALLAX) {
                TextureType::SubsurfaceColor
            } else if shader_type == St::SkinTint && flags1.contains(ShaderFlags1::FACEGEN_RGB_TINT) {
                TextureType::SkinTint
            } else {
                TextureType::Unknown
            }
        }
        TextureSlot::Parallax => {
            if shader_type == St::Parallax && flags1.contains(ShaderFlags1::PARALLAX) {
                TextureType::Height
            } else if shader_type == St::Default && flags2.contains(ShaderFlags2::UNUSED01) {
                TextureType::HeightPbr
            } else {
                TextureType::Unknown
            }
        }
        TextureSlot::Cubemap => {
            if shader_type == St::EnvironmentMap && flags1.contains(ShaderFlags1::ENVIRONMENT_MAPPING) {
                TextureType::Cubemap
            } else {
                TextureType::Unknown
            }
        }
        TextureSlot::EnvMask => {
            if shader_type == St::EnvironmentMap && flags1.contains(ShaderFlags1::ENVIRONMENT_MAPPING) {
                TextureType::EnvironmentMask
            } else if shader_type == St::Default && flags2.contains(ShaderFlags2::UNUSED01) {
                TextureType::Rmaos
            } else {
                TextureType::Unknown
            }
        }
        TextureSlot::MultiLayer => {
            if shader_type == St::MultiLayerParallax && flags2.contains(ShaderFlags2::MULTI_LAYER_PARALLAX) {
                if flags2.contains(ShaderFlags2::UNUSED01) {
                    TextureType::CoatNormalRoughness
                } else {
                    TextureType::InnerLayer
                }
            } else {
                TextureType::Unknown
            }
        }
        TextureSlot::Backlight => {
            if shader_type == St::MultiLayerParallax && flags2.contains(ShaderFlags2::UNUSED01) {
                TextureType::SubsurfacePbr
            } else if shader_type == St::HairTint && flags2.contains(ShaderFlags2::BACK_LIGHTING) {
                TextureType::HairFlowMap
            } else if flags2.contains(ShaderFlags2::BACK_LIGHTING) {
                TextureType::Backlight
            } else if shader_type == St::SkinTint && flags1.contains(ShaderFlags1::FACEGEN_RGB_TINT) {
                TextureType::Specular
            } else {
                TextureType::Unknown
            }
        }
        TextureSlot::Unused => TextureType::Unknown,
    }
}

/// A `matched_from` set with deterministic iteration.
pub type MatchedFromSlots = BTreeSet<TextureSlot>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_defaults() {
        assert_eq!(
            defaults_from_suffix("textures\\rock_p.dds"),
            (Some(TextureSlot::Parallax), TextureType::Height)
        );
        assert_eq!(
            defaults_from_suffix("textures\\pbr\\rock_p.dds"),
            (Some(TextureSlot::Parallax), TextureType::HeightPbr)
        );
        assert_eq!(
            defaults_from_suffix("textures\\rock_rmaos.dds"),
            (Some(TextureSlot::EnvMask), TextureType::Rmaos)
        );
        assert_eq!(
            defaults_from_suffix("textures\\hair_flow.dds"),
            (Some(TextureSlot::Backlight), TextureType::HairFlowMap)
        );
        assert_eq!(
            defaults_from_suffix("textures\\rock.dds"),
            (Some(TextureSlot::Diffuse), TextureType::Diffuse)
        );
    }

    #[test]
    fn tex_base_strips_slot_suffix_only() {
        assert_eq!(tex_base("textures\\rock_p.dds", Some(TextureSlot::Parallax)), "textures\\rock");
        assert_eq!(tex_base("textures\\rock_envmask.dds", Some(TextureSlot::EnvMask)), "textures\\rock");
        // _p is not an EnvMask suffix, so nothing is stripped
        assert_eq!(tex_base("textures\\rock_p.dds", Some(TextureSlot::EnvMask)), "textures\\rock_p");
        assert_eq!(tex_base("textures\\rock_d.dds", None), "textures\\rock_d");
    }

    #[test]
    fn shorter_suffix_wins_on_lookup() {
        let mut mappings = TextureMappings::default();
        mappings.insert(
            TextureSlot::EnvMask,
            "textures\\rock_em.dds",
            TextureType::ComplexMaterial,
            TextureAttributes::empty(),
        );
        mappings.insert(
            TextureSlot::EnvMask,
            "textures\\rock_m.dds",
            TextureType::ComplexMaterial,
            TextureAttributes::empty(),
        );

        let matches = mappings.matches(TextureSlot::EnvMask, "textures\\rock", TextureType::ComplexMaterial);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].path, "textures\\rock_m.dds");
    }

    #[test]
    fn shape_vote_inference_notable_cases() {
        use LightingShaderType as St;

        // facegen skin tint normal slot votes model-space
        assert_eq!(
            infer_type_from_shape(TextureSlot::Normal, St::SkinTint, ShaderFlags1::FACEGEN_RGB_TINT, ShaderFlags2::empty()),
            TextureType::ModelSpaceNormal
        );
        // pbr marker on default shader in the parallax slot
        assert_eq!(
            infer_type_from_shape(TextureSlot::Parallax, St::Default, ShaderFlags1::empty(), ShaderFlags2::UNUSED01),
            TextureType::HeightPbr
        );
        // backlight slot: hair flow map beats plain backlight for hair shaders
        assert_eq!(
            infer_type_from_shape(TextureSlot::Backlight, St::HairTint, ShaderFlags1::empty(), ShaderFlags2::BACK_LIGHTING),
            TextureType::HairFlowMap
        );
        assert_eq!(
            infer_type_from_shape(TextureSlot::Backlight, St::Default, ShaderFlags1::empty(), ShaderFlags2::BACK_LIGHTING),
            TextureType::Backlight
        );
        // two-layer pbr coat map
        assert_eq!(
            infer_type_from_shape(
                TextureSlot::MultiLayer,
                St::MultiLayerParallax,
                ShaderFlags1::empty(),
                ShaderFlags2::MULTI_LAYER_PARALLAX | ShaderFlags2::UNUSED01
            ),
            TextureType::CoatNormalRoughness
        );
    }
}
