//! Assembles the patcher registry from the run configuration. Shader
//! registration order doubles as the stable tie-break in match selection,
//! so Default goes first and the more specific shaders later.

use crate::patchers::global_fix_effect_lighting::GlobalFixEffectLighting;
use crate::patchers::post_fix_sss::PostFixSss;
use crate::patchers::post_hair_flow_map::PostHairFlowMap;
use crate::patchers::post_restore_default_shaders::PostRestoreDefaultShaders;
use crate::patchers::pre_disable_mlp::PreDisableMlp;
use crate::patchers::pre_fix_slot_count::PreFixSlotCount;
use crate::patchers::shader_complex_material::ShaderComplexMaterial;
use crate::patchers::shader_default::ShaderDefault;
use crate::patchers::shader_true_pbr::ShaderTruePbr;
use crate::patchers::shader_vanilla_parallax::ShaderVanillaParallax;
use crate::patchers::texture_convert_to_hdr::TextureConvertToHdr;
use crate::patchers::transform_parallax_to_cm::TransformParallaxToCm;
use crate::patchers::{MeshPatcherRegistry, TexturePatcher};
use crate::settings::PatcherConfig;
use crate::textures::ShapeShader;

pub fn build_registry(config: &PatcherConfig) -> (MeshPatcherRegistry, Vec<Box<dyn TexturePatcher>>) {
    let mut registry = MeshPatcherRegistry::default();

    registry.pre.push(PreFixSlotCount::factory());
    if config.disable_mlp {
        registry.pre.push(PreDisableMlp::factory());
    }

    registry.shaders.push((ShapeShader::None, ShaderDefault::factory()));
    if config.shader_vanilla_parallax {
        registry
            .shaders
            .push((ShapeShader::VanillaParallax, ShaderVanillaParallax::factory()));
    }
    if config.shader_complex_material {
        registry
            .shaders
            .push((ShapeShader::ComplexMaterial, ShaderComplexMaterial::factory()));
    }
    if config.shader_true_pbr {
        registry.shaders.push((ShapeShader::TruePbr, ShaderTruePbr::factory()));
    }

    if config.upgrade_parallax_to_cm && config.shader_complex_material {
        registry.transforms.insert(
            ShapeShader::VanillaParallax,
            (ShapeShader::ComplexMaterial, TransformParallaxToCm::factory()),
        );
    }

    registry.post.push(PostRestoreDefaultShaders::factory());
    if config.fix_subsurface_scattering {
        registry.post.push(PostFixSss::factory());
    }
    if config.hair_flow_map {
        registry.post.push(PostHairFlowMap::factory());
    }

    if config.fix_effect_lighting {
        registry.global.push(GlobalFixEffectLighting::factory());
    }

    let mut texture_patchers: Vec<Box<dyn TexturePatcher>> = Vec::new();
    if config.hdr.enabled {
        texture_patchers.push(Box::new(TextureConvertToHdr));
    }

    (registry, texture_patchers)
}
