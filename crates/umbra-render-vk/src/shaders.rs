// SPDX-License-Identifier: CEPL-1.0
//! Compiled SPIR-V for both passes, read from a shader directory at startup.
use crate::resources::Owned;
use crate::VkResultExt;
use ash::util::read_spv;
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;
use umbra_render::RenderError;

pub const SHADOW_VERT: &str = "shadow.vert.spv";
pub const SHADOW_FRAG: &str = "shadow.frag.spv";
pub const SCENE_VERT: &str = "scene.vert.spv";
pub const SCENE_FRAG: &str = "scene.frag.spv";

pub(crate) struct ShaderSet {
    pub shadow_vert: Vec<u32>,
    pub shadow_frag: Vec<u32>,
    pub scene_vert: Vec<u32>,
    pub scene_frag: Vec<u32>,
}

impl ShaderSet {
    pub(crate) fn load(dir: &Path) -> Result<Self, RenderError> {
        debug!("loading shaders from {}", dir.display());
        Ok(Self {
            shadow_vert: load_spv(&dir.join(SHADOW_VERT))?,
            shadow_frag: load_spv(&dir.join(SHADOW_FRAG))?,
            scene_vert: load_spv(&dir.join(SCENE_VERT))?,
            scene_frag: load_spv(&dir.join(SCENE_FRAG))?,
        })
    }
}

fn load_spv(path: &Path) -> Result<Vec<u32>, RenderError> {
    let bytes = RenderError::read_file(path)?;
    read_spv(&mut Cursor::new(&bytes))
        .map_err(|e| RenderError::creation("shader module", format!("{}: {e}", path.display())))
}

pub(crate) unsafe fn create_module(
    device: &ash::Device,
    code: &[u32],
) -> Result<Owned<vk::ShaderModule>, RenderError> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: std::mem::size_of_val(code),
        p_code: code.as_ptr(),
        ..Default::default()
    };
    let module = device
        .create_shader_module(&ci, None)
        .creating("shader module")?;
    Ok(Owned::new(device, module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn write_words(path: &Path, words: &[u32]) {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn missing_shader_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShaderSet::load(dir.path()).err().unwrap();
        match err {
            RenderError::FileNotFound(p) => assert!(p.ends_with(SHADOW_VERT)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn loads_all_four_stages() {
        let dir = tempfile::tempdir().unwrap();
        for name in [SHADOW_VERT, SHADOW_FRAG, SCENE_VERT, SCENE_FRAG] {
            write_words(&dir.path().join(name), &[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        }
        let set = ShaderSet::load(dir.path()).unwrap();
        assert_eq!(set.scene_frag[0], SPIRV_MAGIC);
        assert_eq!(set.shadow_vert.len(), 5);
    }

    #[test]
    fn truncated_binary_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCENE_VERT);
        fs::write(&path, [0x03, 0x02, 0x23]).unwrap();
        let err = load_spv(&path).unwrap_err();
        assert!(matches!(err, RenderError::CreationFailed { .. }));
    }
}
