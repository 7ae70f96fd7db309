// Shader module loading and management
//
// Vulkan uses SPIR-V bytecode for shaders. Shaders are compiled ahead of time
// by build.rs; the library resolves a logical name such as "mesh.vert" to
// "<dir>/mesh.vert.spv" and turns it into a module.

use ash::vk;
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::error::{RendererError, Result};
use super::tracker::ObjectKind;
use super::DeviceContext;

/// Stage implied by the source extension of a logical shader name
pub fn stage_for_name(name: &str) -> Option<vk::ShaderStageFlags> {
    let extension = Path::new(name).extension()?.to_str()?;
    match extension {
        "vert" => Some(vk::ShaderStageFlags::VERTEX),
        "frag" => Some(vk::ShaderStageFlags::FRAGMENT),
        "comp" => Some(vk::ShaderStageFlags::COMPUTE),
        "geom" => Some(vk::ShaderStageFlags::GEOMETRY),
        "tesc" => Some(vk::ShaderStageFlags::TESSELLATION_CONTROL),
        "tese" => Some(vk::ShaderStageFlags::TESSELLATION_EVALUATION),
        _ => None,
    }
}

/// Compiled shaders on disk
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    directory: PathBuf,
}

impl ShaderLibrary {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.spv", name))
    }

    /// Read and validate the SPIR-V words for `name`
    pub fn load_words(&self, name: &str) -> Result<Vec<u32>> {
        let path = self.path_for(name);
        let shader_error = |source| RendererError::Shader {
            name: name.to_string(),
            source,
        };

        let mut file = File::open(&path).map_err(shader_error)?;
        let words = ash::util::read_spv(&mut file).map_err(shader_error)?;
        log::debug!("Loaded shader {} ({} words)", path.display(), words.len());
        Ok(words)
    }

    /// Load `name` and create a module with the stage implied by its extension
    pub fn load(&self, context: &DeviceContext, name: &str) -> Result<ShaderModule> {
        let stage = stage_for_name(name).ok_or_else(|| RendererError::Shader {
            name: name.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot infer shader stage from name",
            ),
        })?;
        let words = self.load_words(name)?;
        ShaderModule::new(context, &words, stage)
    }
}

/// A shader module plus what a pipeline needs to reference it.
///
/// Destroy it once the pipelines using it are created.
#[derive(Debug)]
pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    entry_point: CString,
}

impl ShaderModule {
    pub fn new(context: &DeviceContext, code: &[u32], stage: vk::ShaderStageFlags) -> Result<Self> {
        let handle = create_shader_module(context, code)?;
        Ok(Self {
            handle,
            stage,
            entry_point: CString::from(c"main"),
        })
    }

    /// Stage description borrowing this module's entry point name
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.handle)
            .name(&self.entry_point)
            .build()
    }

    pub fn destroy(self, context: &DeviceContext) {
        unsafe { context.device().destroy_shader_module(self.handle, None) };
        context.tracker().destroyed(ObjectKind::ShaderModule);
    }
}

pub fn create_shader_module(context: &DeviceContext, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
    let module = unsafe { context.device().create_shader_module(&create_info, None) }?;
    context.tracker().created(ObjectKind::ShaderModule);
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn stage_comes_from_extension() {
        assert_eq!(stage_for_name("mesh.vert"), Some(vk::ShaderStageFlags::VERTEX));
        assert_eq!(stage_for_name("mesh.frag"), Some(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(stage_for_name("wave.comp"), Some(vk::ShaderStageFlags::COMPUTE));
        assert_eq!(stage_for_name("mesh"), None);
    }

    #[test]
    fn resolves_names_under_directory() {
        let library = ShaderLibrary::new("shaders");
        assert_eq!(
            library.path_for("mesh.vert"),
            Path::new("shaders").join("mesh.vert.spv")
        );
    }

    #[test]
    fn loads_spirv_words() {
        let dir = tempfile::tempdir().unwrap();
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let mut file = File::create(dir.path().join("mesh.vert.spv")).unwrap();
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
        drop(file);

        let library = ShaderLibrary::new(dir.path());
        let loaded = library.load_words("mesh.vert").unwrap();
        assert_eq!(loaded, words);
    }

    #[test]
    fn rejects_missing_and_truncated_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.frag.spv"), [0x03, 0x02, 0x23]).unwrap();

        let library = ShaderLibrary::new(dir.path());
        let missing = library.load_words("absent.vert").unwrap_err();
        assert!(matches!(missing, RendererError::Shader { ref name, .. } if name == "absent.vert"));
        assert!(library.load_words("bad.frag").is_err());
    }
}
