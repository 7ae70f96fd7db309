// Build script to compile GLSL shaders to SPIR-V
//
// Every shaders/<name>.{vert,frag,comp} becomes shaders/<name>.<stage>.spv,
// which is what ShaderLibrary looks up at runtime.

use std::path::Path;
use std::process::Command;

const STAGES: [&str; 3] = ["vert", "frag", "comp"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let entries = match std::fs::read_dir("shaders") {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Warning: no shaders directory ({})", e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_source = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| STAGES.contains(&ext));
        if is_source {
            let output = format!("{}.spv", path.display());
            compile_shader(&path, Path::new(&output));
        }
    }
}

fn compile_shader(input: &Path, output: &Path) {
    println!("cargo:rerun-if-changed={}", input.display());

    // Check if glslc is available
    let result = Command::new("glslc")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Ok(status) => {
            panic!(
                "Failed to compile {}: exit code {:?}",
                input.display(),
                status.code()
            );
        }
        Err(e) => {
            eprintln!("Warning: glslc not found ({})", e);
            eprintln!("Shaders will not be compiled. Install Vulkan SDK or compile manually:");
            eprintln!("  glslc {} -o {}", input.display(), output.display());
        }
    }
}
