use crate::recipe::ImageRecipe;

mod python;
mod rust_rt;

/// Language presets that know how to build and start an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    Python { version: String, script: String },
    Rust { toolchain: String, binary: String },
}

impl Runtime {
    pub fn python() -> Self {
        Runtime::Python { version: python::DEFAULT_VERSION.to_string(), script: python::DEFAULT_SCRIPT.to_string() }
    }

    pub fn rust(binary: &str) -> Self {
        Runtime::Rust { toolchain: rust_rt::DEFAULT_TOOLCHAIN.to_string(), binary: binary.to_string() }
    }

    pub fn recipe(&self) -> ImageRecipe {
        match self {
            Runtime::Python { version, script } => python::recipe(version, script),
            Runtime::Rust { toolchain, binary } => rust_rt::recipe(toolchain, binary),
        }
    }
}

/// If `command` installs dependencies from a manifest, returns that
/// manifest's path as written in the command.
pub fn install_manifest(command: &str) -> Option<String> {
    python::install_manifest(command).or_else(|| rust_rt::install_manifest(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_manifest_detection() {
        assert_eq!(
            install_manifest("pip install --no-cache-dir -r requirements.txt").as_deref(),
            Some("requirements.txt")
        );
        assert_eq!(install_manifest("pip install --requirement deps/base.txt").as_deref(), Some("deps/base.txt"));
        assert_eq!(install_manifest("cargo install --locked --path .").as_deref(), Some("Cargo.toml"));
        assert_eq!(install_manifest("cargo install --path crates/app").as_deref(), Some("crates/app/Cargo.toml"));
        assert_eq!(install_manifest("pip3 install -r requirements.txt").as_deref(), Some("requirements.txt"));
        assert_eq!(install_manifest("pip   install  -r  requirements.txt").as_deref(), Some("requirements.txt"));
        assert_eq!(
            install_manifest("python3 -m pip install --upgrade pip && python3 -m pip install -r deps.txt").as_deref(),
            Some("deps.txt")
        );
        assert_eq!(install_manifest("/usr/local/bin/pip3.11 install --requirement=req.txt").as_deref(), Some("req.txt"));
        assert_eq!(install_manifest("pipenv install -r requirements.txt"), None);
        assert_eq!(install_manifest("pip install requests"), None);
        assert_eq!(install_manifest("apt-get update"), None);
    }
}
