//! The `dockerfile` and `lint-dockerfile` subcommands.

use std::path::Path;

use grapefruit_models::GrapefruitError;
use grapefruit_packaging::{parse_dockerfile, validate, BuildContext, Runtime, Violation};

pub const BINARY_NAME: &str = "grapefruit-crawler";

/// The Dockerfile this service ships with.
pub fn service_dockerfile() -> String {
    Runtime::rust(BINARY_NAME).recipe().render()
}

/// Checks the Dockerfile at `path` against a build context read from
/// `context`, or from the Dockerfile's own directory.
pub fn lint_dockerfile(path: &Path, context: Option<&Path>) -> Result<Vec<Violation>, GrapefruitError> {
    let text = std::fs::read_to_string(path)?;
    let instructions = parse_dockerfile(&text)?;

    let root = match context {
        Some(dir) => dir.to_path_buf(),
        None => path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Path::new(".").to_path_buf()),
    };
    let context = BuildContext::from_dir(&root)?;
    Ok(validate(&instructions, &context))
}
