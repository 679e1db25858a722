use std::path::Path;

use grapefruit_packaging::{parse_dockerfile, validate, BuildContext, ImageRecipe, Runtime};

const ROOT_DOCKERFILE: &str = include_str!("../../../Dockerfile");

fn repo_root() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../.."))
}

#[test]
fn root_dockerfile_passes_validation() {
    let instructions = parse_dockerfile(ROOT_DOCKERFILE).unwrap();
    let context = BuildContext::from_dir(repo_root()).unwrap();

    let violations = validate(&instructions, &context);
    assert!(violations.is_empty(), "violations: {:?}", violations);
}

#[test]
fn root_dockerfile_matches_rust_preset() {
    let recipe = ImageRecipe::from_instructions(&parse_dockerfile(ROOT_DOCKERFILE).unwrap()).unwrap();
    assert_eq!(recipe, Runtime::rust("grapefruit-crawler").recipe());
}
