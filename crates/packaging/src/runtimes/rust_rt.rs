use crate::recipe::{BaseImage, ImageRecipe};

pub const DEFAULT_TOOLCHAIN: &str = "1.79";

pub fn recipe(toolchain: &str, binary: &str) -> ImageRecipe {
    ImageRecipe {
        base: BaseImage::new("rust", &format!("{}-slim", toolchain)),
        workdir: "/app".to_string(),
        copy_src: ".".to_string(),
        manifest: "Cargo.toml".to_string(),
        install: "cargo install --locked --path .".to_string(),
        command: vec![binary.to_string()],
    }
}

pub fn install_manifest(command: &str) -> Option<String> {
    let words: Vec<&str> = command.split_whitespace().collect();
    if !words.windows(2).any(|w| w[0] == "cargo" && (w[1] == "install" || w[1] == "build")) {
        return None;
    }
    let mut tokens = words.into_iter();
    while let Some(token) = tokens.next() {
        if token == "--path" {
            let dir = tokens.next()?.trim_end_matches('/');
            if dir.is_empty() || dir == "." {
                break;
            }
            return Some(format!("{}/Cargo.toml", dir));
        }
    }
    Some("Cargo.toml".to_string())
}
