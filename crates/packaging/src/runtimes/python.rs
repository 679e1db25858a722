use crate::recipe::{BaseImage, ImageRecipe};

pub const DEFAULT_VERSION: &str = "3.11";
pub const DEFAULT_SCRIPT: &str = "app.py";

pub fn recipe(version: &str, script: &str) -> ImageRecipe {
    ImageRecipe {
        base: BaseImage::new("python", &format!("{}-slim", version)),
        workdir: "/app".to_string(),
        copy_src: ".".to_string(),
        manifest: "requirements.txt".to_string(),
        install: "pip install --no-cache-dir -r requirements.txt".to_string(),
        command: vec!["python".to_string(), script.to_string()],
    }
}

pub fn install_manifest(command: &str) -> Option<String> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    install_positions(&tokens).into_iter().find_map(|start| requirement_arg(&tokens[start..]))
}

/// First `-r` argument of one install, stopping at the next shell separator.
fn requirement_arg(args: &[&str]) -> Option<String> {
    let mut rest = args.iter();
    while let Some(token) = rest.next() {
        if *token == "-r" || *token == "--requirement" {
            return rest.next().map(|path| path.to_string());
        }
        if let Some(path) = token.strip_prefix("--requirement=") {
            return Some(path.to_string());
        }
        if matches!(*token, "&&" | "||" | ";") {
            break;
        }
    }
    None
}

/// Indices just past each `pip install`; `python -m pip install` matches
/// through its `pip` token.
fn install_positions(tokens: &[&str]) -> Vec<usize> {
    tokens
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| is_pip(program_name(pair[0])) && pair[1] == "install")
        .map(|(idx, _)| idx + 2)
        .collect()
}

fn program_name(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

fn is_pip(name: &str) -> bool {
    name == "pip" || name.strip_prefix("pip3").map_or(false, |v| v.is_empty() || v.starts_with('.'))
}
