use std::fmt;
use std::str::FromStr;

use grapefruit_models::GrapefruitError;
use serde::{Deserialize, Serialize};

use crate::dockerfile::Instruction;
use crate::runtimes;

/// An image reference of the form `name[:tag][@sha256:digest]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl BaseImage {
    pub fn new(name: &str, tag: &str) -> Self {
        Self { name: name.to_string(), tag: Some(tag.to_string()), digest: None }
    }

    /// A digest pins exactly; otherwise a tag other than `latest` is required.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some() || self.tag.as_deref().map_or(false, |tag| tag != "latest")
    }
}

impl FromStr for BaseImage {
    type Err = GrapefruitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| GrapefruitError::Dockerfile { line: 0, reason };

        let (reference, digest) = match s.split_once('@') {
            Some((reference, digest)) => {
                if !digest.starts_with("sha256:") || digest.len() <= "sha256:".len() {
                    return Err(invalid(format!("unsupported digest in image reference '{}'", s)));
                }
                (reference, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // A colon before the last slash belongs to a registry port, not a tag.
        let name_start = reference.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match reference[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&reference[..split], Some(reference[split + 1..].to_string()))
            }
            None => (reference, None),
        };

        if name.is_empty() || tag.as_deref() == Some("") {
            return Err(invalid(format!("malformed image reference '{}'", s)));
        }
        Ok(Self { name: name.to_string(), tag, digest })
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// The four-step build: base image, working directory, copy of the
/// application tree, dependency install, startup command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecipe {
    pub base: BaseImage,
    pub workdir: String,
    pub copy_src: String,
    /// Dependency manifest the install step reads, relative to `copy_src`.
    pub manifest: String,
    pub install: String,
    pub command: Vec<String>,
}

impl ImageRecipe {
    pub fn instructions(&self) -> Vec<Instruction> {
        vec![
            Instruction::From(self.base.clone()),
            Instruction::Workdir(self.workdir.clone()),
            Instruction::Copy { sources: vec![self.copy_src.clone()], dest: self.workdir.clone() },
            Instruction::Run(self.install.clone()),
            Instruction::Cmd(self.command.clone()),
        ]
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for instruction in self.instructions() {
            out.push_str(&instruction.to_string());
            out.push('\n');
        }
        out
    }

    /// Recovers the recipe from parsed instructions. Errors report line 0
    /// since they concern the file as a whole.
    pub fn from_instructions(instructions: &[Instruction]) -> Result<Self, GrapefruitError> {
        let missing = |what: &str| GrapefruitError::Dockerfile { line: 0, reason: format!("no {} instruction", what) };

        let base = instructions
            .iter()
            .find_map(|i| match i {
                Instruction::From(base) => Some(base.clone()),
                _ => None,
            })
            .ok_or_else(|| missing("FROM"))?;
        let workdir = instructions
            .iter()
            .find_map(|i| match i {
                Instruction::Workdir(dir) => Some(dir.clone()),
                _ => None,
            })
            .ok_or_else(|| missing("WORKDIR"))?;
        let copy_src = instructions
            .iter()
            .find_map(|i| match i {
                Instruction::Copy { sources, .. } => sources.first().cloned(),
                _ => None,
            })
            .ok_or_else(|| missing("COPY"))?;
        let (install, manifest) = instructions
            .iter()
            .find_map(|i| match i {
                Instruction::Run(cmd) => runtimes::install_manifest(cmd).map(|manifest| (cmd.clone(), manifest)),
                _ => None,
            })
            .ok_or_else(|| missing("dependency install RUN"))?;
        let command = instructions
            .iter()
            .rev()
            .find_map(|i| match i {
                Instruction::Cmd(args) => Some(args.clone()),
                _ => None,
            })
            .ok_or_else(|| missing("CMD"))?;

        Ok(Self { base, workdir, copy_src, manifest, install, command })
    }
}
