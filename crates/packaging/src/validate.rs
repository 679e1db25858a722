//! Structural checks on a build recipe.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use grapefruit_models::GrapefruitError;
use serde::Serialize;
use tracing::debug;

use crate::dockerfile::Instruction;
use crate::runtimes;

/// Directories never walked when collecting a build context from disk.
const SKIPPED_DIRS: &[&str] = &[".git", "target"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rule {
    PinnedBase,
    WorkdirFirst,
    InstallOrder,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: Rule,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.rule, self.message)
    }
}

/// Files available to `COPY`, as `/`-separated paths relative to the context root.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    files: BTreeSet<String>,
}

impl BuildContext {
    pub fn from_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { files: files.into_iter().filter_map(|f| normalize(f.as_ref())).collect() }
    }

    pub fn from_dir(root: &Path) -> Result<Self, GrapefruitError> {
        let mut files = BTreeSet::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    let skipped = entry.file_name().to_str().map_or(false, |name| SKIPPED_DIRS.contains(&name));
                    if !skipped {
                        pending.push(path);
                    }
                    continue;
                }
                if let Ok(relative) = path.strip_prefix(root) {
                    let relative: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    files.insert(relative.join("/"));
                }
            }
        }
        Ok(Self { files })
    }

    pub fn contains(&self, path: &str) -> bool {
        normalize(path).map_or(false, |p| self.files.contains(&p))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Runs every check and returns what failed. An empty list means the recipe is sound.
pub fn validate(instructions: &[Instruction], context: &BuildContext) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut report = |rule: Rule, message: String| violations.push(Violation { rule, message });

    // FROM
    let froms: Vec<usize> = positions(instructions, |i| matches!(i, Instruction::From(_)));
    match froms.as_slice() {
        [] => report(Rule::PinnedBase, "no FROM instruction".to_string()),
        [idx] => {
            if *idx != 0 {
                report(Rule::PinnedBase, "FROM must be the first instruction".to_string());
            }
        }
        many => report(Rule::PinnedBase, format!("expected exactly one FROM, found {}", many.len())),
    }
    if let Some(Instruction::From(base)) = froms.first().map(|i| &instructions[*i]) {
        if !base.is_pinned() {
            let why = match base.tag.as_deref() {
                Some("latest") => "uses the floating 'latest' tag",
                _ => "has no tag or digest",
            };
            report(Rule::PinnedBase, format!("base image '{}' {}", base, why));
        }
    }

    // WORKDIR
    let workdir_idx = positions(instructions, |i| matches!(i, Instruction::Workdir(_))).first().copied();
    let first_step = positions(instructions, |i| matches!(i, Instruction::Copy { .. } | Instruction::Run(_)))
        .first()
        .copied();
    let workdir = match workdir_idx.map(|i| &instructions[i]) {
        Some(Instruction::Workdir(dir)) => Some(dir.as_str()),
        _ => None,
    };
    match (workdir_idx, first_step) {
        (None, _) => report(Rule::WorkdirFirst, "no WORKDIR instruction".to_string()),
        (Some(w), Some(s)) if w > s => {
            report(Rule::WorkdirFirst, format!("WORKDIR appears after {}", instructions[s].keyword()))
        }
        _ => {}
    }
    if let Some(dir) = workdir {
        if !dir.starts_with('/') {
            report(Rule::WorkdirFirst, format!("WORKDIR '{}' is not absolute", dir));
        }
    }

    // COPY then install RUN then CMD
    let copies: Vec<(usize, &[String], &str)> = instructions
        .iter()
        .enumerate()
        .filter_map(|(idx, i)| match i {
            Instruction::Copy { sources, dest } => Some((idx, sources.as_slice(), dest.as_str())),
            _ => None,
        })
        .collect();
    let copy_idx = copies.first().map(|(idx, _, _)| *idx);
    let install = instructions.iter().enumerate().find_map(|(idx, i)| match i {
        Instruction::Run(cmd) => runtimes::install_manifest(cmd).map(|manifest| (idx, manifest)),
        _ => None,
    });
    let cmd_idx = positions(instructions, |i| matches!(i, Instruction::Cmd(_))).last().copied();

    if copy_idx.is_none() {
        report(Rule::InstallOrder, "no COPY of the application tree".to_string());
    }
    match install {
        None => report(Rule::InstallOrder, "no dependency install step".to_string()),
        Some((idx, ref manifest)) => {
            if copy_idx.map_or(false, |c| idx < c) {
                report(Rule::InstallOrder, "dependency install runs before the application is copied".to_string());
            }
            if cmd_idx.map_or(false, |c| idx > c) {
                report(Rule::InstallOrder, "dependency install comes after CMD".to_string());
            }
            if let (Some(dir), Some(_)) = (workdir, copy_idx) {
                if !copied_before(manifest, dir, &copies, idx, context) {
                    report(Rule::InstallOrder, format!("manifest '{}' is not in the build context", manifest));
                }
            }
        }
    }

    // CMD
    match cmd_idx {
        None => report(Rule::Command, "no CMD instruction".to_string()),
        Some(idx) => {
            let last_step = [workdir_idx, copy_idx, install.as_ref().map(|(i, _)| *i)].into_iter().flatten().max();
            if last_step.map_or(false, |last| idx < last) {
                report(Rule::Command, "CMD is not the last build step".to_string());
            }
            if let Instruction::Cmd(args) = &instructions[idx] {
                if args.is_empty() {
                    report(Rule::Command, "CMD is empty".to_string());
                }
                if let ([_, script], Some(dir), Some(_)) = (args.as_slice(), workdir, copy_idx) {
                    if !copied_before(script, dir, &copies, idx, context) {
                        report(Rule::Command, format!("script '{}' is not provided by any COPY step", script));
                    }
                }
            }
        }
    }

    for violation in &violations {
        debug!(rule = ?violation.rule, "{}", violation.message);
    }
    violations
}

fn positions(instructions: &[Instruction], pred: impl Fn(&Instruction) -> bool) -> Vec<usize> {
    instructions
        .iter()
        .enumerate()
        .filter(|(_, i)| pred(i))
        .map(|(idx, _)| idx)
        .collect()
}

/// Whether a COPY placed before instruction `before` puts a context file at `image_path`.
fn copied_before(
    image_path: &str,
    workdir: &str,
    copies: &[(usize, &[String], &str)],
    before: usize,
    context: &BuildContext,
) -> bool {
    copies
        .iter()
        .filter(|(idx, _, _)| *idx < before)
        .any(|(_, sources, dest)| {
            sources.iter().any(|src| {
                context_path(image_path, workdir, src, dest, sources.len() > 1, context)
                    .map_or(false, |path| context.contains(&path))
            })
        })
}

/// Maps a path inside the image back to the build context through one
/// COPY source. `None` when that source does not cover the path.
fn context_path(
    image_path: &str,
    workdir: &str,
    src: &str,
    dest: &str,
    many_sources: bool,
    context: &BuildContext,
) -> Option<String> {
    let absolute = |p: &str| if p.starts_with('/') { p.to_string() } else { format!("{}/{}", workdir, p) };
    let target = segments(&absolute(image_path))?;
    let dest_dir = segments(&absolute(dest))?;

    if context.contains(src) {
        let src_path = normalize(src)?;
        let into_dir = many_sources || dest.ends_with('/') || dest == "." || dest.ends_with("/.");
        let mut placed = dest_dir;
        if into_dir {
            placed.push(src_path.rsplit('/').next()?.to_string());
        }
        return (placed == target).then_some(src_path);
    }

    let rest = target.strip_prefix(dest_dir.as_slice())?;
    let mut joined = segments(src)?;
    joined.extend(rest.iter().cloned());
    normalize(&joined.join("/"))
}

fn segments(path: &str) -> Option<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop()?;
            }
            other => out.push(other.to_string()),
        }
    }
    Some(out)
}

fn normalize(path: &str) -> Option<String> {
    let parts = segments(path)?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
