//! A small line-oriented Dockerfile parser covering the instructions the
//! service image uses. Anything else is kept as `Instruction::Other`.

use std::fmt;

use grapefruit_models::GrapefruitError;

use crate::recipe::BaseImage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From(BaseImage),
    Workdir(String),
    Copy { sources: Vec<String>, dest: String },
    Run(String),
    /// Exec form is kept as given; shell form is split on whitespace.
    Cmd(Vec<String>),
    Other { keyword: String, args: String },
}

impl Instruction {
    pub fn keyword(&self) -> &str {
        match self {
            Instruction::From(_) => "FROM",
            Instruction::Workdir(_) => "WORKDIR",
            Instruction::Copy { .. } => "COPY",
            Instruction::Run(_) => "RUN",
            Instruction::Cmd(_) => "CMD",
            Instruction::Other { keyword, .. } => keyword,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From(base) => write!(f, "FROM {}", base),
            Instruction::Workdir(dir) => write!(f, "WORKDIR {}", dir),
            Instruction::Copy { sources, dest } => write!(f, "COPY {} {}", sources.join(" "), dest),
            Instruction::Run(cmd) => write!(f, "RUN {}", cmd),
            Instruction::Cmd(args) => write!(f, "CMD {}", serde_json::Value::from(args.clone())),
            Instruction::Other { keyword, args } => write!(f, "{} {}", keyword, args),
        }
    }
}

/// Parses Dockerfile text into instructions.
///
/// Blank lines and `#` comments are skipped, lines ending in `\` are joined
/// with the next one, and keywords are matched case-insensitively.
pub fn parse_dockerfile(text: &str) -> Result<Vec<Instruction>, GrapefruitError> {
    let mut instructions = Vec::new();
    let mut pending = String::new();
    let mut start_line = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if pending.is_empty() {
            start_line = idx + 1;
        }
        match line.strip_suffix('\\') {
            Some(head) => {
                pending.push_str(head.trim_end());
                pending.push(' ');
            }
            None => {
                pending.push_str(line);
                instructions.push(parse_instruction(&pending, start_line)?);
                pending.clear();
            }
        }
    }

    if !pending.is_empty() {
        return Err(GrapefruitError::Dockerfile {
            line: start_line,
            reason: "line continuation at end of file".to_string(),
        });
    }
    Ok(instructions)
}

fn parse_instruction(text: &str, line: usize) -> Result<Instruction, GrapefruitError> {
    let (keyword, rest) = match text.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (text, ""),
    };
    let keyword = keyword.to_ascii_uppercase();
    let error = |reason: &str| GrapefruitError::Dockerfile { line, reason: reason.to_string() };

    if rest.is_empty() {
        return Err(error(&format!("{} needs arguments", keyword)));
    }

    match keyword.as_str() {
        "FROM" => {
            let image = rest
                .split_whitespace()
                .find(|token| !token.starts_with("--"))
                .ok_or_else(|| error("FROM without an image"))?;
            let base = image.parse::<BaseImage>().map_err(|e| match e {
                GrapefruitError::Dockerfile { reason, .. } => GrapefruitError::Dockerfile { line, reason },
                other => other,
            })?;
            Ok(Instruction::From(base))
        }
        "WORKDIR" => Ok(Instruction::Workdir(rest.to_string())),
        "COPY" => {
            let paths = if rest.starts_with('[') {
                exec_form(rest).map_err(|_| error("COPY has a malformed JSON array"))?
            } else {
                rest.split_whitespace()
                    .filter(|token| !token.starts_with("--"))
                    .map(str::to_string)
                    .collect()
            };
            match paths.split_last() {
                Some((dest, sources)) if !sources.is_empty() => {
                    Ok(Instruction::Copy { sources: sources.to_vec(), dest: dest.clone() })
                }
                _ => Err(error("COPY needs a source and a destination")),
            }
        }
        "RUN" => Ok(Instruction::Run(rest.to_string())),
        "CMD" => {
            if rest.starts_with('[') {
                let args = exec_form(rest).map_err(|_| error("CMD has a malformed JSON array"))?;
                Ok(Instruction::Cmd(args))
            } else {
                Ok(Instruction::Cmd(rest.split_whitespace().map(str::to_string).collect()))
            }
        }
        _ => Ok(Instruction::Other { keyword, args: rest.to_string() }),
    }
}

fn exec_form(text: &str) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_str(text)
}
