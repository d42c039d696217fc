use std::process::Command;

use tracing::warn;

use crate::model::ToolVersions;

/// External programs the extraction chain shells out to, with the flag that
/// makes each print its version.
const EXTERNAL_TOOLS: [(&str, &str); 3] = [
    ("pdftotext", "-v"),
    ("pdftoppm", "-v"),
    ("tesseract", "--version"),
];

pub fn collect_tool_versions() -> ToolVersions {
    ToolVersions {
        pdftotext: command_version_optional("pdftotext", &["-v"]),
        pdftoppm: command_version_optional("pdftoppm", &["-v"]),
        tesseract: command_version_optional("tesseract", &["--version"]),
    }
}

/// Logs one warning per missing tool. A missing tool only disables its
/// strategy; the chain falls through to the next one.
pub fn warn_missing_tools() -> Vec<&'static str> {
    let missing: Vec<&'static str> = EXTERNAL_TOOLS
        .iter()
        .filter(|(program, flag)| !command_available(program, flag))
        .map(|(program, _)| *program)
        .collect();

    for program in &missing {
        warn!(tool = program, "external tool not found on PATH");
    }

    missing
}

fn command_available(program: &str, flag: &str) -> bool {
    Command::new(program).arg(flag).output().is_ok()
}

fn command_version_optional(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_has_no_version() {
        assert_eq!(
            command_version_optional("normharvest-no-such-tool", &["--version"]),
            None
        );
        assert!(!command_available("normharvest-no-such-tool", "--version"));
    }
}
