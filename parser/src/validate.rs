//! Document validation and lints.
//!
//! Structural checks that need the whole document run here; everything
//! else is a warning-level lint that `# check=skip=` can turn off.

use dockerfile_core::error::{DockerfileError, Result};
use dockerfile_core::Diagnostic;

use crate::instruction::InstructionKind;
use crate::stage::Stage;
use crate::token::Keyword;

pub const ONBUILD_IN_FINAL_STAGE: &str = "OnbuildInFinalStage";
pub const MULTIPLE_INSTRUCTIONS_DISALLOWED: &str = "MultipleInstructionsDisallowed";
pub const MAINTAINER_DEPRECATED: &str = "MaintainerDeprecated";
pub const STAGE_NAME_CASING: &str = "StageNameCasing";

/// Instructions where only the last one in a stage takes effect.
const LAST_ONE_WINS: [Keyword; 3] = [Keyword::Cmd, Keyword::Entrypoint, Keyword::Healthcheck];

/// A document needs at least one instruction and at least one stage.
pub fn check_document(instruction_count: usize, stages: &[Stage]) -> Result<()> {
    if instruction_count == 0 {
        return Err(DockerfileError::EmptyDockerfile);
    }
    if stages.is_empty() {
        return Err(DockerfileError::MissingFrom);
    }
    Ok(())
}

/// Run every lint not listed in `skipped` (`all` disables them all).
pub fn lint(stages: &[Stage], skipped: &[String]) -> Vec<Diagnostic> {
    let enabled = |rule: &str| {
        !skipped
            .iter()
            .any(|s| s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case(rule))
    };
    let mut diagnostics = Vec::new();

    for stage in stages {
        if enabled(STAGE_NAME_CASING) {
            if let Some(alias) = &stage.alias {
                if alias.chars().any(|c| c.is_ascii_uppercase()) {
                    diagnostics.push(Diagnostic::warning(
                        STAGE_NAME_CASING,
                        format!("stage name '{}' should be lowercase", alias),
                        stage.instructions[0].lines,
                    ));
                }
            }
        }

        if enabled(MULTIPLE_INSTRUCTIONS_DISALLOWED) {
            for keyword in LAST_ONE_WINS {
                let occurrences: Vec<_> = stage
                    .instructions
                    .iter()
                    .filter(|i| i.keyword() == keyword)
                    .collect();
                if let Some((_, earlier)) = occurrences.split_last() {
                    for instruction in earlier {
                        diagnostics.push(Diagnostic::warning(
                            MULTIPLE_INSTRUCTIONS_DISALLOWED,
                            format!(
                                "multiple {} instructions in stage {}; only the last one takes effect",
                                keyword,
                                stage.name()
                            ),
                            instruction.lines,
                        ));
                    }
                }
            }
        }

        for instruction in &stage.instructions {
            if let InstructionKind::Maintainer { .. } = instruction.kind {
                if enabled(MAINTAINER_DEPRECATED) {
                    diagnostics.push(Diagnostic::warning(
                        MAINTAINER_DEPRECATED,
                        "MAINTAINER is deprecated; use LABEL maintainer=... instead",
                        instruction.lines,
                    ));
                }
            }
        }
    }

    if let Some(last) = stages.last() {
        if enabled(ONBUILD_IN_FINAL_STAGE) {
            for instruction in last.instructions.iter().filter(|i| i.keyword() == Keyword::Onbuild) {
                diagnostics.push(Diagnostic::warning(
                    ONBUILD_IN_FINAL_STAGE,
                    "ONBUILD in the final stage only runs when another build uses this image",
                    instruction.lines,
                ));
            }
        }
    }

    for diagnostic in &diagnostics {
        tracing::warn!(code = %diagnostic.code, lines = ?diagnostic.lines, "{}", diagnostic.message);
    }
    diagnostics
}
