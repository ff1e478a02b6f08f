use thiserror::Error;

use crate::diagnostic::LineRange;

/// Dockerfile parse error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DockerfileError {
    /// EOF reached before the heredoc terminator
    #[error("{lines}: unterminated heredoc '<<{delimiter}'")]
    UnterminatedHeredoc { delimiter: String, lines: LineRange },

    /// `# escape=` with a value other than `\` or `` ` ``
    #[error("{lines}: invalid escape directive '{value}'")]
    InvalidEscapeDirective { value: String, lines: LineRange },

    /// Byte input that is not UTF-8
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Keyword outside the fixed instruction set
    #[error("{lines}: unknown instruction '{keyword}'")]
    UnknownInstruction { keyword: String, lines: LineRange },

    /// Bracketed argument that is not a JSON string array
    #[error("{lines}: malformed exec-form array in {keyword}: {reason}")]
    MalformedExecForm {
        keyword: String,
        reason: String,
        lines: LineRange,
    },

    /// Wrong arity, bad flag, bad value
    #[error("{lines}: malformed {keyword} instruction: {reason}")]
    MalformedInstruction {
        keyword: String,
        reason: String,
        lines: LineRange,
    },

    /// Image reference that does not split into name, tag and digest
    #[error("Invalid image reference: {0}")]
    InvalidImageReference(String),

    /// ONBUILD ONBUILD, ONBUILD FROM, ONBUILD MAINTAINER
    #[error("{lines}: {keyword} is not allowed as an ONBUILD trigger")]
    InvalidOnbuildPayload { keyword: String, lines: LineRange },

    /// Anything but ARG ahead of the first FROM
    #[error("{lines}: {keyword} appears before the first FROM")]
    InstructionBeforeFirstFrom { keyword: String, lines: LineRange },

    /// Stage alias declared twice (case-insensitive)
    #[error("{lines}: duplicate stage name '{alias}'")]
    DuplicateStageAlias { alias: String, lines: LineRange },

    /// `--from=` or a FROM base naming no earlier stage
    #[error("{lines}: unknown stage reference '{reference}'")]
    UnknownStageReference { reference: String, lines: LineRange },

    /// No instructions at all
    #[error("Dockerfile contains no instructions")]
    EmptyDockerfile,

    /// Only global ARG instructions, no FROM
    #[error("Dockerfile has no FROM instruction")]
    MissingFrom,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Coarse classification used to decide what best-effort parsing may skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Lex,
    Token,
    Grammar,
    Structural,
    Serialization,
}

impl DockerfileError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnterminatedHeredoc { .. }
            | Self::InvalidEscapeDirective { .. }
            | Self::InvalidEncoding(_) => ErrorCategory::Lex,
            Self::UnknownInstruction { .. } | Self::MalformedExecForm { .. } => ErrorCategory::Token,
            Self::MalformedInstruction { .. }
            | Self::InvalidImageReference(_)
            | Self::InvalidOnbuildPayload { .. } => ErrorCategory::Grammar,
            Self::InstructionBeforeFirstFrom { .. }
            | Self::DuplicateStageAlias { .. }
            | Self::UnknownStageReference { .. }
            | Self::EmptyDockerfile
            | Self::MissingFrom => ErrorCategory::Structural,
            Self::SerializationError(_) => ErrorCategory::Serialization,
        }
    }

    /// Whether best-effort parsing can record this error and move on to the
    /// next logical line.
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::Token | ErrorCategory::Grammar => true,
            ErrorCategory::Structural => {
                !matches!(self, Self::EmptyDockerfile | Self::MissingFrom)
            }
            ErrorCategory::Lex | ErrorCategory::Serialization => false,
        }
    }

    /// Source lines the error refers to, when it has any.
    pub fn lines(&self) -> Option<LineRange> {
        match self {
            Self::UnterminatedHeredoc { lines, .. }
            | Self::InvalidEscapeDirective { lines, .. }
            | Self::UnknownInstruction { lines, .. }
            | Self::MalformedExecForm { lines, .. }
            | Self::MalformedInstruction { lines, .. }
            | Self::InvalidOnbuildPayload { lines, .. }
            | Self::InstructionBeforeFirstFrom { lines, .. }
            | Self::DuplicateStageAlias { lines, .. }
            | Self::UnknownStageReference { lines, .. } => Some(*lines),
            Self::InvalidEncoding(_)
            | Self::InvalidImageReference(_)
            | Self::EmptyDockerfile
            | Self::MissingFrom
            | Self::SerializationError(_) => None,
        }
    }

    /// Stable variant name, used as the diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnterminatedHeredoc { .. } => "UnterminatedHeredoc",
            Self::InvalidEscapeDirective { .. } => "InvalidEscapeDirective",
            Self::InvalidEncoding(_) => "InvalidEncoding",
            Self::UnknownInstruction { .. } => "UnknownInstruction",
            Self::MalformedExecForm { .. } => "MalformedExecForm",
            Self::MalformedInstruction { .. } => "MalformedInstruction",
            Self::InvalidImageReference(_) => "InvalidImageReference",
            Self::InvalidOnbuildPayload { .. } => "InvalidOnbuildPayload",
            Self::InstructionBeforeFirstFrom { .. } => "InstructionBeforeFirstFrom",
            Self::DuplicateStageAlias { .. } => "DuplicateStageAlias",
            Self::UnknownStageReference { .. } => "UnknownStageReference",
            Self::EmptyDockerfile => "EmptyDockerfile",
            Self::MissingFrom => "MissingFrom",
            Self::SerializationError(_) => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for DockerfileError {
    fn from(err: serde_json::Error) -> Self {
        DockerfileError::SerializationError(err.to_string())
    }
}

/// Result type alias for Dockerfile parsing
pub type Result<T> = std::result::Result<T, DockerfileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unterminated_heredoc_display() {
        let error = DockerfileError::UnterminatedHeredoc {
            delimiter: "EOF".to_string(),
            lines: LineRange::single(3),
        };
        assert_eq!(error.to_string(), "line 3: unterminated heredoc '<<EOF'");
        assert_eq!(error.category(), ErrorCategory::Lex);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_malformed_instruction_display() {
        let error = DockerfileError::MalformedInstruction {
            keyword: "COPY".to_string(),
            reason: "requires at least one source and a destination".to_string(),
            lines: LineRange::new(4, 5),
        };
        assert_eq!(
            error.to_string(),
            "lines 4-5: malformed COPY instruction: requires at least one source and a destination"
        );
        assert_eq!(error.category(), ErrorCategory::Grammar);
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_invalid_image_reference() {
        let error = DockerfileError::InvalidImageReference("empty tag in reference 'alpine:'".to_string());
        assert_eq!(error.to_string(), "Invalid image reference: empty tag in reference 'alpine:'");
        assert_eq!(error.category(), ErrorCategory::Grammar);
        assert_eq!(error.lines(), None);
    }

    #[test]
    fn test_unknown_instruction_is_token_error() {
        let error = DockerfileError::UnknownInstruction {
            keyword: "FORM".to_string(),
            lines: LineRange::single(1),
        };
        assert_eq!(error.category(), ErrorCategory::Token);
        assert_eq!(error.code(), "UnknownInstruction");
        assert_eq!(error.lines(), Some(LineRange::single(1)));
    }

    #[test]
    fn test_structural_errors() {
        let dup = DockerfileError::DuplicateStageAlias {
            alias: "builder".to_string(),
            lines: LineRange::single(9),
        };
        assert_eq!(dup.category(), ErrorCategory::Structural);
        assert!(dup.is_recoverable());

        assert_eq!(DockerfileError::EmptyDockerfile.category(), ErrorCategory::Structural);
        assert!(!DockerfileError::EmptyDockerfile.is_recoverable());
        assert!(!DockerfileError::MissingFrom.is_recoverable());
        assert_eq!(DockerfileError::EmptyDockerfile.lines(), None);
    }

    #[test]
    fn test_empty_dockerfile_display() {
        assert_eq!(
            DockerfileError::EmptyDockerfile.to_string(),
            "Dockerfile contains no instructions"
        );
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let err = serde_json::from_str::<Vec<String>>("[1,").unwrap_err();
        let converted: DockerfileError = err.into();
        assert!(matches!(converted, DockerfileError::SerializationError(_)));
    }
}
