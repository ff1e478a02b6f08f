//! Dockerfile parser.
//!
//! Turns Dockerfile source into a validated [`Document`]: stages of typed
//! instructions, with `ARG`/`ENV` references expanded, heredoc bodies
//! attached and `COPY --from=` references resolved.
//!
//! ```
//! let doc = dockerfile_parser::parse("FROM alpine:3.19\nRUN echo hi\n").unwrap();
//! assert_eq!(doc.stages.len(), 1);
//! ```

pub mod dockerfile;
pub mod instruction;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod reference;
pub mod resolver;
pub mod stage;
pub mod token;
pub mod validate;

pub use dockerfile_core::{
    Diagnostic, DockerfileError, ErrorCategory, LineRange, ParserConfig, Result, Severity,
};
pub use instruction::{Instruction, InstructionKind};
pub use lexer::{Directives, Heredoc};
pub use parser::{Document, DockerfileParser, ParseOutcome};
pub use reference::ImageRef;
pub use stage::{Stage, StageBase};
pub use token::Keyword;

/// Parse source text with the default configuration.
pub fn parse(source: &str) -> Result<Document> {
    DockerfileParser::default().parse(source)
}

/// Parse a UTF-8 byte buffer with the default configuration.
pub fn parse_bytes(bytes: &[u8]) -> Result<Document> {
    DockerfileParser::default().parse_bytes(bytes)
}

/// Parse a stream of physical lines with the default configuration.
pub fn parse_lines<I, S>(lines: I) -> Result<Document>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    DockerfileParser::default().parse_lines(lines)
}
