//! Instruction tokenizer.
//!
//! Splits a logical line into keyword, leading flags and arguments, and
//! classifies the argument as shell-form, exec-form (JSON string array) or
//! opaque text.

use dockerfile_core::error::{DockerfileError, Result};
use dockerfile_core::LineRange;
use serde::Serialize;

use crate::lexer::{Heredoc, SourceLine};

/// The fixed Dockerfile instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Keyword {
    From,
    Run,
    Cmd,
    Label,
    Maintainer,
    Expose,
    Env,
    Add,
    Copy,
    Entrypoint,
    Volume,
    User,
    Workdir,
    Arg,
    Onbuild,
    StopSignal,
    Healthcheck,
    Shell,
}

impl Keyword {
    pub const ALL: [Keyword; 18] = [
        Keyword::From,
        Keyword::Run,
        Keyword::Cmd,
        Keyword::Label,
        Keyword::Maintainer,
        Keyword::Expose,
        Keyword::Env,
        Keyword::Add,
        Keyword::Copy,
        Keyword::Entrypoint,
        Keyword::Volume,
        Keyword::User,
        Keyword::Workdir,
        Keyword::Arg,
        Keyword::Onbuild,
        Keyword::StopSignal,
        Keyword::Healthcheck,
        Keyword::Shell,
    ];

    /// Case-insensitive lookup.
    pub fn parse(word: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(word))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::From => "FROM",
            Self::Run => "RUN",
            Self::Cmd => "CMD",
            Self::Label => "LABEL",
            Self::Maintainer => "MAINTAINER",
            Self::Expose => "EXPOSE",
            Self::Env => "ENV",
            Self::Add => "ADD",
            Self::Copy => "COPY",
            Self::Entrypoint => "ENTRYPOINT",
            Self::Volume => "VOLUME",
            Self::User => "USER",
            Self::Workdir => "WORKDIR",
            Self::Arg => "ARG",
            Self::Onbuild => "ONBUILD",
            Self::StopSignal => "STOPSIGNAL",
            Self::Healthcheck => "HEALTHCHECK",
            Self::Shell => "SHELL",
        }
    }

    /// Instructions that take leading `--flag` options.
    pub fn accepts_flags(&self) -> bool {
        matches!(
            self,
            Self::Copy | Self::Add | Self::Run | Self::From | Self::Healthcheck
        )
    }

    /// Instructions whose argument may be a JSON string array.
    pub fn accepts_exec_form(&self) -> bool {
        matches!(
            self,
            Self::Run
                | Self::Cmd
                | Self::Entrypoint
                | Self::Shell
                | Self::Copy
                | Self::Add
                | Self::Volume
        )
    }

    /// Instructions whose non-JSON argument is a shell command.
    pub fn is_shell_command(&self) -> bool {
        matches!(
            self,
            Self::Run | Self::Cmd | Self::Entrypoint | Self::Healthcheck
        )
    }
}

impl std::fmt::Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Form {
    Shell,
    Exec,
    Opaque,
}

/// A leading `--name` or `--name=value` option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flag {
    pub name: String,
    pub value: Option<String>,
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "--{}={}", self.name, value),
            None => write!(f, "--{}", self.name),
        }
    }
}

/// Positional argument payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arguments {
    Text(String),
    Exec(Vec<String>),
}

/// One tokenized instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub keyword: Keyword,
    /// Everything after the keyword, flags included.
    pub raw_args: String,
    pub flags: Vec<Flag>,
    pub form: Form,
    pub args: Arguments,
    pub lines: LineRange,
    pub heredocs: Vec<Heredoc>,
}

impl Token {
    pub fn flag(&self, name: &str) -> Option<&Flag> {
        self.flags.iter().find(|f| f.name == name)
    }

    /// The positional argument as text; exec-form arrays are re-joined.
    pub fn text(&self) -> String {
        match &self.args {
            Arguments::Text(text) => text.clone(),
            Arguments::Exec(items) => items.join(" "),
        }
    }
}

/// Tokenize a logical line.
pub fn tokenize(line: &SourceLine) -> Result<Token> {
    tokenize_text(&line.text, line.lines, line.heredocs.clone())
}

/// Tokenize instruction text. Also used for ONBUILD payloads.
pub fn tokenize_text(text: &str, lines: LineRange, heredocs: Vec<Heredoc>) -> Result<Token> {
    let (word, rest) = split_first_word(text);
    let keyword = Keyword::parse(word).ok_or_else(|| DockerfileError::UnknownInstruction {
        keyword: word.to_string(),
        lines,
    })?;

    let (flags, positional) = if keyword.accepts_flags() {
        extract_flags(rest)
    } else {
        (Vec::new(), rest)
    };

    let (form, args) = if keyword.accepts_exec_form() && looks_like_exec_form(positional) {
        let items = parse_exec_form(keyword, positional, lines)?;
        (Form::Exec, Arguments::Exec(items))
    } else if keyword.is_shell_command() {
        (Form::Shell, Arguments::Text(positional.to_string()))
    } else {
        (Form::Opaque, Arguments::Text(positional.to_string()))
    };

    tracing::trace!(
        line = lines.start,
        instruction = keyword.as_str(),
        flags = flags.len(),
        form = ?form,
        "tokenized"
    );

    Ok(Token {
        keyword,
        raw_args: rest.to_string(),
        flags,
        form,
        args,
        lines,
        heredocs,
    })
}

/// Split a string into the first word and the rest.
pub(crate) fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Peel leading `--flag[=value]` words off `rest`.
fn extract_flags(mut rest: &str) -> (Vec<Flag>, &str) {
    let mut flags = Vec::new();
    while rest.starts_with("--") {
        let (word, after) = split_first_word(rest);
        let body = &word[2..];
        if body.is_empty() {
            break;
        }
        let flag = match body.split_once('=') {
            Some((name, value)) => Flag {
                name: name.to_ascii_lowercase(),
                value: Some(value.to_string()),
            },
            None => Flag {
                name: body.to_ascii_lowercase(),
                value: None,
            },
        };
        flags.push(flag);
        rest = after;
    }
    (flags, rest)
}

/// Bracketed text that is meant as a JSON array.
///
/// `[ -f /etc/passwd ]` is a shell test, not an exec-form array; only text
/// whose first element is a string (or that is empty) is treated as one.
pub(crate) fn looks_like_exec_form(text: &str) -> bool {
    let text = text.trim();
    if !(text.starts_with('[') && text.ends_with(']')) {
        return false;
    }
    let inner = text[1..].trim_start();
    inner.starts_with('"') || inner.starts_with(']')
}

/// Parse a JSON string array like `["a", "b"]`.
pub fn parse_exec_form(keyword: Keyword, text: &str, lines: LineRange) -> Result<Vec<String>> {
    serde_json::from_str::<Vec<String>>(text.trim()).map_err(|e| DockerfileError::MalformedExecForm {
        keyword: keyword.as_str().to_string(),
        reason: e.to_string(),
        lines,
    })
}
