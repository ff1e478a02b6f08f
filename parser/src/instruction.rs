//! Typed instruction nodes.
//!
//! `Display` renders the canonical Dockerfile form of each node; printing a
//! parsed instruction and parsing it again yields the same node.

use std::time::Duration;

use dockerfile_core::LineRange;
use serde::Serialize;

use crate::lexer::Heredoc;
use crate::reference::ImageRef;
use crate::token::Keyword;

/// How a value was quoted in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quoting {
    Unquoted,
    Single,
    Double,
}

/// A `KEY=VALUE` (or legacy `KEY VALUE`) pair from `ENV` or `LABEL`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyValue {
    pub key: String,
    /// Unquoted, expanded value.
    pub value: String,
    pub quoting: Quoting,
    /// `false` for the legacy space-separated form.
    pub has_equals: bool,
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_quoted(f, &self.key, Quoting::Unquoted)?;
        if self.has_equals {
            f.write_str("=")?;
            write_quoted(f, &self.value, self.quoting)
        } else if self.quoting == Quoting::Unquoted {
            // The rest of the line is the value, so whitespace needs no quotes.
            write!(f, " {}", escaped(&self.value, &['"', '\'']))
        } else {
            f.write_str(" ")?;
            write_quoted(f, &self.value, self.quoting)
        }
    }
}

/// One `ARG` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgDecl {
    pub name: String,
    pub default: Option<String>,
    pub quoting: Quoting,
}

impl std::fmt::Display for ArgDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;
        if let Some(default) = &self.default {
            f.write_str("=")?;
            write_quoted(f, default, self.quoting)?;
        }
        Ok(())
    }
}

/// Printed text always uses the default `\` escape.
fn write_quoted(f: &mut std::fmt::Formatter<'_>, value: &str, quoting: Quoting) -> std::fmt::Result {
    let needs_quotes = value.is_empty() && quoting != Quoting::Unquoted
        || value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'');
    match quoting {
        Quoting::Single if !value.contains('\'') => write!(f, "'{}'", value),
        Quoting::Unquoted if !needs_quotes => f.write_str(&escaped(value, &[])),
        _ => write!(f, "\"{}\"", escaped(value, &['"'])),
    }
}

/// Escape `\`, `$` and `extra` so the text reads back literally.
fn escaped(value: &str, extra: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == '$' || extra.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Command of `RUN`, `CMD`, `ENTRYPOINT` and `HEALTHCHECK CMD`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Opaque shell text.
    Shell(String),
    /// Exec-form argv; may be empty ("no command").
    Exec(Vec<String>),
}

impl Command {
    pub fn is_exec(&self) -> bool {
        matches!(self, Self::Exec(_))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shell(text) => f.write_str(text),
            Self::Exec(items) => write_json_array(f, items),
        }
    }
}

fn write_json_array(f: &mut std::fmt::Formatter<'_>, items: &[String]) -> std::fmt::Result {
    let json = serde_json::to_string(items).map_err(|_| std::fmt::Error)?;
    f.write_str(&json.replace("\",\"", "\", \""))
}

/// `RUN --mount=...`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    /// `bind` when not given.
    pub mount_type: String,
    pub target: Option<String>,
    /// Remaining `key[=value]` options in source order.
    pub options: Vec<(String, Option<String>)>,
    /// Flag value as written.
    pub raw: String,
}

/// `RUN --network=...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Default,
    None,
    Host,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::None => "none",
            Self::Host => "host",
        }
    }
}

/// `RUN --security=...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Sandbox,
    Insecure,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Insecure => "insecure",
        }
    }
}

/// `EXPOSE` protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

/// One exposed port or port range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Port {
    /// `80` or `8000-8010`.
    pub port: String,
    /// `None` when no protocol was written (tcp at build time).
    pub protocol: Option<Protocol>,
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.protocol {
            Some(protocol) => write!(f, "{}/{}", self.port, protocol.as_str()),
            None => f.write_str(&self.port),
        }
    }
}

/// Target of `COPY --from=`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRef {
    /// An earlier stage, by alias or index.
    Stage { index: usize, name: String },
    /// An external image.
    Image(ImageRef),
    /// Inside `ONBUILD`: resolved by the downstream build.
    Deferred(String),
}

impl std::fmt::Display for StageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stage { name, .. } => f.write_str(name),
            Self::Image(image) => write!(f, "{}", image),
            Self::Deferred(name) => f.write_str(name),
        }
    }
}

/// `COPY`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyInstruction {
    pub sources: Vec<String>,
    pub destination: String,
    pub from: Option<StageRef>,
    pub chown: Option<String>,
    pub chmod: Option<String>,
    pub link: bool,
    pub parents: bool,
    pub exclude: Vec<String>,
    pub heredocs: Vec<Heredoc>,
    pub exec_form: bool,
}

/// `ADD`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddInstruction {
    pub sources: Vec<String>,
    pub destination: String,
    pub chown: Option<String>,
    pub chmod: Option<String>,
    pub checksum: Option<String>,
    pub keep_git_dir: bool,
    pub link: bool,
    pub exclude: Vec<String>,
    pub heredocs: Vec<Heredoc>,
    pub exec_form: bool,
}

/// `HEALTHCHECK`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Healthcheck {
    /// `HEALTHCHECK NONE`: disable any inherited check.
    None,
    Check {
        command: Command,
        interval: Option<Duration>,
        timeout: Option<Duration>,
        start_period: Option<Duration>,
        start_interval: Option<Duration>,
        retries: Option<u32>,
    },
}

/// Instruction payload, one variant per keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "instruction", content = "args", rename_all = "UPPERCASE")]
pub enum InstructionKind {
    /// `FROM [--platform=<p>] <image> [AS <alias>]`
    From {
        image: ImageRef,
        platform: Option<String>,
        alias: Option<String>,
    },
    /// `RUN [--mount=...] [--network=...] [--security=...] <command>`
    Run {
        command: Command,
        mounts: Vec<Mount>,
        network: Option<NetworkMode>,
        security: Option<SecurityMode>,
        heredocs: Vec<Heredoc>,
    },
    /// `CMD ["exec", "form"]` or `CMD command`
    Cmd { command: Command },
    /// `ENTRYPOINT ["exec", "form"]` or `ENTRYPOINT command`
    Entrypoint { command: Command },
    /// `COPY [flags] <src>... <dst>`
    Copy(CopyInstruction),
    /// `ADD [flags] <src>... <dst>`
    Add(AddInstruction),
    /// `ENV <key>=<value> ...` or `ENV <key> <value>`
    Env { vars: Vec<KeyValue> },
    /// `ARG <name>[=<default>] ...`
    Arg { args: Vec<ArgDecl> },
    /// `LABEL <key>=<value> ...`
    Label { labels: Vec<KeyValue> },
    /// `EXPOSE <port>[/<proto>] ...`
    Expose { ports: Vec<Port> },
    /// `VOLUME <path>...` or `VOLUME ["path", ...]`
    Volume { paths: Vec<String>, exec_form: bool },
    /// `WORKDIR <path>`
    Workdir { path: String },
    /// `USER <user>[:<group>]`
    User { user: String, group: Option<String> },
    /// `SHELL ["executable", "params"]`
    Shell { shell: Vec<String> },
    /// `STOPSIGNAL <signal>`
    #[serde(rename = "STOPSIGNAL")]
    StopSignal { signal: String },
    /// `HEALTHCHECK NONE` or `HEALTHCHECK [options] CMD <command>`
    Healthcheck(Healthcheck),
    /// `ONBUILD <instruction>`
    Onbuild { trigger: Box<InstructionKind> },
    /// `MAINTAINER <name>`
    Maintainer { name: String },
}

impl InstructionKind {
    pub fn keyword(&self) -> Keyword {
        match self {
            Self::From { .. } => Keyword::From,
            Self::Run { .. } => Keyword::Run,
            Self::Cmd { .. } => Keyword::Cmd,
            Self::Entrypoint { .. } => Keyword::Entrypoint,
            Self::Copy(_) => Keyword::Copy,
            Self::Add(_) => Keyword::Add,
            Self::Env { .. } => Keyword::Env,
            Self::Arg { .. } => Keyword::Arg,
            Self::Label { .. } => Keyword::Label,
            Self::Expose { .. } => Keyword::Expose,
            Self::Volume { .. } => Keyword::Volume,
            Self::Workdir { .. } => Keyword::Workdir,
            Self::User { .. } => Keyword::User,
            Self::Shell { .. } => Keyword::Shell,
            Self::StopSignal { .. } => Keyword::StopSignal,
            Self::Healthcheck(_) => Keyword::Healthcheck,
            Self::Onbuild { .. } => Keyword::Onbuild,
            Self::Maintainer { .. } => Keyword::Maintainer,
        }
    }

    /// Heredoc bodies attached to this instruction (or its ONBUILD trigger).
    pub fn heredocs(&self) -> &[Heredoc] {
        match self {
            Self::Run { heredocs, .. } => heredocs,
            Self::Copy(copy) => &copy.heredocs,
            Self::Add(add) => &add.heredocs,
            Self::Onbuild { trigger } => trigger.heredocs(),
            _ => &[],
        }
    }
}

/// A parsed instruction with its source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub lines: LineRange,
}

impl Instruction {
    pub fn keyword(&self) -> Keyword {
        self.kind.keyword()
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}

/// Shortest `<n>s` / `<n>ms` rendering that parses back to `d`.
fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

fn write_paths(
    f: &mut std::fmt::Formatter<'_>,
    sources: &[String],
    destination: &str,
    exec_form: bool,
) -> std::fmt::Result {
    if exec_form {
        let mut all = sources.to_vec();
        all.push(destination.to_string());
        f.write_str(" ")?;
        return write_json_array(f, &all);
    }
    for path in sources.iter().map(String::as_str).chain(std::iter::once(destination)) {
        f.write_str(" ")?;
        write_quoted(f, path, Quoting::Unquoted)?;
    }
    Ok(())
}

fn write_heredocs(f: &mut std::fmt::Formatter<'_>, heredocs: &[Heredoc]) -> std::fmt::Result {
    for heredoc in heredocs {
        if heredoc.body.is_empty() {
            write!(f, "\n{}", heredoc.delimiter)?;
        } else {
            write!(f, "\n{}\n{}", heredoc.body, heredoc.delimiter)?;
        }
    }
    Ok(())
}

impl std::fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword().as_str())?;
        match self {
            Self::From {
                image,
                platform,
                alias,
            } => {
                if let Some(platform) = platform {
                    write!(f, " --platform={}", platform)?;
                }
                write!(f, " {}", image)?;
                if let Some(alias) = alias {
                    write!(f, " AS {}", alias)?;
                }
                Ok(())
            }
            Self::Run {
                command,
                mounts,
                network,
                security,
                heredocs,
            } => {
                for mount in mounts {
                    write!(f, " --mount={}", mount.raw)?;
                }
                if let Some(network) = network {
                    write!(f, " --network={}", network.as_str())?;
                }
                if let Some(security) = security {
                    write!(f, " --security={}", security.as_str())?;
                }
                write!(f, " {}", command)?;
                write_heredocs(f, heredocs)
            }
            Self::Cmd { command } | Self::Entrypoint { command } => write!(f, " {}", command),
            Self::Copy(copy) => {
                if let Some(from) = &copy.from {
                    write!(f, " --from={}", from)?;
                }
                if let Some(chown) = &copy.chown {
                    write!(f, " --chown={}", chown)?;
                }
                if let Some(chmod) = &copy.chmod {
                    write!(f, " --chmod={}", chmod)?;
                }
                if copy.link {
                    f.write_str(" --link")?;
                }
                if copy.parents {
                    f.write_str(" --parents")?;
                }
                for pattern in &copy.exclude {
                    write!(f, " --exclude={}", pattern)?;
                }
                write_paths(f, &copy.sources, &copy.destination, copy.exec_form)?;
                write_heredocs(f, &copy.heredocs)
            }
            Self::Add(add) => {
                if let Some(chown) = &add.chown {
                    write!(f, " --chown={}", chown)?;
                }
                if let Some(chmod) = &add.chmod {
                    write!(f, " --chmod={}", chmod)?;
                }
                if let Some(checksum) = &add.checksum {
                    write!(f, " --checksum={}", checksum)?;
                }
                if add.keep_git_dir {
                    f.write_str(" --keep-git-dir")?;
                }
                if add.link {
                    f.write_str(" --link")?;
                }
                for pattern in &add.exclude {
                    write!(f, " --exclude={}", pattern)?;
                }
                write_paths(f, &add.sources, &add.destination, add.exec_form)?;
                write_heredocs(f, &add.heredocs)
            }
            Self::Env { vars: pairs } | Self::Label { labels: pairs } => {
                for pair in pairs {
                    write!(f, " {}", pair)?;
                }
                Ok(())
            }
            Self::Arg { args } => {
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            Self::Expose { ports } => {
                for port in ports {
                    write!(f, " {}", port)?;
                }
                Ok(())
            }
            Self::Volume { paths, exec_form } => {
                if *exec_form {
                    f.write_str(" ")?;
                    return write_json_array(f, paths);
                }
                for path in paths {
                    f.write_str(" ")?;
                    write_quoted(f, path, Quoting::Unquoted)?;
                }
                Ok(())
            }
            Self::Workdir { path } => write!(f, " {}", path),
            Self::User { user, group } => match group {
                Some(group) => write!(f, " {}:{}", user, group),
                None => write!(f, " {}", user),
            },
            Self::Shell { shell } => {
                f.write_str(" ")?;
                write_json_array(f, shell)
            }
            Self::StopSignal { signal } => write!(f, " {}", signal),
            Self::Healthcheck(Healthcheck::None) => f.write_str(" NONE"),
            Self::Healthcheck(Healthcheck::Check {
                command,
                interval,
                timeout,
                start_period,
                start_interval,
                retries,
            }) => {
                let durations = [
                    ("interval", interval),
                    ("timeout", timeout),
                    ("start-period", start_period),
                    ("start-interval", start_interval),
                ];
                for (name, value) in durations {
                    if let Some(value) = value {
                        write!(f, " --{}={}", name, format_duration(*value))?;
                    }
                }
                if let Some(retries) = retries {
                    write!(f, " --retries={}", retries)?;
                }
                write!(f, " CMD {}", command)
            }
            Self::Onbuild { trigger } => write!(f, " {}", trigger),
            Self::Maintainer { name } => write!(f, " {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_display() {
        let pair = KeyValue {
            key: "MSG".to_string(),
            value: "hello world".to_string(),
            quoting: Quoting::Double,
            has_equals: true,
        };
        assert_eq!(pair.to_string(), "MSG=\"hello world\"");

        let legacy = KeyValue {
            key: "MY_VAR".to_string(),
            value: "my value".to_string(),
            quoting: Quoting::Unquoted,
            has_equals: false,
        };
        assert_eq!(legacy.to_string(), "MY_VAR my value");
    }

    #[test]
    fn test_key_value_unquoted_with_space_gets_quotes() {
        let pair = KeyValue {
            key: "A".to_string(),
            value: "x y".to_string(),
            quoting: Quoting::Unquoted,
            has_equals: true,
        };
        assert_eq!(pair.to_string(), "A=\"x y\"");
    }

    #[test]
    fn test_key_value_display_escapes_literals() {
        let pair = KeyValue {
            key: "A".to_string(),
            value: "$HOME\\bin".to_string(),
            quoting: Quoting::Unquoted,
            has_equals: true,
        };
        assert_eq!(pair.to_string(), r"A=\$HOME\\bin");

        let quoted = KeyValue {
            key: "B".to_string(),
            value: "say \"hi\" $USER".to_string(),
            quoting: Quoting::Double,
            has_equals: true,
        };
        assert_eq!(quoted.to_string(), r#"B="say \"hi\" \$USER""#);

        let legacy = KeyValue {
            key: "C".to_string(),
            value: "it's $5".to_string(),
            quoting: Quoting::Unquoted,
            has_equals: false,
        };
        assert_eq!(legacy.to_string(), r"C it\'s \$5");
    }

    #[test]
    fn test_single_quoted_display() {
        let arg = ArgDecl {
            name: "GREETING".to_string(),
            default: Some("$HOME".to_string()),
            quoting: Quoting::Single,
        };
        assert_eq!(arg.to_string(), "GREETING='$HOME'");
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::Shell("echo hi".to_string()).to_string(), "echo hi");
        assert_eq!(
            Command::Exec(vec!["echo".to_string(), "hi".to_string()]).to_string(),
            r#"["echo", "hi"]"#
        );
        assert_eq!(Command::Exec(Vec::new()).to_string(), "[]");
    }

    #[test]
    fn test_from_display() {
        let kind = InstructionKind::From {
            image: ImageRef::parse("golang:1.21").unwrap(),
            platform: Some("linux/amd64".to_string()),
            alias: Some("build".to_string()),
        };
        assert_eq!(kind.to_string(), "FROM --platform=linux/amd64 golang:1.21 AS build");
        assert_eq!(kind.keyword(), Keyword::From);
    }

    #[test]
    fn test_healthcheck_display() {
        let kind = InstructionKind::Healthcheck(Healthcheck::Check {
            command: Command::Shell("curl -f http://localhost/".to_string()),
            interval: Some(Duration::from_secs(30)),
            timeout: Some(Duration::from_millis(1500)),
            start_period: None,
            start_interval: None,
            retries: Some(3),
        });
        assert_eq!(
            kind.to_string(),
            "HEALTHCHECK --interval=30s --timeout=1500ms --retries=3 CMD curl -f http://localhost/"
        );
        assert_eq!(
            InstructionKind::Healthcheck(Healthcheck::None).to_string(),
            "HEALTHCHECK NONE"
        );
    }

    #[test]
    fn test_run_heredoc_display() {
        let kind = InstructionKind::Run {
            command: Command::Shell("<<EOF".to_string()),
            mounts: Vec::new(),
            network: Some(NetworkMode::None),
            security: None,
            heredocs: vec![Heredoc {
                delimiter: "EOF".to_string(),
                quoted: false,
                strip_tabs: false,
                body: "echo a\necho b".to_string(),
                lines: LineRange::new(2, 5),
            }],
        };
        assert_eq!(kind.to_string(), "RUN --network=none <<EOF\necho a\necho b\nEOF");
        assert_eq!(kind.heredocs().len(), 1);
    }

    #[test]
    fn test_onbuild_display() {
        let kind = InstructionKind::Onbuild {
            trigger: Box::new(InstructionKind::Workdir {
                path: "/app".to_string(),
            }),
        };
        assert_eq!(kind.to_string(), "ONBUILD WORKDIR /app");
    }

    #[test]
    fn test_serialize_tagged() {
        let kind = InstructionKind::Workdir {
            path: "/app".to_string(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["instruction"], "WORKDIR");
        assert_eq!(json["args"]["path"], "/app");
    }
}
