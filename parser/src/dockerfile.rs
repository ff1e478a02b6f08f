//! Per-instruction grammars.
//!
//! Each keyword has one `parse_*` function turning a [`Token`] into an
//! [`InstructionKind`]. Variable expansion happens here, word by word, so an
//! expanded value containing whitespace never splits into extra arguments.
//! `ONBUILD` payloads are parsed with expansion and stage resolution turned
//! off.

use std::time::Duration;

use dockerfile_core::error::{DockerfileError, Result};
use dockerfile_core::LineRange;

use crate::instruction::{
    AddInstruction, ArgDecl, Command, CopyInstruction, Healthcheck, InstructionKind, KeyValue,
    Mount, NetworkMode, Port, Protocol, Quoting, SecurityMode, StageRef,
};
use crate::reference::ImageRef;
use crate::resolver::{ExpandMode, Resolver};
use crate::stage::AliasTable;
use crate::token::{self, Arguments, Keyword, Token};

/// Mount types `RUN --mount` accepts.
const MOUNT_TYPES: &[&str] = &["bind", "cache", "tmpfs", "secret", "ssh"];

/// Everything a grammar needs besides the token.
pub struct GrammarContext<'a> {
    pub escape: char,
    /// `None` disables expansion (ONBUILD payloads).
    pub resolver: Option<&'a Resolver>,
    pub stages: &'a AliasTable,
    pub in_onbuild: bool,
    /// Names referenced but never declared, in reference order.
    pub undeclared: Vec<String>,
}

impl<'a> GrammarContext<'a> {
    pub fn new(escape: char, resolver: Option<&'a Resolver>, stages: &'a AliasTable) -> Self {
        Self {
            escape,
            resolver,
            stages,
            in_onbuild: false,
            undeclared: Vec::new(),
        }
    }

    fn expand(&mut self, text: &str, mode: ExpandMode, global: bool) -> String {
        let Some(resolver) = self.resolver else {
            return text.to_string();
        };
        let expansion = if global {
            resolver.expand_global(text)
        } else {
            resolver.expand(text, mode)
        };
        for name in expansion.undeclared {
            if !self.undeclared.contains(&name) {
                self.undeclared.push(name);
            }
        }
        expansion.value
    }

    /// Expand then unquote one raw word.
    fn word(&mut self, raw: &str, global: bool) -> (String, Quoting) {
        let expanded = self.expand(raw, ExpandMode::Word, global);
        unquote(&expanded, self.escape)
    }

    fn words(&mut self, text: &str, global: bool) -> Vec<String> {
        split_words(text, self.escape)
            .into_iter()
            .map(|raw| self.word(raw, global).0)
            .collect()
    }
}

/// Parse one token into its instruction.
pub fn parse_instruction(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    tracing::trace!(
        line = token.lines.start,
        instruction = token.keyword.as_str(),
        onbuild = cx.in_onbuild,
        "parsing instruction"
    );
    match token.keyword {
        Keyword::From => parse_from(token, cx),
        Keyword::Run => parse_run(token, cx),
        Keyword::Cmd => parse_command(token, cx).map(|command| InstructionKind::Cmd { command }),
        Keyword::Entrypoint => {
            parse_command(token, cx).map(|command| InstructionKind::Entrypoint { command })
        }
        Keyword::Copy => parse_copy(token, cx),
        Keyword::Add => parse_add(token, cx),
        Keyword::Env => parse_key_values(token, cx).map(|vars| InstructionKind::Env { vars }),
        Keyword::Label => parse_key_values(token, cx).map(|labels| InstructionKind::Label { labels }),
        Keyword::Arg => parse_arg(token, cx),
        Keyword::Expose => parse_expose(token, cx),
        Keyword::Volume => parse_volume(token, cx),
        Keyword::Workdir => parse_workdir(token, cx),
        Keyword::User => parse_user(token, cx),
        Keyword::Shell => parse_shell(token),
        Keyword::StopSignal => parse_stopsignal(token, cx),
        Keyword::Healthcheck => parse_healthcheck(token, cx),
        Keyword::Onbuild => parse_onbuild(token, cx),
        Keyword::Maintainer => parse_maintainer(token),
    }
}

fn malformed(keyword: Keyword, reason: impl Into<String>, lines: LineRange) -> DockerfileError {
    DockerfileError::MalformedInstruction {
        keyword: keyword.as_str().to_string(),
        reason: reason.into(),
        lines,
    }
}

// --- Flags ---

/// Reject flags outside `allowed`, and repeats of non-repeatable flags.
fn check_flags(token: &Token, allowed: &[&str], repeatable: &[&str]) -> Result<()> {
    for (i, flag) in token.flags.iter().enumerate() {
        if !allowed.contains(&flag.name.as_str()) {
            return Err(malformed(
                token.keyword,
                format!("unknown flag: --{}", flag.name),
                token.lines,
            ));
        }
        let repeated = token.flags[..i].iter().any(|f| f.name == flag.name);
        if repeated && !repeatable.contains(&flag.name.as_str()) {
            return Err(malformed(
                token.keyword,
                format!("duplicate flag: --{}", flag.name),
                token.lines,
            ));
        }
    }
    Ok(())
}

/// Expanded values of every occurrence of a valued flag.
fn flag_values(
    token: &Token,
    name: &str,
    cx: &mut GrammarContext<'_>,
    global: bool,
) -> Result<Vec<String>> {
    let mut values = Vec::new();
    for flag in token.flags.iter().filter(|f| f.name == name) {
        let raw = flag.value.as_deref().ok_or_else(|| {
            malformed(token.keyword, format!("--{} requires a value", name), token.lines)
        })?;
        // A value that expands to nothing leaves the flag unset.
        let (value, _) = cx.word(raw, global);
        if !value.is_empty() {
            values.push(value);
        }
    }
    Ok(values)
}

fn flag_value(token: &Token, name: &str, cx: &mut GrammarContext<'_>) -> Result<Option<String>> {
    Ok(flag_values(token, name, cx, false)?.pop())
}

/// `--link`, `--link=true`, `--link=false`.
fn flag_bool(token: &Token, name: &str) -> Result<bool> {
    match token.flag(name) {
        None => Ok(false),
        Some(flag) => match flag.value.as_deref() {
            None => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
            Some(v) => Err(malformed(
                token.keyword,
                format!("invalid value for --{}: {}", name, v),
                token.lines,
            )),
        },
    }
}

// --- Individual instruction parsers ---

fn parse_from(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    check_flags(token, &["platform"], &[])?;
    let platform = flag_values(token, "platform", cx, true)?.pop();

    let text = token.text();
    let words = split_words(&text, cx.escape);
    let (image_word, alias) = match words.as_slice() {
        [] => return Err(malformed(Keyword::From, "FROM requires an image argument", token.lines)),
        [image] => (*image, None),
        [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("AS") => (*image, Some(*alias)),
        [_, as_kw] if as_kw.eq_ignore_ascii_case("AS") => {
            return Err(malformed(Keyword::From, "AS requires a stage name", token.lines))
        }
        _ => {
            return Err(malformed(
                Keyword::From,
                "FROM requires either one or three arguments",
                token.lines,
            ))
        }
    };

    let (image, _) = cx.word(image_word, true);
    if image.is_empty() {
        return Err(malformed(
            Keyword::From,
            format!("base image '{}' expands to an empty name", image_word),
            token.lines,
        ));
    }
    let image = ImageRef::parse(&image).map_err(|e| malformed(Keyword::From, e.to_string(), token.lines))?;

    if let Some(alias) = alias {
        if !is_valid_stage_name(alias) {
            return Err(malformed(
                Keyword::From,
                format!("invalid stage name '{}'", alias),
                token.lines,
            ));
        }
    }

    Ok(InstructionKind::From {
        image,
        platform,
        alias: alias.map(str::to_string),
    })
}

/// Stage names start with a letter and continue with letters, digits,
/// `-`, `_` or `.`.
fn is_valid_stage_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn parse_run(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    check_flags(token, &["mount", "network", "security"], &["mount"])?;

    let mounts = flag_values(token, "mount", cx, false)?
        .into_iter()
        .map(|value| parse_mount(&value).map_err(|reason| malformed(Keyword::Run, reason, token.lines)))
        .collect::<Result<Vec<_>>>()?;

    let network = match flag_value(token, "network", cx)?.as_deref() {
        None => None,
        Some("default") => Some(NetworkMode::Default),
        Some("none") => Some(NetworkMode::None),
        Some("host") => Some(NetworkMode::Host),
        Some(other) => {
            return Err(malformed(
                Keyword::Run,
                format!("unsupported network mode: {}", other),
                token.lines,
            ))
        }
    };

    let security = match flag_value(token, "security", cx)?.as_deref() {
        None => None,
        Some("sandbox") => Some(SecurityMode::Sandbox),
        Some("insecure") => Some(SecurityMode::Insecure),
        Some(other) => {
            return Err(malformed(
                Keyword::Run,
                format!("unsupported security mode: {}", other),
                token.lines,
            ))
        }
    };

    let command = match &token.args {
        Arguments::Exec(items) => Command::Exec(items.clone()),
        Arguments::Text(text) => {
            if text.trim().is_empty() && token.heredocs.is_empty() {
                return Err(malformed(Keyword::Run, "RUN requires a command", token.lines));
            }
            Command::Shell(cx.expand(text.trim(), ExpandMode::Shell, false))
        }
    };

    Ok(InstructionKind::Run {
        command,
        mounts,
        network,
        security,
        heredocs: token.heredocs.clone(),
    })
}

/// Parse a `--mount` value: `type=cache,target=/root/.cache,id=x`.
fn parse_mount(value: &str) -> std::result::Result<Mount, String> {
    let mut mount_type = None;
    let mut target = None;
    let mut options = Vec::new();

    for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let (key, val) = match field.split_once('=') {
            Some((key, val)) => (key.trim().to_ascii_lowercase(), Some(val.trim().to_string())),
            None => (field.to_ascii_lowercase(), None),
        };
        match key.as_str() {
            "type" => mount_type = val,
            "target" | "dst" | "destination" => target = val,
            _ => options.push((key, val)),
        }
    }

    let mount_type = mount_type.unwrap_or_else(|| "bind".to_string());
    if !MOUNT_TYPES.contains(&mount_type.as_str()) {
        return Err(format!("unsupported mount type: {}", mount_type));
    }
    if target.as_deref().map_or(true, str::is_empty) && !matches!(mount_type.as_str(), "secret" | "ssh") {
        return Err(format!("{} mount requires a target", mount_type));
    }

    Ok(Mount {
        mount_type,
        target,
        options,
        raw: value.to_string(),
    })
}

/// `CMD` / `ENTRYPOINT` body.
fn parse_command(token: &Token, cx: &mut GrammarContext<'_>) -> Result<Command> {
    match &token.args {
        Arguments::Exec(items) => Ok(Command::Exec(items.clone())),
        Arguments::Text(text) if text.trim().is_empty() => Err(malformed(
            token.keyword,
            format!("{} requires an argument", token.keyword),
            token.lines,
        )),
        Arguments::Text(text) => Ok(Command::Shell(cx.expand(text.trim(), ExpandMode::Shell, false))),
    }
}

/// Sources and destination of `COPY`/`ADD`, plus whether they were exec-form.
fn parse_paths(token: &Token, cx: &mut GrammarContext<'_>) -> Result<(Vec<String>, String, bool)> {
    let (mut paths, exec_form) = match &token.args {
        Arguments::Exec(items) => (
            items
                .iter()
                .map(|item| cx.expand(item, ExpandMode::Element, false))
                .collect::<Vec<_>>(),
            true,
        ),
        Arguments::Text(text) => (cx.words(text, false), false),
    };

    if paths.len() < 2 {
        return Err(malformed(
            token.keyword,
            format!(
                "{} requires at least two arguments, but only {} provided",
                token.keyword,
                paths.len()
            ),
            token.lines,
        ));
    }
    let destination = paths.pop().unwrap_or_default();
    Ok((paths, destination, exec_form))
}

fn parse_copy(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    check_flags(
        token,
        &["from", "chown", "chmod", "link", "parents", "exclude"],
        &["exclude"],
    )?;

    let from = match flag_value(token, "from", cx)? {
        Some(value) => Some(resolve_copy_from(value, cx, token.lines)?),
        None => None,
    };
    let chown = flag_value(token, "chown", cx)?;
    let chmod = flag_value(token, "chmod", cx)?;
    let link = flag_bool(token, "link")?;
    let parents = flag_bool(token, "parents")?;
    let exclude = flag_values(token, "exclude", cx, false)?;
    let (sources, destination, exec_form) = parse_paths(token, cx)?;

    Ok(InstructionKind::Copy(CopyInstruction {
        sources,
        destination,
        from,
        chown,
        chmod,
        link,
        parents,
        exclude,
        heredocs: token.heredocs.clone(),
        exec_form,
    }))
}

/// Resolve `--from=`: an earlier stage alias or index, else an image when
/// the value is unmistakably an image reference.
fn resolve_copy_from(value: String, cx: &GrammarContext<'_>, lines: LineRange) -> Result<StageRef> {
    if cx.in_onbuild {
        return Ok(StageRef::Deferred(value));
    }
    if let Some(index) = cx.stages.resolve_earlier(&value) {
        return Ok(StageRef::Stage { index, name: value });
    }
    if value.contains(['/', ':', '@']) {
        let image = ImageRef::parse(&value).map_err(|e| malformed(Keyword::Copy, e.to_string(), lines))?;
        return Ok(StageRef::Image(image));
    }
    Err(DockerfileError::UnknownStageReference {
        reference: value,
        lines,
    })
}

fn parse_add(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    check_flags(
        token,
        &["chown", "chmod", "checksum", "keep-git-dir", "link", "exclude"],
        &["exclude"],
    )?;

    let chown = flag_value(token, "chown", cx)?;
    let chmod = flag_value(token, "chmod", cx)?;
    let checksum = flag_value(token, "checksum", cx)?;
    let keep_git_dir = flag_bool(token, "keep-git-dir")?;
    let link = flag_bool(token, "link")?;
    let exclude = flag_values(token, "exclude", cx, false)?;
    let (sources, destination, exec_form) = parse_paths(token, cx)?;

    Ok(InstructionKind::Add(AddInstruction {
        sources,
        destination,
        chown,
        chmod,
        checksum,
        keep_git_dir,
        link,
        exclude,
        heredocs: token.heredocs.clone(),
        exec_form,
    }))
}

/// `ENV` and `LABEL`: `KEY=VALUE ...` or the legacy `KEY VALUE`.
fn parse_key_values(token: &Token, cx: &mut GrammarContext<'_>) -> Result<Vec<KeyValue>> {
    let keyword = token.keyword;
    let text = token.text();
    let words = split_words(&text, cx.escape);
    let Some(first) = words.first() else {
        return Err(malformed(
            keyword,
            format!("{} requires at least one argument", keyword),
            token.lines,
        ));
    };

    if find_unquoted(first, '=', cx.escape).is_none() {
        // Legacy form: the value is the rest of the line.
        let (_, rest) = token::split_first_word(&text);
        if rest.is_empty() {
            return Err(malformed(
                keyword,
                format!("{} {} requires a value", keyword, first),
                token.lines,
            ));
        }
        let (key, _) = unquote(first, cx.escape);
        let (value, quoting) = cx.word(rest, false);
        return Ok(vec![KeyValue {
            key,
            value,
            quoting,
            has_equals: false,
        }]);
    }

    let mut pairs = Vec::with_capacity(words.len());
    for word in words {
        let Some(eq) = find_unquoted(word, '=', cx.escape) else {
            return Err(malformed(
                keyword,
                format!("can't find = in \"{}\"; must be of the form: name=value", word),
                token.lines,
            ));
        };
        let (key, _) = unquote(&word[..eq], cx.escape);
        if key.is_empty() {
            return Err(malformed(keyword, "names can not be blank", token.lines));
        }
        let (value, quoting) = cx.word(&word[eq + 1..], false);
        pairs.push(KeyValue {
            key,
            value,
            quoting,
            has_equals: true,
        });
    }
    Ok(pairs)
}

fn parse_arg(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    let text = token.text();
    let words = split_words(&text, cx.escape);
    if words.is_empty() {
        return Err(malformed(Keyword::Arg, "ARG requires at least one argument", token.lines));
    }

    let mut args = Vec::with_capacity(words.len());
    for word in words {
        let (name, default, quoting) = match find_unquoted(word, '=', cx.escape) {
            Some(eq) => {
                let (value, quoting) = cx.word(&word[eq + 1..], false);
                (&word[..eq], Some(value), quoting)
            }
            None => (word, None, Quoting::Unquoted),
        };
        if name.is_empty() {
            return Err(malformed(Keyword::Arg, "names can not be blank", token.lines));
        }
        args.push(ArgDecl {
            name: name.to_string(),
            default,
            quoting,
        });
    }
    Ok(InstructionKind::Arg { args })
}

fn parse_expose(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    let mut ports = Vec::new();
    for spec in cx.words(&token.text(), false) {
        if spec.is_empty() {
            continue;
        }
        let (port, protocol) = match spec.split_once('/') {
            Some((port, proto)) => {
                let protocol = match proto.to_ascii_lowercase().as_str() {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    "sctp" => Protocol::Sctp,
                    _ => {
                        return Err(malformed(
                            Keyword::Expose,
                            format!("invalid proto: {}", proto),
                            token.lines,
                        ))
                    }
                };
                (port, Some(protocol))
            }
            None => (spec.as_str(), None),
        };
        if !is_port_or_range(port) {
            return Err(malformed(
                Keyword::Expose,
                format!("invalid containerPort: {}", port),
                token.lines,
            ));
        }
        ports.push(Port {
            port: port.to_string(),
            protocol,
        });
    }

    if ports.is_empty() {
        return Err(malformed(Keyword::Expose, "EXPOSE requires at least one port", token.lines));
    }
    Ok(InstructionKind::Expose { ports })
}

fn is_port_or_range(port: &str) -> bool {
    let is_number = |s: &str| !s.is_empty() && s.len() <= 5 && s.bytes().all(|b| b.is_ascii_digit());
    match port.split_once('-') {
        Some((start, end)) => is_number(start) && is_number(end),
        None => is_number(port),
    }
}

fn parse_volume(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    let (paths, exec_form) = match &token.args {
        Arguments::Exec(items) => (
            items
                .iter()
                .map(|item| cx.expand(item, ExpandMode::Element, false))
                .collect::<Vec<_>>(),
            true,
        ),
        Arguments::Text(text) => (cx.words(text, false), false),
    };

    if paths.is_empty() {
        return Err(malformed(Keyword::Volume, "VOLUME requires at least one path", token.lines));
    }
    if paths.iter().any(|p| p.trim().is_empty()) {
        return Err(malformed(
            Keyword::Volume,
            "VOLUME specified can not be an empty string",
            token.lines,
        ));
    }
    Ok(InstructionKind::Volume { paths, exec_form })
}

fn parse_workdir(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    let text = token.text();
    let (path, _) = cx.word(text.trim(), false);
    if path.is_empty() {
        return Err(malformed(Keyword::Workdir, "WORKDIR requires a path", token.lines));
    }
    Ok(InstructionKind::Workdir { path })
}

fn parse_user(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    let words = cx.words(&token.text(), false);
    let [spec] = words.as_slice() else {
        return Err(malformed(Keyword::User, "USER requires exactly one argument", token.lines));
    };

    let (user, group) = match spec.split_once(':') {
        Some((user, group)) => (user.to_string(), Some(group.to_string())),
        None => (spec.clone(), None),
    };
    if user.is_empty() {
        return Err(malformed(Keyword::User, "USER requires a user name", token.lines));
    }
    Ok(InstructionKind::User { user, group })
}

fn parse_shell(token: &Token) -> Result<InstructionKind> {
    match &token.args {
        Arguments::Exec(items) if !items.is_empty() => Ok(InstructionKind::Shell {
            shell: items.clone(),
        }),
        Arguments::Exec(_) => Err(malformed(
            Keyword::Shell,
            "SHELL requires at least one argument",
            token.lines,
        )),
        Arguments::Text(_) => Err(malformed(
            Keyword::Shell,
            "SHELL requires the arguments to be in JSON form",
            token.lines,
        )),
    }
}

fn parse_stopsignal(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    let words = cx.words(&token.text(), false);
    match words.as_slice() {
        [signal] if !signal.is_empty() => Ok(InstructionKind::StopSignal {
            signal: signal.clone(),
        }),
        _ => Err(malformed(
            Keyword::StopSignal,
            "STOPSIGNAL requires exactly one argument",
            token.lines,
        )),
    }
}

fn parse_healthcheck(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    check_flags(
        token,
        &["interval", "timeout", "start-period", "start-interval", "retries"],
        &[],
    )?;

    let text = token.text();
    let (first, rest) = token::split_first_word(&text);

    if first.eq_ignore_ascii_case("NONE") {
        if !rest.is_empty() || !token.flags.is_empty() {
            return Err(malformed(
                Keyword::Healthcheck,
                "HEALTHCHECK NONE takes no arguments or options",
                token.lines,
            ));
        }
        return Ok(InstructionKind::Healthcheck(Healthcheck::None));
    }

    if !first.eq_ignore_ascii_case("CMD") {
        return Err(malformed(
            Keyword::Healthcheck,
            "HEALTHCHECK requires either NONE or CMD",
            token.lines,
        ));
    }

    let command = if token::looks_like_exec_form(rest) {
        Command::Exec(token::parse_exec_form(Keyword::Healthcheck, rest, token.lines)?)
    } else if rest.is_empty() {
        return Err(malformed(
            Keyword::Healthcheck,
            "HEALTHCHECK CMD requires a command",
            token.lines,
        ));
    } else {
        Command::Shell(cx.expand(rest, ExpandMode::Shell, false))
    };

    let interval = duration_flag(token, "interval", cx)?;
    let timeout = duration_flag(token, "timeout", cx)?;
    let start_period = duration_flag(token, "start-period", cx)?;
    let start_interval = duration_flag(token, "start-interval", cx)?;
    let retries = match flag_value(token, "retries", cx)? {
        Some(value) => Some(value.parse::<u32>().map_err(|e| {
            malformed(
                Keyword::Healthcheck,
                format!("invalid --retries value '{}': {}", value, e),
                token.lines,
            )
        })?),
        None => None,
    };

    Ok(InstructionKind::Healthcheck(Healthcheck::Check {
        command,
        interval,
        timeout,
        start_period,
        start_interval,
        retries,
    }))
}

fn duration_flag(token: &Token, name: &str, cx: &mut GrammarContext<'_>) -> Result<Option<Duration>> {
    let Some(value) = flag_value(token, name, cx)? else {
        return Ok(None);
    };
    humantime::parse_duration(&value).map(Some).map_err(|e| {
        malformed(
            Keyword::Healthcheck,
            format!("invalid --{} duration '{}': {}", name, value, e),
            token.lines,
        )
    })
}

fn parse_onbuild(token: &Token, cx: &mut GrammarContext<'_>) -> Result<InstructionKind> {
    let text = token.text();
    if text.trim().is_empty() {
        return Err(malformed(Keyword::Onbuild, "ONBUILD requires an instruction", token.lines));
    }

    let payload = token::tokenize_text(&text, token.lines, token.heredocs.clone())?;
    if matches!(
        payload.keyword,
        Keyword::Onbuild | Keyword::From | Keyword::Maintainer
    ) {
        return Err(DockerfileError::InvalidOnbuildPayload {
            keyword: payload.keyword.as_str().to_string(),
            lines: token.lines,
        });
    }

    let mut deferred = GrammarContext {
        escape: cx.escape,
        resolver: None,
        stages: cx.stages,
        in_onbuild: true,
        undeclared: Vec::new(),
    };
    let trigger = parse_instruction(&payload, &mut deferred)?;
    Ok(InstructionKind::Onbuild {
        trigger: Box::new(trigger),
    })
}

fn parse_maintainer(token: &Token) -> Result<InstructionKind> {
    let name = token.text().trim().to_string();
    if name.is_empty() {
        return Err(malformed(Keyword::Maintainer, "MAINTAINER requires a name", token.lines));
    }
    Ok(InstructionKind::Maintainer { name })
}

// --- Helpers ---

/// Split on whitespace outside quotes; the escape character protects the
/// next character. Words are returned raw, quotes included.
fn split_words(text: &str, escape: char) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = None;
    let mut quote = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == escape => escaped = true,
            Some(_) => {}
            None if c == escape => escaped = true,
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if let Some(s) = start.take() {
                    words.push(&text[s..i]);
                }
            }
            None => {}
        }
    }
    if let Some(s) = start {
        words.push(&text[s..]);
    }
    words
}

/// Byte offset of the first `target` outside quotes.
fn find_unquoted(word: &str, target: char, escape: char) -> Option<usize> {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in word.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == escape => escaped = true,
            Some(_) => {}
            None if c == target => return Some(i),
            None if c == escape => escaped = true,
            None if c == '"' || c == '\'' => quote = Some(c),
            None => {}
        }
    }
    None
}

/// Remove quotes and escapes from a word.
///
/// Inside double quotes only `"`, `$` and the escape character itself can
/// be escaped; inside single quotes nothing can. The quoting style is
/// `Single`/`Double` only when one quoted segment spans the whole word.
fn unquote(word: &str, escape: char) -> (String, Quoting) {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len());
    let mut quote: Option<char> = None;
    let mut quoting = Quoting::Unquoted;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                    if i == 0 || i + 1 != chars.len() {
                        quoting = Quoting::Unquoted;
                    }
                } else {
                    out.push(c);
                }
            }
            Some(_) => {
                if c == escape && matches!(chars.get(i + 1), Some(&n) if n == '"' || n == '$' || n == escape) {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == '"' {
                    quote = None;
                    if i + 1 != chars.len() {
                        quoting = Quoting::Unquoted;
                    }
                } else {
                    out.push(c);
                }
            }
            None => {
                if c == escape && i + 1 < chars.len() {
                    out.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == '"' || c == '\'' {
                    quote = Some(c);
                    if i == 0 {
                        quoting = if c == '"' { Quoting::Double } else { Quoting::Single };
                    }
                } else {
                    out.push(c);
                }
            }
        }
        i += 1;
    }
    if quote.is_some() {
        quoting = Quoting::Unquoted;
    }
    (out, quoting)
}
