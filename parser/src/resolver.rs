//! Variable resolver.
//!
//! Tracks `ARG`/`ENV` bindings per build stage and expands `$NAME`,
//! `${NAME}`, `${NAME:-default}`, `${NAME:+alt}` (and the unset-only `-`/`+`
//! forms) in instruction arguments.
//!
//! Bindings live in an arena of layers: one global layer for `ARG`s declared
//! before the first `FROM`, and one layer per stage indexed by stage index.
//! Lookups consult the current stage layer first and fall back to the global
//! layer.

use serde::Serialize;

/// Build arguments Docker defines without a declaration.
const PREDEFINED_ARGS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "FTP_PROXY",
    "ftp_proxy",
    "NO_PROXY",
    "no_proxy",
    "ALL_PROXY",
    "all_proxy",
    "TARGETPLATFORM",
    "TARGETOS",
    "TARGETARCH",
    "TARGETVARIANT",
    "BUILDPLATFORM",
    "BUILDOS",
    "BUILDARCH",
    "BUILDVARIANT",
];

/// Which instruction declared a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingOrigin {
    Arg,
    Env,
}

/// Where a binding is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Stage(usize),
}

/// A declared variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableBinding {
    pub name: String,
    /// `None` for an `ARG` without a default.
    pub value: Option<String>,
    pub origin: BindingOrigin,
    /// Document-wide index of the declaring instruction.
    pub declared_at: usize,
    pub scope: Scope,
}

/// How a piece of text is expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandMode {
    /// Instruction words (`COPY`, `ENV`, `WORKDIR`, ...): unbound names
    /// become empty, an escaped `$` loses its escape character.
    Word,
    /// Shell command text (`RUN`, `CMD`, `ENTRYPOINT`, `HEALTHCHECK`): like
    /// `Word`, but escape characters are kept for the shell.
    Shell,
    /// One exec-form array element: like `Word`, but quotes are literal.
    Element,
}

/// Result of expanding one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub value: String,
    /// Names referenced without any declaration in scope.
    pub undeclared: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct Layer {
    bindings: Vec<VariableBinding>,
}

impl Layer {
    fn get(&self, name: &str) -> Option<&VariableBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Insert or overwrite in place; a redeclaration never errors.
    fn set(&mut self, binding: VariableBinding) {
        match self.bindings.iter_mut().find(|b| b.name == binding.name) {
            Some(existing) => *existing = binding,
            None => self.bindings.push(binding),
        }
    }
}

/// Scoped variable bindings for a single parse.
#[derive(Debug, Clone)]
pub struct Resolver {
    escape: char,
    global: Layer,
    stages: Vec<Layer>,
}

impl Resolver {
    pub fn new(escape: char) -> Self {
        Self {
            escape,
            global: Layer::default(),
            stages: Vec::new(),
        }
    }

    /// Change the escape character once directives are known.
    pub fn set_escape(&mut self, escape: char) {
        self.escape = escape;
    }

    /// Open the layer for the next stage and return its index. `ENV`
    /// bindings of the previous stage carry over.
    pub fn enter_stage(&mut self) -> usize {
        let index = self.stages.len();
        let mut layer = Layer::default();
        if let Some(previous) = self.stages.last() {
            for binding in previous.bindings.iter().filter(|b| b.origin == BindingOrigin::Env) {
                layer.set(VariableBinding {
                    scope: Scope::Stage(index),
                    ..binding.clone()
                });
            }
        }
        self.stages.push(layer);
        tracing::trace!(stage = index, inherited = self.stages[index].bindings.len(), "stage scope opened");
        index
    }

    pub fn current_stage(&self) -> Option<usize> {
        self.stages.len().checked_sub(1)
    }

    fn scope(&self) -> Scope {
        match self.current_stage() {
            Some(index) => Scope::Stage(index),
            None => Scope::Global,
        }
    }

    fn current_layer_mut(&mut self) -> &mut Layer {
        match self.stages.last_mut() {
            Some(layer) => layer,
            None => &mut self.global,
        }
    }

    /// Declare an `ARG`. Inside a stage, an `ARG` without default takes the
    /// global value of the same name, if there is one.
    pub fn declare_arg(&mut self, name: &str, default: Option<String>, declared_at: usize) {
        let scope = self.scope();
        let value = match (default, scope) {
            (Some(value), _) => Some(value),
            (None, Scope::Stage(_)) => self.global.get(name).and_then(|b| b.value.clone()),
            (None, Scope::Global) => None,
        };
        self.current_layer_mut().set(VariableBinding {
            name: name.to_string(),
            value,
            origin: BindingOrigin::Arg,
            declared_at,
            scope,
        });
    }

    /// Declare an `ENV`.
    pub fn declare_env(&mut self, name: &str, value: String, declared_at: usize) {
        let scope = self.scope();
        self.current_layer_mut().set(VariableBinding {
            name: name.to_string(),
            value: Some(value),
            origin: BindingOrigin::Env,
            declared_at,
            scope,
        });
    }

    /// Visible binding for `name`: current stage, then global.
    pub fn lookup(&self, name: &str) -> Option<&VariableBinding> {
        self.stages
            .last()
            .and_then(|layer| layer.get(name))
            .or_else(|| self.global.get(name))
    }

    /// Bindings declared before the first `FROM`.
    pub fn global_bindings(&self) -> &[VariableBinding] {
        &self.global.bindings
    }

    /// Snapshot of a stage's layer.
    pub fn stage_bindings(&self, index: usize) -> &[VariableBinding] {
        self.stages
            .get(index)
            .map(|layer| layer.bindings.as_slice())
            .unwrap_or(&[])
    }

    /// Expand against the current scope.
    pub fn expand(&self, text: &str, mode: ExpandMode) -> Expansion {
        self.expand_in(text, mode, false)
    }

    /// Expand against the global layer only (`FROM` arguments).
    pub fn expand_global(&self, text: &str) -> Expansion {
        self.expand_in(text, ExpandMode::Word, true)
    }

    fn find(&self, name: &str, global_only: bool) -> Option<&VariableBinding> {
        if global_only {
            self.global.get(name)
        } else {
            self.lookup(name)
        }
    }

    fn expand_in(&self, text: &str, mode: ExpandMode, global_only: bool) -> Expansion {
        let chars: Vec<char> = text.chars().collect();
        let mut expansion = Expansion::default();
        let mut in_single = false;
        let mut in_double = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if in_single {
                expansion.value.push(c);
                if c == '\'' {
                    in_single = false;
                }
                i += 1;
                continue;
            }

            if c == self.escape {
                if let Some(&next) = chars.get(i + 1) {
                    if next != '$' || mode == ExpandMode::Shell {
                        expansion.value.push(c);
                    }
                    expansion.value.push(next);
                    i += 2;
                    continue;
                }
            }

            match c {
                '\'' if !in_double && mode != ExpandMode::Element => in_single = true,
                '"' if mode != ExpandMode::Element => in_double = !in_double,
                '$' => {
                    if let Some(consumed) =
                        self.substitute(&chars[i + 1..], mode, global_only, &mut expansion)
                    {
                        i += 1 + consumed;
                        continue;
                    }
                }
                _ => {}
            }
            expansion.value.push(c);
            i += 1;
        }

        expansion
    }

    /// Substitute the reference following a `$`. Returns the number of
    /// characters consumed after the `$`, or `None` to keep the `$` literal.
    fn substitute(
        &self,
        rest: &[char],
        mode: ExpandMode,
        global_only: bool,
        out: &mut Expansion,
    ) -> Option<usize> {
        let reference = parse_reference(rest)?;
        let binding = self.find(&reference.name, global_only);

        let value = binding.and_then(|b| b.value.as_deref());
        let is_set = value.is_some();
        let non_empty = value.is_some_and(|v| !v.is_empty());

        let word = |w: &str| self.expand_in(w, mode, global_only);
        let replacement = match reference.modifier {
            None => {
                if binding.is_none() && !PREDEFINED_ARGS.contains(&reference.name.as_str()) {
                    out.undeclared.push(reference.name.clone());
                }
                value.unwrap_or_default().to_string()
            }
            Some(Modifier::DefaultIfEmpty(ref w)) if !non_empty => merge(out, word(w)),
            Some(Modifier::DefaultIfUnset(ref w)) if !is_set => merge(out, word(w)),
            Some(Modifier::AltIfNonEmpty(ref w)) if non_empty => merge(out, word(w)),
            Some(Modifier::AltIfSet(ref w)) if is_set => merge(out, word(w)),
            Some(Modifier::DefaultIfEmpty(_)) | Some(Modifier::DefaultIfUnset(_)) => {
                value.unwrap_or_default().to_string()
            }
            Some(Modifier::AltIfNonEmpty(_)) | Some(Modifier::AltIfSet(_)) => String::new(),
        };

        out.value.push_str(&replacement);
        Some(reference.len)
    }
}

fn merge(out: &mut Expansion, inner: Expansion) -> String {
    out.undeclared.extend(inner.undeclared);
    inner.value
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Modifier {
    /// `:-`
    DefaultIfEmpty(String),
    /// `-`
    DefaultIfUnset(String),
    /// `:+`
    AltIfNonEmpty(String),
    /// `+`
    AltIfSet(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    name: String,
    modifier: Option<Modifier>,
    /// Characters after the `$`.
    len: usize,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse `NAME` or `{NAME[op word]}` at the start of `rest`.
fn parse_reference(rest: &[char]) -> Option<Reference> {
    match rest.first()? {
        '{' => {
            let mut depth = 0usize;
            let close = rest.iter().position(|&c| {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        return depth == 0;
                    }
                    _ => {}
                }
                false
            })?;
            let inner = &rest[1..close];
            let name_len = inner.iter().take_while(|c| is_name_char(**c)).count();
            if name_len == 0 || !is_name_start(inner[0]) {
                return None;
            }
            let name: String = inner[..name_len].iter().collect();
            let tail: String = inner[name_len..].iter().collect();
            let modifier = if tail.is_empty() {
                None
            } else if let Some(w) = tail.strip_prefix(":-") {
                Some(Modifier::DefaultIfEmpty(w.to_string()))
            } else if let Some(w) = tail.strip_prefix(":+") {
                Some(Modifier::AltIfNonEmpty(w.to_string()))
            } else if let Some(w) = tail.strip_prefix('-') {
                Some(Modifier::DefaultIfUnset(w.to_string()))
            } else if let Some(w) = tail.strip_prefix('+') {
                Some(Modifier::AltIfSet(w.to_string()))
            } else {
                return None;
            };
            Some(Reference {
                name,
                modifier,
                len: close + 1,
            })
        }
        c if is_name_start(*c) => {
            let len = rest.iter().take_while(|c| is_name_char(**c)).count();
            Some(Reference {
                name: rest[..len].iter().collect(),
                modifier: None,
                len,
            })
        }
        _ => None,
    }
}
