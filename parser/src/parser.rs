//! Parse pipeline.
//!
//! Drives lexer, tokenizer, grammars, resolver and stage assembler over one
//! input in a single sequential pass, then validates the result.

use dockerfile_core::error::{DockerfileError, Result};
use dockerfile_core::{Diagnostic, LineRange, ParserConfig};
use serde::Serialize;

use crate::dockerfile::{self, GrammarContext};
use crate::instruction::{Instruction, InstructionKind};
use crate::lexer::{Directives, Lexer, SourceLine, DEFAULT_ESCAPE};
use crate::resolver::{Resolver, VariableBinding};
use crate::stage::{Stage, StageAssembler};
use crate::token::{self, Keyword};
use crate::validate;

/// Warning code for references to names no ARG or ENV declares.
pub const UNDECLARED_VARIABLE: &str = "UndeclaredVariable";

/// A parsed Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub directives: Directives,
    /// Bindings of the `ARG`s declared before the first `FROM`.
    pub global_args: Vec<VariableBinding>,
    /// The `ARG` instructions themselves, in source order.
    pub global_instructions: Vec<Instruction>,
    pub stages: Vec<Stage>,
    /// Warnings, plus recorded errors in best-effort mode.
    pub diagnostics: Vec<Diagnostic>,
}

impl Document {
    /// True when best-effort parsing recorded at least one error.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    /// Look a stage up by alias (case-insensitive) or index.
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        match name.parse::<usize>() {
            Ok(index) => self.stages.get(index),
            Err(_) => self.stages.iter().find(|s| {
                s.alias
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(name))
            }),
        }
    }

    /// Every instruction in source order, global `ARG`s first.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.global_instructions
            .iter()
            .chain(self.stages.iter().flat_map(|s| s.instructions.iter()))
    }
}

/// Result of [`DockerfileParser::parse_with_diagnostics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseOutcome {
    /// `None` when a fatal error stopped the parse.
    pub document: Option<Document>,
    /// Everything reported, including the fatal error if there was one.
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseOutcome {
    pub fn is_ok(&self) -> bool {
        self.document.is_some()
    }
}

/// Configured entry point. Holds no state between parses.
#[derive(Debug, Clone, Default)]
pub struct DockerfileParser {
    config: ParserConfig,
}

impl DockerfileParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse complete source text.
    pub fn parse(&self, source: &str) -> Result<Document> {
        self.parse_lines(source.lines())
    }

    /// Parse a byte buffer, which must be UTF-8.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Document> {
        let source =
            std::str::from_utf8(bytes).map_err(|e| DockerfileError::InvalidEncoding(e.to_string()))?;
        self.parse(source)
    }

    /// Parse a stream of physical lines (without line terminators).
    pub fn parse_lines<I, S>(&self, lines: I) -> Result<Document>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run(lines).map_err(|(error, _)| error)
    }

    /// Parse without failing: the fatal error, if any, comes back as an
    /// error diagnostic next to every warning collected before it.
    pub fn parse_with_diagnostics(&self, source: &str) -> ParseOutcome {
        match self.run(source.lines()) {
            Ok(document) => ParseOutcome {
                diagnostics: document.diagnostics.clone(),
                document: Some(document),
            },
            Err((error, mut diagnostics)) => {
                diagnostics.push(Diagnostic::from_error(&error));
                ParseOutcome {
                    document: None,
                    diagnostics,
                }
            }
        }
    }

    fn run<I, S>(&self, lines: I) -> std::result::Result<Document, (DockerfileError, Vec<Diagnostic>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lexer = Lexer::new(lines.into_iter(), self.config.escape_directive);
        let mut pass = ParsePass::new(self.config.best_effort, self.config.expand_variables);

        while let Some(next) = lexer.next() {
            pass.diagnostics.extend(lexer.take_warnings());
            let line = match next {
                Ok(line) => line,
                Err(e) => return Err(pass.abort(e)),
            };
            pass.resolver.set_escape(lexer.escape());
            if let Err(e) = pass.process(&line, lexer.escape()) {
                if let Err(e) = pass.recover(e) {
                    return Err(pass.abort(e));
                }
            }
        }
        pass.diagnostics.extend(lexer.take_warnings());

        pass.finish(lexer.directives().clone())
    }
}

/// State of one parse call.
struct ParsePass {
    best_effort: bool,
    expand: bool,
    resolver: Resolver,
    assembler: StageAssembler,
    global_instructions: Vec<Instruction>,
    diagnostics: Vec<Diagnostic>,
    /// Logical lines seen, including ones that failed to parse.
    line_count: usize,
}

impl ParsePass {
    fn new(best_effort: bool, expand: bool) -> Self {
        Self {
            best_effort,
            expand,
            resolver: Resolver::new(DEFAULT_ESCAPE),
            assembler: StageAssembler::new(),
            global_instructions: Vec::new(),
            diagnostics: Vec::new(),
            line_count: 0,
        }
    }

    /// Record a recoverable error in best-effort mode; hand anything else back.
    fn recover(&mut self, error: DockerfileError) -> Result<()> {
        if !(self.best_effort && error.is_recoverable()) {
            return Err(error);
        }
        tracing::warn!(code = error.code(), lines = ?error.lines(), "{}", error);
        self.diagnostics.push(Diagnostic::from_error(&error));
        Ok(())
    }

    fn abort(&mut self, error: DockerfileError) -> (DockerfileError, Vec<Diagnostic>) {
        tracing::debug!(code = error.code(), "parse aborted: {}", error);
        (error, std::mem::take(&mut self.diagnostics))
    }

    fn process(&mut self, line: &SourceLine, escape: char) -> Result<()> {
        let declared_at = self.line_count;
        self.line_count += 1;

        let token = token::tokenize(line)?;
        let resolver = self.expand.then_some(&self.resolver);
        let mut cx = GrammarContext::new(escape, resolver, self.assembler.aliases());
        let parsed = dockerfile::parse_instruction(&token, &mut cx);
        let undeclared = std::mem::take(&mut cx.undeclared);
        self.warn_undeclared(undeclared, token.lines);

        let instruction = Instruction {
            kind: parsed?,
            lines: token.lines,
        };

        match token.keyword {
            Keyword::From => {
                let opened = match self.assembler.open_stage(instruction.clone()) {
                    Ok(index) => index,
                    Err(e) => {
                        self.recover(e)?;
                        self.assembler.open_stage(without_alias(instruction))?
                    }
                };
                let scope = self.resolver.enter_stage();
                debug_assert_eq!(opened, scope);
            }
            Keyword::Arg if !self.assembler.has_stage() => {
                self.declare(&instruction.kind, declared_at);
                self.global_instructions.push(instruction);
            }
            _ => {
                if self.assembler.has_stage() {
                    self.declare(&instruction.kind, declared_at);
                }
                self.assembler.push(instruction)?;
            }
        }
        Ok(())
    }

    fn declare(&mut self, kind: &InstructionKind, declared_at: usize) {
        match kind {
            InstructionKind::Arg { args } => {
                for arg in args {
                    self.resolver.declare_arg(&arg.name, arg.default.clone(), declared_at);
                }
            }
            InstructionKind::Env { vars } => {
                for var in vars {
                    self.resolver.declare_env(&var.key, var.value.clone(), declared_at);
                }
            }
            _ => {}
        }
    }

    fn warn_undeclared(&mut self, names: Vec<String>, lines: LineRange) {
        for name in names {
            tracing::warn!(line = lines.start, variable = %name, "undeclared variable");
            self.diagnostics.push(Diagnostic::warning(
                UNDECLARED_VARIABLE,
                format!("variable '{}' is referenced but never declared", name),
                lines,
            ));
        }
    }

    fn finish(
        mut self,
        directives: Directives,
    ) -> std::result::Result<Document, (DockerfileError, Vec<Diagnostic>)> {
        let assembler = std::mem::take(&mut self.assembler);
        let (stages, errors) = assembler.finish(&self.resolver);
        for error in errors {
            if let Err(e) = self.recover(error) {
                return Err(self.abort(e));
            }
        }

        if let Err(e) = validate::check_document(self.line_count, &stages) {
            return Err(self.abort(e));
        }

        let lints = validate::lint(&stages, &directives.skipped_checks());
        self.diagnostics.extend(lints);

        tracing::debug!(
            stages = stages.len(),
            global_args = self.global_instructions.len(),
            diagnostics = self.diagnostics.len(),
            "parsed Dockerfile"
        );

        Ok(Document {
            directives,
            global_args: self.resolver.global_bindings().to_vec(),
            global_instructions: self.global_instructions,
            stages,
            diagnostics: self.diagnostics,
        })
    }
}

fn without_alias(mut instruction: Instruction) -> Instruction {
    if let InstructionKind::From { alias, .. } = &mut instruction.kind {
        *alias = None;
    }
    instruction
}
