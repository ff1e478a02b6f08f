//! Stage assembly.
//!
//! Groups instructions into `FROM`-delimited stages, keeps the document-wide
//! alias table used by `COPY --from=`, and resolves each stage's base.

use dockerfile_core::error::{DockerfileError, Result};
use dockerfile_core::LineRange;
use serde::Serialize;

use crate::instruction::{Instruction, InstructionKind};
use crate::reference::ImageRef;
use crate::resolver::{Resolver, VariableBinding};

/// Stage aliases in declaration order; `None` for unnamed stages.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: Vec<Option<String>>,
}

impl AliasTable {
    /// Register the next stage and return its index.
    pub fn push(&mut self, alias: Option<String>) -> usize {
        self.aliases.push(alias);
        self.aliases.len() - 1
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Index of the stage named `name`, compared case-insensitively.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.aliases
            .iter()
            .position(|alias| alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name)))
    }

    /// Resolve an alias or numeric index to a stage declared before the
    /// current (last) one.
    pub fn resolve_earlier(&self, reference: &str) -> Option<usize> {
        let current = self.aliases.len().checked_sub(1)?;
        let index = match reference.parse::<usize>() {
            Ok(index) => index,
            Err(_) => self.position(reference)?,
        };
        (index < current).then_some(index)
    }
}

/// What a stage is built on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageBase {
    External(ImageRef),
    /// An earlier stage, by index.
    Stage(usize),
    Scratch,
}

/// One `FROM`-delimited build stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub index: usize,
    pub alias: Option<String>,
    pub base: StageBase,
    /// The `FROM` first, then the stage body in source order.
    pub instructions: Vec<Instruction>,
    /// Bindings visible at the end of the stage.
    pub variables: Vec<VariableBinding>,
}

impl Stage {
    pub fn name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.index.to_string())
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, instruction) in self.instructions.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

/// Builds the stage list one instruction at a time.
#[derive(Debug, Default)]
pub struct StageAssembler {
    stages: Vec<Stage>,
    aliases: AliasTable,
    /// Bare external bases, rechecked against aliases declared later.
    unresolved_bases: Vec<(usize, String, LineRange)>,
}

impl StageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn has_stage(&self) -> bool {
        !self.stages.is_empty()
    }

    /// Open a stage for a `FROM`. Fails without opening anything when the
    /// alias is already taken.
    pub fn open_stage(&mut self, instruction: Instruction) -> Result<usize> {
        let InstructionKind::From { image, alias, .. } = &instruction.kind else {
            return Err(DockerfileError::MalformedInstruction {
                keyword: instruction.keyword().as_str().to_string(),
                reason: "a stage must start with FROM".to_string(),
                lines: instruction.lines,
            });
        };

        if let Some(alias) = alias {
            if self.aliases.position(alias).is_some() {
                return Err(DockerfileError::DuplicateStageAlias {
                    alias: alias.clone(),
                    lines: instruction.lines,
                });
            }
        }
        let alias = alias.clone();

        let index = self.stages.len();
        let base = if image.is_bare_name() {
            match self.aliases.position(&image.repository) {
                Some(earlier) => StageBase::Stage(earlier),
                None if image.repository.eq_ignore_ascii_case("scratch") => StageBase::Scratch,
                None => {
                    self.unresolved_bases
                        .push((index, image.repository.clone(), instruction.lines));
                    StageBase::External(image.clone())
                }
            }
        } else {
            StageBase::External(image.clone())
        };

        tracing::debug!(
            stage = index,
            alias = alias.as_deref().unwrap_or(""),
            line = instruction.lines.start,
            "stage opened"
        );

        self.aliases.push(alias.clone());
        self.stages.push(Stage {
            index,
            alias,
            base,
            instructions: vec![instruction],
            variables: Vec::new(),
        });
        Ok(index)
    }

    /// Append a body instruction to the current stage.
    pub fn push(&mut self, instruction: Instruction) -> Result<()> {
        match self.stages.last_mut() {
            Some(stage) => {
                stage.instructions.push(instruction);
                Ok(())
            }
            None => Err(DockerfileError::InstructionBeforeFirstFrom {
                keyword: instruction.keyword().as_str().to_string(),
                lines: instruction.lines,
            }),
        }
    }

    /// Close assembly: attach final bindings and report bases that name the
    /// same or a later stage.
    pub fn finish(mut self, resolver: &Resolver) -> (Vec<Stage>, Vec<DockerfileError>) {
        let errors: Vec<DockerfileError> = self
            .unresolved_bases
            .iter()
            .filter(|(_, name, _)| self.aliases.position(name).is_some())
            .map(|(_, name, lines)| DockerfileError::UnknownStageReference {
                reference: name.clone(),
                lines: *lines,
            })
            .collect();

        for stage in &mut self.stages {
            stage.variables = resolver.stage_bindings(stage.index).to_vec();
        }
        (self.stages, errors)
    }
}
