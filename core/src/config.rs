use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parser configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParserConfig {
    /// Honor a leading `# escape=` directive
    pub escape_directive: bool,

    /// Record instruction-level errors and keep parsing instead of stopping
    /// at the first one
    pub best_effort: bool,

    /// Substitute `ARG`/`ENV` references; off keeps arguments as written
    pub expand_variables: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            escape_directive: true,
            best_effort: false,
            expand_variables: true,
        }
    }
}

impl ParserConfig {
    /// Configuration that collects every recoverable error.
    pub fn best_effort() -> Self {
        Self {
            best_effort: true,
            ..Self::default()
        }
    }

    pub fn with_escape_directive(mut self, enabled: bool) -> Self {
        self.escape_directive = enabled;
        self
    }

    pub fn with_expand_variables(mut self, enabled: bool) -> Self {
        self.expand_variables = enabled;
        self
    }

    /// Load from a JSON object. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
