//! Document printers.
//!
//! Two renderings: canonical Dockerfile text (one instruction per line,
//! flags normalised, heredoc bodies inline) and a pretty-printed JSON dump
//! of the syntax tree.

use dockerfile_core::error::Result;

use crate::lexer::Directives;
use crate::parser::Document;

/// Canonical Dockerfile text for `document`.
pub fn to_dockerfile(document: &Document) -> String {
    document.to_string()
}

/// The syntax tree as pretty JSON.
pub fn to_ast_json(document: &Document) -> Result<String> {
    Ok(serde_json::to_string_pretty(document)?)
}

/// `# escape=` is never written: printed values are escaped with `\`.
fn write_directives(f: &mut std::fmt::Formatter<'_>, directives: &Directives) -> std::fmt::Result {
    let mut any = false;
    if let Some(syntax) = &directives.syntax {
        writeln!(f, "# syntax={}", syntax)?;
        any = true;
    }
    if let Some(check) = &directives.check {
        writeln!(f, "# check={}", check)?;
        any = true;
    }
    if any {
        writeln!(f)?;
    }
    Ok(())
}

impl std::fmt::Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_directives(f, &self.directives)?;
        for instruction in &self.global_instructions {
            writeln!(f, "{}", instruction)?;
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 || !self.global_instructions.is_empty() {
                writeln!(f)?;
            }
            writeln!(f, "{}", stage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DockerfileParser;

    fn parse(source: &str) -> Document {
        DockerfileParser::default().parse(source).unwrap()
    }

    #[test]
    fn test_to_dockerfile_canonical() {
        let doc = parse(
            "# syntax=docker/dockerfile:1\nARG BASE=alpine\nfrom ${BASE}:3.19 as build\nrun  apt-get update && \\\n    apt-get install -y curl\nFROM scratch\ncopy --from=build /out /out\n",
        );
        assert_eq!(
            to_dockerfile(&doc),
            "# syntax=docker/dockerfile:1\n\nARG BASE=alpine\n\nFROM alpine:3.19 AS build\nRUN apt-get update &&     apt-get install -y curl\n\nFROM scratch\nCOPY --from=build /out /out\n"
        );
    }

    #[test]
    fn test_to_dockerfile_normalises_escape() {
        let doc = parse("# escape=`\nFROM alpine\nENV A=C:\\bin B=`$HOME\n");
        let printed = to_dockerfile(&doc);
        assert_eq!(printed, "FROM alpine\nENV A=C:\\\\bin B=\\$HOME\n");
        let reparsed = parse(&printed);
        let kinds = |d: &Document| d.stages[0].instructions.iter().map(|i| i.kind.clone()).collect::<Vec<_>>();
        assert_eq!(kinds(&reparsed), kinds(&doc));
    }

    #[test]
    fn test_to_dockerfile_heredoc() {
        let doc = parse("FROM alpine\nRUN <<EOF\necho a\necho b\nEOF\n");
        assert_eq!(to_dockerfile(&doc), "FROM alpine\nRUN <<EOF\necho a\necho b\nEOF\n");
    }

    #[test]
    fn test_to_ast_json() {
        let doc = parse("FROM alpine AS base\nEXPOSE 80/tcp\n");
        let json = to_ast_json(&doc).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["stages"][0]["alias"], "base");
        assert_eq!(value["stages"][0]["instructions"][1]["kind"]["instruction"], "EXPOSE");
        assert_eq!(
            value["stages"][0]["instructions"][1]["kind"]["args"]["ports"][0]["protocol"],
            "tcp"
        );
        assert_eq!(value["stages"][0]["instructions"][0]["lines"]["start"], 1);
    }
}
