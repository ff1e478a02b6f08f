//! Line assembler.
//!
//! Turns physical lines into logical [`SourceLine`]s: strips comments and
//! blank lines, joins escape-continued lines, records parser directives and
//! captures heredoc bodies verbatim.
//!
//! The lexer is a cursor over the physical line sequence. It never looks at
//! more than the current line, so line numbers stay exact for diagnostics.

use dockerfile_core::error::{DockerfileError, Result};
use dockerfile_core::{Diagnostic, LineRange};
use serde::Serialize;

/// Escape character used when no `# escape=` directive is present.
pub const DEFAULT_ESCAPE: char = '\\';

/// Keywords whose arguments may open heredocs.
const HEREDOC_KEYWORDS: &[&str] = &["RUN", "COPY", "ADD"];

/// A heredoc body attached to an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heredoc {
    /// Terminator word, without quotes.
    pub delimiter: String,
    /// `<<"EOF"` / `<<'EOF'`: the body is not expanded at build time.
    pub quoted: bool,
    /// `<<-EOF`: leading tabs removed from body and terminator.
    pub strip_tabs: bool,
    /// Content lines joined with `\n`, terminator excluded.
    pub body: String,
    /// Opening line through terminator line.
    pub lines: LineRange,
}

/// One logical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub lines: LineRange,
    /// Physical lines verbatim, newline-joined, heredoc bodies included.
    pub raw: String,
    /// Continuation-joined instruction text with comments removed.
    pub text: String,
    pub heredocs: Vec<Heredoc>,
}

/// Parser directives found at the top of the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Directives {
    pub escape: Option<char>,
    pub syntax: Option<String>,
    pub check: Option<String>,
}

impl Directives {
    /// Lint names disabled via `# check=skip=...`.
    pub fn skipped_checks(&self) -> Vec<String> {
        let Some(check) = &self.check else {
            return Vec::new();
        };
        check
            .split(';')
            .filter_map(|part| part.trim().strip_prefix("skip="))
            .flat_map(|list| list.split(','))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Heredoc opening marker found in an instruction line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeredocMarker {
    pub delimiter: String,
    pub quoted: bool,
    pub strip_tabs: bool,
}

/// Lazy iterator of logical lines over physical lines.
pub struct Lexer<I> {
    lines: I,
    line_no: usize,
    escape: char,
    honor_escape: bool,
    in_preamble: bool,
    directives: Directives,
    warnings: Vec<Diagnostic>,
    done: bool,
}

impl<'a> Lexer<std::str::Lines<'a>> {
    /// Lex a complete source text.
    pub fn from_source(source: &'a str, honor_escape: bool) -> Self {
        Lexer::new(source.lines(), honor_escape)
    }
}

impl<I, S> Lexer<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    /// Lex a stream of physical lines (without trailing newlines).
    pub fn new(lines: I, honor_escape: bool) -> Self {
        Self {
            lines,
            line_no: 0,
            escape: DEFAULT_ESCAPE,
            honor_escape,
            in_preamble: true,
            directives: Directives::default(),
            warnings: Vec::new(),
            done: false,
        }
    }

    /// Active escape character.
    pub fn escape(&self) -> char {
        self.escape
    }

    pub fn directives(&self) -> &Directives {
        &self.directives
    }

    /// Warnings produced so far (duplicate directives).
    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    fn next_physical(&mut self) -> Option<String> {
        let line = self.lines.next()?;
        self.line_no += 1;
        let mut line = line.as_ref();
        if self.line_no == 1 {
            line = line.strip_prefix('\u{feff}').unwrap_or(line);
        }
        Some(line.strip_suffix('\r').unwrap_or(line).to_string())
    }

    /// Record a directive. Returns `false` for unknown names, which are
    /// ordinary comments.
    fn record_directive(&mut self, name: &str, value: &str) -> Result<bool> {
        let line = self.line_no;
        match name {
            "escape" => {
                if self.directives.escape.is_some() {
                    return Err(DockerfileError::InvalidEscapeDirective {
                        value: value.to_string(),
                        lines: LineRange::single(line),
                    });
                }
                let mut chars = value.chars();
                let escape = match (chars.next(), chars.next()) {
                    (Some(c @ ('\\' | '`')), None) => c,
                    _ if !self.honor_escape => DEFAULT_ESCAPE,
                    _ => {
                        return Err(DockerfileError::InvalidEscapeDirective {
                            value: value.to_string(),
                            lines: LineRange::single(line),
                        })
                    }
                };
                self.directives.escape = Some(escape);
                if self.honor_escape {
                    self.escape = escape;
                }
                tracing::debug!(line, escape = %escape, honored = self.honor_escape, "escape directive");
            }
            "syntax" | "check" => {
                let slot = if name == "syntax" {
                    &mut self.directives.syntax
                } else {
                    &mut self.directives.check
                };
                if slot.is_some() {
                    tracing::warn!(line, directive = name, "duplicate parser directive ignored");
                    self.warnings.push(Diagnostic::warning(
                        "DuplicateDirective",
                        format!("parser directive '{}' is repeated; the first one is used", name),
                        LineRange::single(line),
                    ));
                } else {
                    *slot = Some(value.to_string());
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Collect a logical line starting at `first`.
    fn assemble(&mut self, first: String) -> Result<SourceLine> {
        let start = self.line_no;
        let mut raw = first.clone();
        let mut text = String::new();
        let mut current = first;

        'logical: loop {
            let Some(head) = strip_continuation(&current, self.escape) else {
                text.push_str(&current);
                break;
            };
            text.push_str(head);

            // Comments and blank lines inside a continuation are dropped.
            loop {
                let Some(next) = self.next_physical() else {
                    break 'logical;
                };
                raw.push('\n');
                raw.push_str(&next);
                let trimmed = next.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                current = next;
                break;
            }
        }

        let text = text.trim().to_string();
        let logical_end = self.line_no;
        let mut heredocs = Vec::new();

        if opens_heredocs(&text) {
            for marker in heredoc_markers(&text, self.escape) {
                let heredoc = self.capture_heredoc(marker, LineRange::new(start, logical_end), &mut raw)?;
                heredocs.push(heredoc);
            }
        }

        tracing::trace!(start, end = self.line_no, heredocs = heredocs.len(), "logical line");
        Ok(SourceLine {
            lines: LineRange::new(start, self.line_no),
            raw,
            text,
            heredocs,
        })
    }

    fn capture_heredoc(
        &mut self,
        marker: HeredocMarker,
        opening: LineRange,
        raw: &mut String,
    ) -> Result<Heredoc> {
        let open_line = self.line_no;
        let mut body = Vec::new();
        loop {
            let Some(line) = self.next_physical() else {
                return Err(DockerfileError::UnterminatedHeredoc {
                    delimiter: marker.delimiter,
                    lines: opening,
                });
            };
            raw.push('\n');
            raw.push_str(&line);
            let candidate = if marker.strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line.as_str()
            };
            if candidate.trim_end() == marker.delimiter {
                break;
            }
            body.push(candidate.to_string());
        }
        Ok(Heredoc {
            delimiter: marker.delimiter,
            quoted: marker.quoted,
            strip_tabs: marker.strip_tabs,
            body: body.join("\n"),
            lines: LineRange::new(open_line, self.line_no),
        })
    }
}

impl<I, S> Iterator for Lexer<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = Result<SourceLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let physical = self.next_physical()?;
            let trimmed = physical.trim();

            if self.in_preamble {
                if trimmed.is_empty() {
                    continue;
                }
                if let Some((name, value)) = parse_directive(trimmed) {
                    match self.record_directive(&name, &value) {
                        Ok(true) => continue,
                        Ok(false) => {}
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                }
                self.in_preamble = false;
            }

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let result = self.assemble(physical);
            if result.is_err() {
                self.done = true;
            }
            return Some(result);
        }
    }
}

/// `# name=value` with an alphanumeric name, lowercased.
fn parse_directive(line: &str) -> Option<(String, String)> {
    let body = line.strip_prefix('#')?;
    let (name, value) = body.split_once('=')?;
    let name = name.trim();
    let mut chars = name.chars();
    if !chars.next()?.is_ascii_alphabetic() || !chars.all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((name.to_ascii_lowercase(), value.to_string()))
}

/// The line without its trailing escape character, if it continues.
fn strip_continuation(line: &str, escape: char) -> Option<&str> {
    line.trim_end_matches([' ', '\t']).strip_suffix(escape)
}

/// Whether the instruction keyword (possibly under ONBUILD) takes heredocs.
fn opens_heredocs(text: &str) -> bool {
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    let keyword = if first.eq_ignore_ascii_case("ONBUILD") {
        match words.next() {
            Some(word) => word,
            None => return false,
        }
    } else {
        first
    };
    HEREDOC_KEYWORDS
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

/// Find unquoted `<<[-]WORD` markers in declaration order.
pub(crate) fn heredoc_markers(text: &str, escape: char) -> Vec<HeredocMarker> {
    let chars: Vec<char> = text.chars().collect();
    let mut markers = Vec::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == escape && !in_single {
            i += 2;
            continue;
        }
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '<' if !in_single && !in_double => {
                let doubled = chars.get(i + 1) == Some(&'<');
                let preceded = i > 0 && chars[i - 1] == '<';
                let here_string = chars.get(i + 2) == Some(&'<');
                if doubled && !preceded && !here_string {
                    if let Some((marker, consumed)) = read_marker(&chars[i + 2..]) {
                        markers.push(marker);
                        i += 2 + consumed;
                        continue;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    markers
}

/// Parse `[-]WORD`, `[-]"WORD"` or `[-]'WORD'`.
fn read_marker(rest: &[char]) -> Option<(HeredocMarker, usize)> {
    let mut i = 0;
    let strip_tabs = rest.first() == Some(&'-');
    if strip_tabs {
        i += 1;
    }
    let quote = match rest.get(i) {
        Some(q @ ('"' | '\'')) => {
            i += 1;
            Some(*q)
        }
        _ => None,
    };

    let word_start = i;
    while let Some(c) = rest.get(i) {
        if c.is_ascii_alphanumeric() || *c == '_' {
            i += 1;
        } else {
            break;
        }
    }
    let word: String = rest[word_start..i].iter().collect();
    let first = word.chars().next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }

    if let Some(q) = quote {
        if rest.get(i) != Some(&q) {
            return None;
        }
        i += 1;
    }

    Some((
        HeredocMarker {
            delimiter: word,
            quoted: quote.is_some(),
            strip_tabs,
        },
        i,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<SourceLine> {
        Lexer::from_source(source, true)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    // --- continuation ---

    #[test]
    fn test_continuation_concatenates_without_space() {
        let lines = lex_all("RUN echo a \\\necho b");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "RUN echo a echo b");
        assert_eq!(lines[0].lines, LineRange::new(1, 2));
    }

    #[test]
    fn test_continuation_preserves_leading_whitespace() {
        let lines = lex_all("RUN apk add \\\n    curl");
        assert_eq!(lines[0].text, "RUN apk add     curl");
    }

    #[test]
    fn test_continuation_multiple() {
        let lines = lex_all("RUN a \\\n b \\\n c\nRUN d");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "RUN a  b  c");
        assert_eq!(lines[1].lines, LineRange::single(4));
    }

    #[test]
    fn test_continuation_skips_comments_and_blanks() {
        let lines = lex_all("RUN a \\\n# note\n\n  b");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "RUN a   b");
        assert_eq!(lines[0].lines, LineRange::new(1, 4));
    }

    #[test]
    fn test_continuation_at_eof() {
        let lines = lex_all("FROM alpine\nRUN a \\");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "RUN a");
    }

    #[test]
    fn test_continuation_allows_trailing_whitespace() {
        let lines = lex_all("RUN a \\  \nb");
        assert_eq!(lines[0].text, "RUN a b");
    }

    #[test]
    fn test_crlf_line_endings() {
        let lines: Vec<_> = Lexer::new(vec!["FROM alpine\r", "RUN a \\\r", "b\r"].into_iter(), true)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "RUN a b");
    }

    // --- comments and directives ---

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let lines = lex_all("\n# comment\n\nFROM alpine\n   # indented\nRUN echo hi\n\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].lines, LineRange::single(4));
    }

    #[test]
    fn test_directives_recorded() {
        let mut lexer = Lexer::from_source("# syntax=docker/dockerfile:1\n# check=skip=all\nFROM alpine", true);
        let lines: Vec<_> = lexer.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lexer.directives().syntax.as_deref(), Some("docker/dockerfile:1"));
        assert_eq!(lexer.directives().skipped_checks(), vec!["all".to_string()]);
    }

    #[test]
    fn test_escape_directive_backtick() {
        let mut lexer = Lexer::from_source("# escape=`\nFROM windows\nRUN dir `\n  c:\\", true);
        let lines: Vec<_> = lexer.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(lexer.escape(), '`');
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "RUN dir   c:\\");
    }

    #[test]
    fn test_escape_directive_not_honored() {
        let mut lexer = Lexer::from_source("# escape=`\nFROM windows\nRUN a \\\nb", false);
        let lines: Vec<_> = lexer.by_ref().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(lexer.escape(), '\\');
        assert_eq!(lexer.directives().escape, Some('`'));
        assert_eq!(lines[1].text, "RUN a b");
    }

    #[test]
    fn test_escape_directive_after_comment_is_comment() {
        let mut lexer = Lexer::from_source("# hello\n# escape=`\nFROM alpine", true);
        let _ = lexer.by_ref().count();
        assert_eq!(lexer.escape(), '\\');
        assert_eq!(lexer.directives().escape, None);
    }

    #[test]
    fn test_invalid_escape_directive() {
        let result: Result<Vec<_>> = Lexer::from_source("# escape=x\nFROM alpine", true).collect();
        assert!(matches!(
            result,
            Err(DockerfileError::InvalidEscapeDirective { ref value, .. }) if value == "x"
        ));
    }

    #[test]
    fn test_duplicate_syntax_directive_warns() {
        let mut lexer = Lexer::from_source("# syntax=a\n# syntax=b\nFROM alpine", true);
        let _ = lexer.by_ref().count();
        assert_eq!(lexer.directives().syntax.as_deref(), Some("a"));
        let warnings = lexer.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "DuplicateDirective");
    }

    // --- heredocs ---

    #[test]
    fn test_heredoc_captured() {
        let lines = lex_all("FROM alpine\nRUN <<EOF\necho a\necho b\nEOF\nRUN echo c");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text, "RUN <<EOF");
        assert_eq!(lines[1].heredocs.len(), 1);
        assert_eq!(lines[1].heredocs[0].body, "echo a\necho b");
        assert_eq!(lines[1].lines, LineRange::new(2, 5));
        assert_eq!(lines[2].text, "RUN echo c");
    }

    #[test]
    fn test_heredoc_body_is_verbatim() {
        let lines = lex_all("RUN <<EOF\n# not a comment\n  indented \\\nEOF");
        assert_eq!(lines[0].heredocs[0].body, "# not a comment\n  indented \\");
    }

    #[test]
    fn test_heredoc_terminator_trailing_whitespace() {
        let lines = lex_all("RUN <<EOF\nx\nEOF   \nRUN y");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].heredocs[0].body, "x");
    }

    #[test]
    fn test_heredoc_strip_tabs_and_quoted() {
        let lines = lex_all("RUN <<-'END'\n\techo $HOME\n\tEND");
        let heredoc = &lines[0].heredocs[0];
        assert!(heredoc.strip_tabs);
        assert!(heredoc.quoted);
        assert_eq!(heredoc.delimiter, "END");
        assert_eq!(heredoc.body, "echo $HOME");
    }

    #[test]
    fn test_multiple_heredocs_in_order() {
        let lines = lex_all("COPY <<A <<B /dst/\nfirst\nA\nsecond\nB");
        let docs = &lines[0].heredocs;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].delimiter, "A");
        assert_eq!(docs[0].body, "first");
        assert_eq!(docs[1].delimiter, "B");
        assert_eq!(docs[1].body, "second");
    }

    #[test]
    fn test_unterminated_heredoc() {
        let result: Result<Vec<_>> = Lexer::from_source("FROM alpine\nRUN <<EOF\necho a", true).collect();
        match result {
            Err(DockerfileError::UnterminatedHeredoc { delimiter, lines }) => {
                assert_eq!(delimiter, "EOF");
                assert_eq!(lines.start, 2);
            }
            other => panic!("expected UnterminatedHeredoc, got {:?}", other),
        }
    }

    #[test]
    fn test_heredoc_ignored_for_other_keywords() {
        let lines = lex_all("LABEL a=<<EOF\nFROM alpine");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].heredocs.is_empty());
    }

    #[test]
    fn test_heredoc_markers_skip_quotes_and_shifts() {
        assert!(heredoc_markers("RUN echo '<<EOF'", '\\').is_empty());
        assert!(heredoc_markers("RUN echo $((1<<2))", '\\').is_empty());
        assert!(heredoc_markers("RUN cat <<<word", '\\').is_empty());
        let markers = heredoc_markers("RUN cat <<\"EOT\" > /f", '\\');
        assert_eq!(markers.len(), 1);
        assert!(markers[0].quoted);
    }

    #[test]
    fn test_heredoc_after_escaped_quote() {
        let lines = lex_all("FROM alpine\nRUN echo it\\'s <<EOF\nhello\nEOF");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].heredocs.len(), 1);
        assert_eq!(lines[1].heredocs[0].body, "hello");
        assert_eq!(heredoc_markers("RUN echo \\\"<<A", '\\').len(), 1);
        // No escapes inside single quotes.
        assert_eq!(heredoc_markers("RUN echo 'a\\' <<A", '\\').len(), 1);
    }
}
