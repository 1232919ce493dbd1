//! Structural well-formedness checks for artifacts
//!
//! These run before an artifact is executed; they are cheap and never call
//! out of process.

use crate::domain::Artifact;

/// Checks an artifact's structure; `Err` carries one message per problem
pub trait StructuralCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, artifact: &Artifact) -> Result<(), Vec<String>>;
}

/// Rejects blank artifacts and artifacts without an entry point
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyCheck;

impl StructuralCheck for NonEmptyCheck {
    fn name(&self) -> &str {
        "non-empty"
    }

    fn check(&self, artifact: &Artifact) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if artifact.is_blank() {
            problems.push("Artifact content is empty".to_string());
        }
        if artifact.manifest.entry_point.trim().is_empty() {
            problems.push("Artifact manifest has no entry point".to_string());
        }
        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

/// Balanced (), [] and {} plus closed string literals
///
/// Understands `"`, `'` and backtick strings with backslash escapes, and
/// skips `//` and `/* */` comments. Single and double quoted strings end at
/// a newline.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimiterBalanceCheck;

#[derive(Clone, Copy, PartialEq)]
enum Scan {
    Code,
    Str(char),
    LineComment,
    BlockComment,
}

impl StructuralCheck for DelimiterBalanceCheck {
    fn name(&self) -> &str {
        "delimiter-balance"
    }

    fn check(&self, artifact: &Artifact) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let mut stack: Vec<(char, usize)> = Vec::new();
        let mut state = Scan::Code;
        let mut line = 1usize;
        let mut string_start = 0usize;
        let mut chars = artifact.content.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '\n' {
                line += 1;
            }
            match state {
                Scan::Code => match c {
                    '/' if chars.peek() == Some(&'/') => {
                        chars.next();
                        state = Scan::LineComment;
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        state = Scan::BlockComment;
                    }
                    '"' | '\'' | '`' => {
                        state = Scan::Str(c);
                        string_start = line;
                    }
                    '(' | '[' | '{' => stack.push((c, line)),
                    ')' | ']' | '}' => {
                        let open = match c {
                            ')' => '(',
                            ']' => '[',
                            _ => '{',
                        };
                        match stack.pop() {
                            Some((top, _)) if top == open => {}
                            Some((top, at)) => {
                                problems.push(format!(
                                    "Line {}: '{}' closes '{}' opened on line {}",
                                    line, c, top, at
                                ));
                            }
                            None => problems.push(format!("Line {}: unmatched '{}'", line, c)),
                        }
                    }
                    _ => {}
                },
                Scan::Str(quote) => match c {
                    '\\' => {
                        if chars.next() == Some('\n') {
                            line += 1;
                        }
                    }
                    '\n' if quote != '`' => {
                        problems.push(format!("Line {}: unclosed {} string", string_start, quote));
                        state = Scan::Code;
                    }
                    c if c == quote => state = Scan::Code,
                    _ => {}
                },
                Scan::LineComment => {
                    if c == '\n' {
                        state = Scan::Code;
                    }
                }
                Scan::BlockComment => {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        state = Scan::Code;
                    }
                }
            }
        }

        if let Scan::Str(quote) = state {
            problems.push(format!("Line {}: unclosed {} string", string_start, quote));
        }
        if state == Scan::BlockComment {
            problems.push("Unterminated block comment".to_string());
        }
        for (open, at) in stack {
            problems.push(format!("Line {}: unclosed '{}'", at, open));
        }

        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

/// Runs every check and collects all problems
#[derive(Default)]
pub struct AllOf {
    checks: Vec<Box<dyn StructuralCheck>>,
}

impl AllOf {
    pub fn new(checks: Vec<Box<dyn StructuralCheck>>) -> Self {
        Self { checks }
    }

    pub fn with(mut self, check: impl StructuralCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    /// Non-empty plus delimiter balance
    pub fn standard() -> Self {
        Self::default().with(NonEmptyCheck).with(DelimiterBalanceCheck)
    }
}

impl StructuralCheck for AllOf {
    fn name(&self) -> &str {
        "all-of"
    }

    fn check(&self, artifact: &Artifact) -> Result<(), Vec<String>> {
        let problems: Vec<String> = self
            .checks
            .iter()
            .filter_map(|c| c.check(artifact).err())
            .flatten()
            .collect();
        if problems.is_empty() { Ok(()) } else { Err(problems) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(content: &str) -> Artifact {
        Artifact::new("main", content)
    }

    #[test]
    fn test_non_empty() {
        assert!(NonEmptyCheck.check(&artifact("x = 1")).is_ok());
        assert!(NonEmptyCheck.check(&artifact("  \n ")).is_err());
        assert!(NonEmptyCheck.check(&Artifact::new("", "x")).is_err());
    }

    #[test]
    fn test_balanced() {
        let code = "fn main() {\n  let v = [1, (2)];\n  println!(\"{}\", v[0]);\n}\n";
        assert!(DelimiterBalanceCheck.check(&artifact(code)).is_ok());
    }

    #[test]
    fn test_unclosed_bracket() {
        let problems = DelimiterBalanceCheck.check(&artifact("def f(:\n  return [1, 2\n")).unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn test_mismatched_close() {
        let problems = DelimiterBalanceCheck.check(&artifact("foo(]")).unwrap_err();
        assert!(problems[0].contains("closes '('"));
    }

    #[test]
    fn test_unclosed_quote() {
        let problems = DelimiterBalanceCheck
            .check(&artifact("page.click(\"#submit)\nx = 1\n"))
            .unwrap_err();
        assert!(problems.iter().any(|p| p.contains("unclosed \" string")));
    }

    #[test]
    fn test_delimiters_inside_strings_and_comments_are_ignored() {
        let code = "s = \"(not [closed\" // also { ignored\n/* ) */ t = 'a\\'b'\n";
        assert!(DelimiterBalanceCheck.check(&artifact(code)).is_ok());
    }

    #[test]
    fn test_template_strings_span_lines() {
        assert!(DelimiterBalanceCheck.check(&artifact("x = `a\n(b`")).is_ok());
    }

    #[test]
    fn test_all_of_collects_everything() {
        let check = AllOf::standard();
        assert!(check.check(&artifact("f(1)")).is_ok());
        let problems = check.check(&Artifact::new("", "f(")).unwrap_err();
        assert_eq!(problems.len(), 2);
    }
}
