//! Opaque script text
//!
//! Closures are executed by an external engine. Here they are only stored and their body extracted for display.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    #[serde(default = "Closure::empty_text")]
    pub groovy: String,
}

impl Default for Closure {
    fn default() -> Self {
        Self {
            groovy: Self::empty_text(),
        }
    }
}

impl Closure {
    pub fn new(groovy: impl Into<String>) -> Self {
        Self {
            groovy: groovy.into(),
        }
    }

    fn empty_text() -> String {
        "{}".to_string()
    }

    /// Text between the outer braces
    ///
    /// Leading and trailing blank lines are dropped. A single line body is trimmed, otherwise the indentation of the
    /// first line (a tab counts as 4 columns) is removed from every line.
    pub fn body(&self) -> String {
        let mut body = self.groovy.trim();
        match body.strip_prefix('{') {
            Some(stripped) => body = stripped,
            None => tracing::warn!(closure = %self.groovy, "closure text does not start with {{"),
        }
        match body.strip_suffix('}') {
            Some(stripped) => body = stripped,
            None => tracing::warn!(closure = %self.groovy, "closure text does not end with }}"),
        }

        let mut lines: Vec<&str> = body.split('\n').collect();
        while lines.first().is_some_and(|line| line.trim().is_empty()) {
            lines.remove(0);
        }
        while lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }

        match lines.as_slice() {
            [] => return String::new(),
            [single] => return single.trim().to_string(),
            _ => {}
        }

        let indent = lines[0]
            .chars()
            .map_while(|c| match c {
                ' ' => Some(1),
                '\t' => Some(4),
                _ => None,
            })
            .sum::<usize>();

        lines
            .iter()
            .map(|line| strip_indent(line, indent))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let mut columns = 0;
    let mut offset = 0;
    for c in line.chars() {
        if columns >= indent {
            break;
        }
        match c {
            ' ' => columns += 1,
            '\t' => columns += 4,
            _ => break,
        }
        offset += 1;
    }
    &line[offset..]
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_line_is_trimmed() {
        assert_eq!(Closure::new("{  it.name  }").body(), "it.name");
        assert_eq!(Closure::default().body(), "");
    }

    #[test]
    fn multi_line_is_dedented_by_first_line() {
        let closure = Closure::new("{\n\n    if (x) {\n        y()\n    }\n  z\n\n}");
        assert_eq!(closure.body(), "if (x) {\n    y()\n}\nz");
    }

    #[test]
    fn tabs_count_as_four_columns() {
        let closure = Closure::new("{\n\tone\n    two\n}");
        assert_eq!(closure.body(), "one\ntwo");
    }

    #[test]
    fn missing_braces_keep_text() {
        assert_eq!(Closure::new("a\n  b").body(), "a\n  b");
    }
}
