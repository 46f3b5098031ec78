use snafu::Snafu;
use std::fmt;

const IDENTIFIER_PLACEHOLDER: &str = "%n";

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum RenderError {
    #[snafu(display(
        "SQL template `{}` expects {} identifiers but {} were given",
        template,
        expected,
        given
    ))]
    ParamCountMismatch {
        template: String,
        expected: usize,
        given: usize,
    },
}

type Result<T, E = RenderError> = std::result::Result<T, E>;

/// An analyze statement with `%n` identifier placeholders and the ordered
/// identifiers that fill them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    template: &'static str,
    params: Vec<String>,
}

impl SqlTemplate {
    pub fn new(template: &'static str, params: Vec<String>) -> Self {
        Self { template, params }
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn placeholder_count(&self) -> usize {
        self.template.matches(IDENTIFIER_PLACEHOLDER).count()
    }

    /// Substitutes every placeholder with its escaped identifier.
    pub fn render(&self) -> Result<String> {
        let expected = self.placeholder_count();
        if expected != self.params.len() {
            return Err(RenderError::ParamCountMismatch {
                template: self.template.to_string(),
                expected,
                given: self.params.len(),
            });
        }

        let mut rendered = String::with_capacity(self.template.len() + 16 * expected);
        let mut params = self.params.iter();
        let mut pieces = self.template.split(IDENTIFIER_PLACEHOLDER).peekable();
        while let Some(piece) = pieces.next() {
            rendered.push_str(piece);
            if pieces.peek().is_some() {
                if let Some(param) = params.next() {
                    rendered.push_str(&escape_identifier(param));
                }
            }
        }

        Ok(rendered)
    }
}

impl fmt::Display for SqlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(sql) => f.write_str(&sql),
            Err(_) => write!(f, "{} {:?}", self.template, self.params),
        }
    }
}

/// Quotes an identifier with backticks, doubling any embedded backtick.
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("orders", "`orders`")]
    #[case("weird`name", "`weird``name`")]
    #[case("a.b", "`a.b`")]
    #[case("", "``")]
    fn escapes_identifiers(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_identifier(input), expected);
    }

    #[test]
    fn renders_index_statement() {
        let template = SqlTemplate::new(
            "analyze table %n.%n index %n",
            vec!["test".into(), "t1".into(), "idx_a".into()],
        );
        insta::assert_snapshot!(template.render().unwrap(), @"analyze table `test`.`t1` index `idx_a`");
    }

    #[test]
    fn injection_attempt_stays_inside_identifier() {
        let template = SqlTemplate::new(
            "analyze table %n.%n",
            vec!["test".into(), "t`; drop table users; --".into()],
        );
        assert_eq!(
            template.render().unwrap(),
            "analyze table `test`.`t``; drop table users; --`"
        );
    }

    #[test]
    fn rejects_param_count_mismatch() {
        let template = SqlTemplate::new("analyze table %n.%n", vec!["test".into()]);
        let err = template.render().unwrap_err();
        assert_eq!(
            err,
            RenderError::ParamCountMismatch {
                template: "analyze table %n.%n".into(),
                expected: 2,
                given: 1,
            }
        );
    }
}
