//! SQL and text templating.
//!
//! Templates substitute `${name}` placeholders from a variable map. The only
//! structure beyond substitution is [`RepeatJoin`], which renders a body once
//! per element of an ordered list and joins the results with a separator.
//! Text that is not a well-formed placeholder is passed through untouched, so
//! SQL containing `$` or example dates needs no escaping.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::TemplateError;

/// A template variable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateVar {
    /// A single value.
    Scalar(String),
    /// An ordered sequence of values.
    List(Vec<String>),
}

/// Variables available while rendering.
pub type TemplateVars = BTreeMap<String, TemplateVar>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed text template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parses template text. Malformed placeholders become literal text.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            match after.find('}') {
                Some(end) if is_identifier(&after[..end]) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(after[..end].to_string()));
                    rest = &after[end + 1..];
                }
                _ => {
                    literal.push_str("${");
                    rest = after;
                }
            }
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments }
    }

    /// Returns the placeholder names used by this template.
    #[must_use]
    pub fn placeholders(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Renders the template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingVariable`] if a placeholder has no value,
    /// or [`TemplateError::NotAScalar`] if it names a list.
    pub fn render(&self, vars: &TemplateVars) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match vars.get(name) {
                    Some(TemplateVar::Scalar(value)) => out.push_str(value),
                    Some(TemplateVar::List(_)) => {
                        return Err(TemplateError::NotAScalar { name: name.clone() });
                    }
                    None => return Err(TemplateError::MissingVariable { name: name.clone() }),
                },
            }
        }
        Ok(out)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders `body` once per element of the list variable `over` and joins the
/// results with `separator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatJoin {
    /// Name of the list variable to iterate.
    pub over: String,
    /// Variable name bound to the current element inside `body`.
    #[serde(rename = "as")]
    pub binding: String,
    /// Text rendered per element.
    pub body: String,
    /// Text placed between consecutive elements, never after the last one.
    #[serde(default)]
    pub separator: String,
    /// Text rendered once before the repeated section.
    #[serde(default)]
    pub header: Option<String>,
    /// Text rendered once after the repeated section.
    #[serde(default)]
    pub footer: Option<String>,
}

impl RepeatJoin {
    /// Renders the repeated section.
    ///
    /// # Errors
    ///
    /// Returns an error if `over` is missing or not a list, or if the body,
    /// header or footer reference a missing variable.
    pub fn render(&self, vars: &TemplateVars) -> Result<String, TemplateError> {
        let items = match vars.get(&self.over) {
            Some(TemplateVar::List(items)) => items,
            Some(TemplateVar::Scalar(_)) => {
                return Err(TemplateError::NotAList {
                    name: self.over.clone(),
                });
            }
            None => {
                return Err(TemplateError::MissingVariable {
                    name: self.over.clone(),
                });
            }
        };

        let body = Template::parse(&self.body);
        let mut scope = vars.clone();
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            scope.insert(self.binding.clone(), TemplateVar::Scalar(item.clone()));
            parts.push(body.render(&scope)?);
        }

        let mut out = String::new();
        if let Some(header) = &self.header {
            out.push_str(&Template::parse(header).render(vars)?);
        }
        out.push_str(&parts.join(&self.separator));
        if let Some(footer) = &self.footer {
            out.push_str(&Template::parse(footer).render(vars)?);
        }
        Ok(out)
    }
}

/// A template definition from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateDef {
    /// Plain substitution template.
    Text {
        /// Template text.
        text: String,
    },
    /// Repeat-and-join template.
    Repeat {
        /// Repeat definition.
        repeat: RepeatJoin,
    },
}

impl TemplateDef {
    /// Renders this definition.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] if a variable is missing or has the wrong shape.
    pub fn render(&self, vars: &TemplateVars) -> Result<String, TemplateError> {
        match self {
            Self::Text { text } => Template::parse(text).render(vars),
            Self::Repeat { repeat } => repeat.render(vars),
        }
    }

    /// Returns the variables this definition needs from its caller.
    #[must_use]
    pub fn required_vars(&self) -> BTreeSet<String> {
        match self {
            Self::Text { text } => Template::parse(text)
                .placeholders()
                .into_iter()
                .map(String::from)
                .collect(),
            Self::Repeat { repeat } => {
                let mut names: BTreeSet<String> = Template::parse(&repeat.body)
                    .placeholders()
                    .into_iter()
                    .filter(|n| *n != repeat.binding)
                    .map(String::from)
                    .collect();
                for extra in [&repeat.header, &repeat.footer].into_iter().flatten() {
                    names.extend(Template::parse(extra).placeholders().into_iter().map(String::from));
                }
                names.insert(repeat.over.clone());
                names
            }
        }
    }

    /// Returns true if any line is a bare `GO` batch terminator.
    #[must_use]
    pub fn has_batch_terminator(&self) -> bool {
        let texts: Vec<&str> = match self {
            Self::Text { text } => vec![text.as_str()],
            Self::Repeat { repeat } => [Some(&repeat.body), repeat.header.as_ref(), repeat.footer.as_ref()]
                .into_iter()
                .flatten()
                .map(String::as_str)
                .chain(std::iter::once(repeat.separator.as_str()))
                .collect(),
        };
        texts
            .iter()
            .flat_map(|t| t.lines())
            .any(|line| line.trim().eq_ignore_ascii_case("go"))
    }
}

/// A template named in the library or defined inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSource {
    /// Name of a template in the `templates:` section.
    Named(String),
    /// Inline definition.
    Inline(TemplateDef),
}

/// Named templates from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, TemplateDef>,
}

impl TemplateLibrary {
    /// Creates a library from named definitions.
    #[must_use]
    pub const fn new(templates: BTreeMap<String, TemplateDef>) -> Self {
        Self { templates }
    }

    /// Looks up the definition a source points at.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::UnknownTemplate`] for an unknown name.
    pub fn resolve<'a>(&'a self, source: &'a TemplateSource) -> Result<&'a TemplateDef, TemplateError> {
        match source {
            TemplateSource::Inline(def) => Ok(def),
            TemplateSource::Named(name) => self
                .templates
                .get(name)
                .ok_or_else(|| TemplateError::UnknownTemplate { name: name.clone() }),
        }
    }

    /// Returns a named template.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TemplateDef> {
        self.templates.get(name)
    }

    /// Iterates over named templates in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &TemplateDef)> {
        self.templates.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(s: &str) -> TemplateVar {
        TemplateVar::Scalar(s.to_string())
    }

    fn union_all() -> RepeatJoin {
        RepeatJoin {
            over: String::from("databases"),
            binding: String::from("database"),
            body: String::from("SELECT * FROM \"${database}\".\"${table}\""),
            separator: String::from("\nUNION ALL\n"),
            header: None,
            footer: None,
        }
    }

    #[test]
    fn test_substitution() {
        let mut vars = TemplateVars::new();
        vars.insert(String::from("bucket"), scalar("dns-results"));
        let out = Template::parse("s3://${bucket}/athena/").render(&vars).unwrap();
        assert_eq!(out, "s3://dns-results/athena/");
    }

    #[test]
    fn test_missing_variable() {
        let err = Template::parse("SELECT * FROM ${table}")
            .render(&TemplateVars::new())
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingVariable {
                name: String::from("table")
            }
        );
    }

    #[test]
    fn test_unknown_literal_text_untouched() {
        let text = "WHERE dt >= '2021-02-02' AND cost > $5 AND x = '${ not a var }' AND y = '${open";
        let out = Template::parse(text).render(&TemplateVars::new()).unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn test_union_all_three_databases() {
        let mut vars = TemplateVars::new();
        vars.insert(
            String::from("databases"),
            TemplateVar::List(vec![
                String::from("db_a"),
                String::from("db_b"),
                String::from("db_c"),
            ]),
        );
        vars.insert(String::from("table"), scalar("dns"));

        let out = union_all().render(&vars).unwrap();

        assert_eq!(out.matches("SELECT * FROM").count(), 3);
        assert_eq!(out.matches("UNION ALL").count(), 2);
        assert!(!out.trim_end().ends_with("UNION ALL"));
        let a = out.find("db_a").unwrap();
        let b = out.find("db_b").unwrap();
        let c = out.find("db_c").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_repeat_single_and_empty() {
        let mut vars = TemplateVars::new();
        vars.insert(String::from("table"), scalar("dns"));
        vars.insert(String::from("databases"), TemplateVar::List(vec![String::from("only")]));
        assert_eq!(union_all().render(&vars).unwrap(), "SELECT * FROM \"only\".\"dns\"");

        vars.insert(String::from("databases"), TemplateVar::List(vec![]));
        assert_eq!(union_all().render(&vars).unwrap(), "");
    }

    #[test]
    fn test_repeat_header_footer() {
        let mut repeat = union_all();
        repeat.header = Some(String::from("CREATE OR REPLACE VIEW ${view} AS\n"));
        repeat.footer = Some(String::from(";"));
        let mut vars = TemplateVars::new();
        vars.insert(String::from("view"), scalar("all_dns"));
        vars.insert(String::from("table"), scalar("dns"));
        vars.insert(
            String::from("databases"),
            TemplateVar::List(vec![String::from("a"), String::from("b")]),
        );
        let out = repeat.render(&vars).unwrap();
        assert!(out.starts_with("CREATE OR REPLACE VIEW all_dns AS\n"));
        assert!(out.ends_with("\"b\".\"dns\";"));
    }

    #[test]
    fn test_repeat_over_scalar_fails() {
        let mut vars = TemplateVars::new();
        vars.insert(String::from("databases"), scalar("db_a"));
        vars.insert(String::from("table"), scalar("dns"));
        assert!(matches!(
            union_all().render(&vars),
            Err(TemplateError::NotAList { .. })
        ));
    }

    #[test]
    fn test_required_vars_excludes_binding() {
        let def = TemplateDef::Repeat { repeat: union_all() };
        let vars = def.required_vars();
        assert!(vars.contains("databases"));
        assert!(vars.contains("table"));
        assert!(!vars.contains("database"));
    }

    #[test]
    fn test_batch_terminator_detected() {
        let mut repeat = union_all();
        repeat.body.push_str("\nGO");
        assert!(TemplateDef::Repeat { repeat }.has_batch_terminator());
        assert!(!TemplateDef::Repeat { repeat: union_all() }.has_batch_terminator());
    }

    #[test]
    fn test_template_source_yaml() {
        let named: TemplateSource = serde_yaml::from_str("union_all_dns").unwrap();
        assert_eq!(named, TemplateSource::Named(String::from("union_all_dns")));

        let inline: TemplateSource = serde_yaml::from_str(
            "repeat:\n  over: databases\n  as: database\n  body: SELECT 1\n  separator: ' UNION ALL '\n",
        )
        .unwrap();
        assert!(matches!(inline, TemplateSource::Inline(TemplateDef::Repeat { .. })));
    }
}
