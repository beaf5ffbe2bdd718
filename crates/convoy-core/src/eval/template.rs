//! String templates with `{{ .Path }}` placeholders.

use super::{Param, Params};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Vec<String>),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    text: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or_else(|| template_error(text, "unclosed '{{'"))?;
            let field = after_open[..close].trim();
            segments.push(Segment::Field(parse_field(text, field)?));
            rest = &after_open[close + 2..];
        }
        if rest.contains("}}") {
            return Err(template_error(text, "unexpected '}}'"));
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            text: text.to_string(),
            segments,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn render(&self, params: &Params) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(path) => match params.lookup(path.as_slice()) {
                    Some(Param::Str(value)) => out.push_str(value),
                    Some(Param::Map(_)) => {
                        return Err(template_error(
                            &self.text,
                            format!("field .{} is an object, not a value", path.join(".")),
                        ));
                    }
                    None => {
                        return Err(template_error(
                            &self.text,
                            format!("field .{} not found", path.join(".")),
                        ));
                    }
                },
            }
        }
        Ok(out)
    }
}

fn parse_field(text: &str, field: &str) -> Result<Vec<String>> {
    let path = field
        .strip_prefix('.')
        .ok_or_else(|| template_error(text, format!("field '{}' must start with '.'", field)))?;
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    let valid = segments.iter().all(|s| {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    });
    if !valid {
        return Err(template_error(text, format!("invalid field '{}'", field)));
    }
    Ok(segments)
}

fn template_error(text: &str, message: impl Into<String>) -> Error {
    Error::Template {
        template: text.to_string(),
        message: message.into(),
    }
}
