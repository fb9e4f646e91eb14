use std::collections::HashMap;

use tracing::warn;

use crate::error::{Error, Result};

/// A plain-text message with `{{name}}` placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageTemplate {
    source: &'static str,
}

impl MessageTemplate {
    pub const fn new(source: &'static str) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &'static str {
        self.source
    }

    /// Substitutes every placeholder in a single pass over the template, so
    /// values containing braces are copied verbatim. A placeholder without a
    /// value is an error rather than a literal `{{...}}` in somebody's inbox.
    pub fn render(&self, variables: &HashMap<&str, String>) -> Result<String> {
        let mut result = String::with_capacity(self.source.len());
        let mut rest = self.source;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };

            result.push_str(&rest[..start]);

            let name = rest[start + 2..start + len].trim();
            match variables.get(name) {
                Some(value) => result.push_str(value),
                None => {
                    warn!(missing_variable = %name, "Template contains unreplaced variable");
                    return Err(Error::invalid(format!(
                        "missing variable in template: {{{{{}}}}}",
                        name
                    )));
                }
            }

            rest = &rest[start + len + 2..];
        }

        result.push_str(rest);
        Ok(result)
    }
}
