use std::collections::HashMap;

use serde_json::Value;

use crate::types::{RenderedContent, Template};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unresolved variable: {0}")]
    UnresolvedVariable(String),
}

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Expands `{{{{` to a literal `{{` without treating it as a placeholder.
/// Any other `{{name}}` is looked up in `vars`; a miss is `ErrUnresolvedVariable`.
fn render_str(source: &str, vars: &HashMap<String, Value>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if source[i..].starts_with("{{{{") {
            out.push_str("{{");
            i += 4;
            continue;
        }
        if source[i..].starts_with("{{") {
            let rest = &source[i + 2..];
            let end = rest.find("}}").ok_or_else(|| {
                RenderError::UnresolvedVariable(rest.trim().to_string())
            })?;
            let name = rest[..end].trim();
            let value = vars
                .get(name)
                .ok_or_else(|| RenderError::UnresolvedVariable(name.to_string()))?;
            out.push_str(&coerce(value));
            i += 2 + end + 2;
            continue;
        }
        let ch = source[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

/// Pure, side-effect free render: `{{name}}` placeholders are substituted
/// with string coercions of `vars[name]`. Extra vars are ignored; any
/// placeholder with no matching var fails the whole render.
pub fn render(template: &Template, vars: &HashMap<String, Value>) -> Result<RenderedContent, RenderError> {
    let subject = template
        .subject
        .as_ref()
        .map(|s| render_str(s, vars))
        .transpose()?;
    let body = render_str(&template.body, vars)?;
    Ok(RenderedContent {
        subject,
        body,
        data: vars.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;

    fn template(body: &str) -> Template {
        Template {
            template_id: "t1".into(),
            app_id: "app1".into(),
            channel: Channel::Email,
            subject: None,
            body: body.to_string(),
            declared_variables: vec![],
        }
    }

    #[test]
    fn substitutes_known_variable() {
        let vars = HashMap::from([("name".to_string(), Value::String("A".to_string()))]);
        let rendered = render(&template("Hi {{name}}"), &vars).unwrap();
        assert_eq!(rendered.body, "Hi A");
    }

    #[test]
    fn unresolved_variable_errors() {
        let err = render(&template("Hi {{name}}"), &HashMap::new()).unwrap_err();
        assert_eq!(err, RenderError::UnresolvedVariable("name".to_string()));
    }

    #[test]
    fn extra_vars_are_ignored() {
        let vars = HashMap::from([
            ("name".to_string(), Value::String("A".to_string())),
            ("unused".to_string(), Value::String("B".to_string())),
        ]);
        let rendered = render(&template("Hi {{name}}"), &vars).unwrap();
        assert_eq!(rendered.body, "Hi A");
    }

    #[test]
    fn escaped_braces_are_literal() {
        let rendered = render(&template("{{{{literal}}"), &HashMap::new()).unwrap();
        assert_eq!(rendered.body, "{{literal}}");
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let vars = HashMap::from([("name".to_string(), Value::String("A".to_string()))]);
        let rendered = render(&template("Hi {{ name }}"), &vars).unwrap();
        assert_eq!(rendered.body, "Hi A");
    }
}
