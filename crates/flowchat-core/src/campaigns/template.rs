//! Campaign message interpolation
//!
//! Templates use single-brace placeholders: `{name}`, `{phone}` and
//! `{custom_vars.<key>}` against the contact's attributes. Placeholders
//! that resolve to nothing are left blank rather than sent through.

use flowchat_storage::models::Contact;
use regex::Regex;
use serde_json::Value;

/// Render a campaign template against one contact
pub fn render_template(template: &str, contact: &Contact) -> String {
    let mut result = template.to_string();

    result = result.replace("{name}", contact.name.as_deref().unwrap_or(""));
    result = result.replace("{phone}", &contact.phone);
    result = result.replace("{state}", contact.state_code.as_deref().unwrap_or(""));

    if let Some(name) = &contact.name {
        let first = name.split_whitespace().next().unwrap_or("");
        result = result.replace("{first_name}", first);
    } else {
        result = result.replace("{first_name}", "");
    }

    if let Some(vars) = contact.custom_vars.as_object() {
        for (key, value) in vars {
            let placeholder = format!("{{custom_vars.{}}}", key);
            let value_str = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => value.to_string(),
            };
            result = result.replace(&placeholder, &value_str);
        }
    }

    strip_unresolved(&result)
}

/// Blank any placeholder that did not resolve
fn strip_unresolved(content: &str) -> String {
    let re = Regex::new(r"\{[a-zA-Z0-9_.]+\}").expect("static pattern");
    re.replace_all(content, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn contact(name: Option<&str>, vars: serde_json::Value) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            phone: "+5511999990000".to_string(),
            name: name.map(|s| s.to_string()),
            state_code: Some("SP".to_string()),
            tags: serde_json::json!([]),
            custom_vars: vars,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_basic_placeholders() {
        let c = contact(Some("Maria Silva"), serde_json::json!({}));
        assert_eq!(
            render_template("Oi {first_name}, tudo bem?", &c),
            "Oi Maria, tudo bem?"
        );
        assert_eq!(render_template("{name} - {phone}", &c), "Maria Silva - +5511999990000");
    }

    #[test]
    fn test_render_custom_vars() {
        let c = contact(
            Some("Maria"),
            serde_json::json!({"pedido": "1234", "valor": 99}),
        );
        assert_eq!(
            render_template("Pedido {custom_vars.pedido}: R$ {custom_vars.valor}", &c),
            "Pedido 1234: R$ 99"
        );
    }

    #[test]
    fn test_unresolved_placeholders_go_blank() {
        let c = contact(None, serde_json::json!({}));
        assert_eq!(
            render_template("Oi {name}, use {custom_vars.cupom} hoje", &c),
            "Oi , use  hoje"
        );
    }

    #[test]
    fn test_plain_braces_survive_when_not_placeholder_shaped() {
        let c = contact(Some("Ana"), serde_json::json!({}));
        assert_eq!(render_template("set {1, 2} ok {name}", &c), "set {1, 2} ok Ana");
    }
}
