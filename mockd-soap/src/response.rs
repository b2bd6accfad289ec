//! Template rendering (`{{xpath:...}}` substitution) and the stateful
//! executor result -> XML mapping.

use mockd_core::collaborators::StatefulResult;

use crate::operation::singularize;
use crate::xml::{escape_xml_text, extract_xpath, Element};

/// Replace every `{{xpath:EXPR}}` token with the trimmed text that
/// expression extracts from the request DOM (empty string on no hit),
/// leaving any other `{{...}}` token untouched for the external template
/// engine to process afterward.
pub fn substitute_xpath_tokens(template: &str, request_doc: &Element) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let Some(start) = rest.find("{{xpath:") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_marker = &rest[start + "{{xpath:".len()..];
        let Some(end) = after_marker.find("}}") else {
            // Unterminated token: emit the rest verbatim and stop.
            out.push_str(&rest[start..]);
            break;
        };
        let expr = &after_marker[..end];
        out.push_str(&extract_xpath(request_doc, expr));
        rest = &after_marker[end + "}}".len()..];
    }
    out
}

fn json_scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => escape_xml_text(s),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Object(_) => json_object_fields(value),
        serde_json::Value::Array(items) => items.iter().map(json_scalar_text).collect::<Vec<_>>().join(""),
    }
}

/// Render a JSON object's keys as sibling elements (`{"id":"7"} ->
/// "<id>7</id>"`); used for both the single-item and list-item shapes.
fn json_object_fields(value: &serde_json::Value) -> String {
    let serde_json::Value::Object(map) = value else {
        return json_scalar_text(value);
    };
    let mut out = String::new();
    for (key, v) in map {
        out.push_str(&format!("<{key}>{}</{key}>", json_scalar_text(v)));
    }
    out
}

/// Map a `StatefulExecutor` result to the response body fragment the
/// spec describes. Faults are returned as
/// `Err` so the dispatcher can route them through the fault builder
/// rather than the success envelope.
pub fn stateful_result_to_xml(
    operation_name: &str,
    resource: &str,
    result: StatefulResult,
) -> Result<String, (String, String)> {
    match result {
        StatefulResult::Item(item) => {
            let tag = format!("{}Response", singularize(resource));
            Ok(format!("<{tag}>{}</{tag}>", json_object_fields(&item)))
        }
        StatefulResult::Items {
            items,
            total,
            count,
            offset,
            limit,
        } => {
            let singular = singularize(resource);
            let tag = format!("{resource}Response");
            let mut body = String::new();
            for item in &items {
                body.push_str(&format!("<{singular}>{}</{singular}>", json_object_fields(item)));
            }
            body.push_str(&format!(
                "<meta><total>{total}</total><count>{count}</count><offset>{offset}</offset><limit>{limit}</limit></meta>"
            ));
            Ok(format!("<{tag}>{body}</{tag}>"))
        }
        StatefulResult::Success => {
            let tag = format!("{operation_name}Response");
            Ok(format!("<{tag}><success>true</success></{tag}>"))
        }
        StatefulResult::Fault { code, message } => Err((code, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_document;

    #[test]
    fn substitutes_xpath_tokens_and_leaves_others() {
        let doc = parse_document(r#"<Envelope><Body><GetUser><id>user-789</id></GetUser></Body></Envelope>"#).unwrap();
        let rendered = substitute_xpath_tokens("<r>{{xpath://GetUser/id}}</r> hi {{name}}", &doc);
        assert_eq!(rendered, "<r>user-789</r> hi {{name}}");
    }

    #[test]
    fn single_item_uses_singularized_resource() {
        let item = serde_json::json!({"id": "7", "name": "Ada"});
        let xml = stateful_result_to_xml("GetUser", "users", StatefulResult::Item(item)).unwrap();
        assert_eq!(xml, "<userResponse><id>7</id><name>Ada</name></userResponse>");
    }

    #[test]
    fn list_wraps_items_and_meta() {
        let result = StatefulResult::Items {
            items: vec![serde_json::json!({"id": "1"})],
            total: 1,
            count: 1,
            offset: 0,
            limit: 10,
        };
        let xml = stateful_result_to_xml("ListUsers", "users", result).unwrap();
        assert!(xml.starts_with("<usersResponse>"));
        assert!(xml.contains("<user><id>1</id></user>"));
        assert!(xml.contains("<total>1</total>"));
    }

    #[test]
    fn success_without_payload_uses_operation_name() {
        let xml = stateful_result_to_xml("DeleteUser", "users", StatefulResult::Success).unwrap();
        assert_eq!(xml, "<DeleteUserResponse><success>true</success></DeleteUserResponse>");
    }

    #[test]
    fn fault_propagates_as_error() {
        let result = StatefulResult::Fault {
            code: "soap:Client".into(),
            message: "not found".into(),
        };
        assert!(stateful_result_to_xml("GetUser", "users", result).is_err());
    }
}
