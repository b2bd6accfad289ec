//! Envelope parsing, version detection, SOAPAction extraction, and
//! response/fault wrapping.

use http::HeaderMap;

use crate::xml::{escape_xml_text, parse_document, Element};

const NS_SOAP11: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const NS_SOAP12: &str = "http://www.w3.org/2003/05/soap-envelope";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    V11,
    V12,
}

impl SoapVersion {
    pub fn content_type(self) -> &'static str {
        match self {
            SoapVersion::V11 => "text/xml; charset=utf-8",
            SoapVersion::V12 => "application/soap+xml; charset=utf-8",
        }
    }

    fn namespace(self) -> &'static str {
        match self {
            SoapVersion::V11 => NS_SOAP11,
            SoapVersion::V12 => NS_SOAP12,
        }
    }
}

pub struct ParsedRequest {
    pub root: Element,
    pub version: SoapVersion,
}

impl ParsedRequest {
    pub fn body(&self) -> Option<&Element> {
        self.root.find_descendant("Body")
    }

    pub fn first_body_child(&self) -> Option<&Element> {
        self.body().and_then(|b| b.first_child_element())
    }
}

/// Parse a request body into a DOM, detect the SOAP version, and locate
/// the envelope root. The root must be named `Envelope` (namespace
/// prefix tolerated).
pub fn parse(body: &str) -> Result<ParsedRequest, String> {
    let root = parse_document(body)?;
    if root.local_name != "Envelope" {
        return Err(format!("root element must be Envelope, found {}", root.local_name));
    }
    let version = detect_version(&root);
    Ok(ParsedRequest { root, version })
}

/// SOAP 1.2 is signalled by the `2003/05/soap-envelope` namespace
/// appearing on any attribute of the root (most commonly an `xmlns`
/// declaration); anything else defaults to SOAP 1.1.
fn detect_version(root: &Element) -> SoapVersion {
    if root.attrs.iter().any(|(_, v)| v == NS_SOAP12) {
        SoapVersion::V12
    } else {
        SoapVersion::V11
    }
}

/// SOAP 1.1: the `SOAPAction` header, quotes stripped. SOAP 1.2: the
/// `action=` parameter of `Content-Type`.
pub fn extract_soap_action(version: SoapVersion, headers: &HeaderMap) -> Option<String> {
    match version {
        SoapVersion::V11 => headers
            .get("SOAPAction")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().trim_matches('"').to_string()),
        SoapVersion::V12 => headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|ct| {
                ct.split(';').find_map(|part| {
                    part.trim()
                        .strip_prefix("action=")
                        .map(|v| v.trim_matches('"').to_string())
                })
            }),
    }
}

/// Wrap a rendered body fragment in a full envelope for the given
/// version, with a UTF-8 prolog.
pub fn wrap_response(version: SoapVersion, body_inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<soap:Envelope xmlns:soap=\"{ns}\"><soap:Body>{body_inner}</soap:Body></soap:Envelope>",
        ns = version.namespace(),
    )
}

/// `soap:Client -> soap:Sender`, `soap:Server -> soap:Receiver` when
/// producing a SOAP 1.2 fault from a 1.1-style configured code.
fn translate_fault_code(version: SoapVersion, code: &str) -> String {
    if version != SoapVersion::V12 {
        return code.to_string();
    }
    match code {
        "soap:Client" | "Client" => "soap:Sender".to_string(),
        "soap:Server" | "Server" => "soap:Receiver".to_string(),
        other => other.to_string(),
    }
}

/// Build a full fault envelope. SOAP 1.1 faults carry
/// `faultcode`/`faultstring`/`detail`; SOAP 1.2 carry
/// `Code/Value`/`Reason/Text`/`Detail`.
pub fn wrap_fault(version: SoapVersion, code: &str, message: &str, detail: Option<&str>) -> String {
    let code = translate_fault_code(version, code);
    let message = escape_xml_text(message);
    let body = match version {
        SoapVersion::V11 => {
            let detail_xml = detail.map(|d| format!("<detail>{d}</detail>")).unwrap_or_default();
            format!("<soap:Fault><faultcode>{code}</faultcode><faultstring>{message}</faultstring>{detail_xml}</soap:Fault>")
        }
        SoapVersion::V12 => {
            let detail_xml = detail.map(|d| format!("<Detail>{d}</Detail>")).unwrap_or_default();
            format!(
                "<soap:Fault><Code><Value>{code}</Value></Code><Reason><Text xml:lang=\"en\">{message}</Text></Reason>{detail_xml}</soap:Fault>"
            )
        }
    };
    wrap_response(version, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_soap_12_by_namespace() {
        let req = parse(r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body/></soap:Envelope>"#).unwrap();
        assert_eq!(req.version, SoapVersion::V12);
    }

    #[test]
    fn defaults_to_soap_11() {
        let req = parse(r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body/></soap:Envelope>"#).unwrap();
        assert_eq!(req.version, SoapVersion::V11);
    }

    #[test]
    fn rejects_non_envelope_root() {
        assert!(parse("<NotAnEnvelope/>").is_err());
    }

    #[test]
    fn soap_action_from_header_strips_quotes() {
        let mut headers = HeaderMap::new();
        headers.insert("SOAPAction", "\"urn:GetUser\"".parse().unwrap());
        assert_eq!(
            extract_soap_action(SoapVersion::V11, &headers),
            Some("urn:GetUser".to_string())
        );
    }

    #[test]
    fn soap_action_from_12_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            "application/soap+xml; charset=utf-8; action=\"urn:GetUser\"".parse().unwrap(),
        );
        assert_eq!(
            extract_soap_action(SoapVersion::V12, &headers),
            Some("urn:GetUser".to_string())
        );
    }

    #[test]
    fn fault_translates_client_to_sender_for_12() {
        let xml = wrap_fault(SoapVersion::V12, "soap:Client", "Division by zero", None);
        assert!(xml.contains("<Value>soap:Sender</Value>"));
        assert!(xml.contains("Division by zero"));
    }

    #[test]
    fn fault_11_uses_faultcode_shape() {
        let xml = wrap_fault(SoapVersion::V11, "soap:Client", "bad request", None);
        assert!(xml.contains("<faultcode>soap:Client</faultcode>"));
        assert!(xml.contains("<faultstring>bad request</faultstring>"));
    }
}
