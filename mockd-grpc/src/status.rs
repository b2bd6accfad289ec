//! gRPC status-code taxonomy and typed error-detail construction. The
//! nine detail message shapes are hand-written `prost::Message` structs
//! mirroring `google/rpc/error_details.proto`, decoded without any
//! generated code for that package.

use std::collections::HashMap;

use prost::Message;
use tonic::{Code, Status};

use mockd_core::config::{DetailConfig, GrpcErrorConfig};

/// The fixed 17-entry taxonomy, in canonical order.
const CODE_TABLE: &[(&str, Code)] = &[
    ("OK", Code::Ok),
    ("CANCELLED", Code::Cancelled),
    ("UNKNOWN", Code::Unknown),
    ("INVALID_ARGUMENT", Code::InvalidArgument),
    ("DEADLINE_EXCEEDED", Code::DeadlineExceeded),
    ("NOT_FOUND", Code::NotFound),
    ("ALREADY_EXISTS", Code::AlreadyExists),
    ("PERMISSION_DENIED", Code::PermissionDenied),
    ("RESOURCE_EXHAUSTED", Code::ResourceExhausted),
    ("FAILED_PRECONDITION", Code::FailedPrecondition),
    ("ABORTED", Code::Aborted),
    ("OUT_OF_RANGE", Code::OutOfRange),
    ("UNIMPLEMENTED", Code::Unimplemented),
    ("INTERNAL", Code::Internal),
    ("UNAVAILABLE", Code::Unavailable),
    ("DATA_LOSS", Code::DataLoss),
    ("UNAUTHENTICATED", Code::Unauthenticated),
];

/// Resolve a configured status-code name or integer string to a
/// `tonic::Code`. Unknown names fold to `Unknown`.
pub fn code_from_config(s: &str) -> Code {
    let upper = s.trim().to_ascii_uppercase();
    if let Some((_, code)) = CODE_TABLE.iter().find(|(name, _)| *name == upper) {
        return *code;
    }
    if let Ok(n) = s.trim().parse::<i32>() {
        return Code::from_i32(n);
    }
    Code::Unknown
}

/// The canonical uppercase name used for metrics/log `status` labels.
pub fn canonical_upper_name(code: Code) -> &'static str {
    CODE_TABLE
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| *name)
        .unwrap_or("UNKNOWN")
}

#[derive(Message, Clone)]
struct RpcStatus {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: String,
    #[prost(message, repeated, tag = "3")]
    details: Vec<prost_types::Any>,
}

#[derive(Message, Clone)]
struct BadRequestField {
    #[prost(string, tag = "1")]
    field: String,
    #[prost(string, tag = "2")]
    description: String,
}

#[derive(Message, Clone)]
struct BadRequest {
    #[prost(message, repeated, tag = "1")]
    field_violations: Vec<BadRequestField>,
}

#[derive(Message, Clone)]
struct ErrorInfo {
    #[prost(string, tag = "1")]
    reason: String,
    #[prost(string, tag = "2")]
    domain: String,
    #[prost(map = "string, string", tag = "3")]
    metadata: HashMap<String, String>,
}

#[derive(Message, Clone)]
struct RetryInfo {
    #[prost(message, optional, tag = "1")]
    retry_delay: Option<prost_types::Duration>,
}

#[derive(Message, Clone)]
struct DebugInfo {
    #[prost(string, repeated, tag = "1")]
    stack_entries: Vec<String>,
    #[prost(string, tag = "2")]
    detail: String,
}

#[derive(Message, Clone)]
struct QuotaViolation {
    #[prost(string, tag = "1")]
    subject: String,
    #[prost(string, tag = "2")]
    description: String,
}

#[derive(Message, Clone)]
struct QuotaFailure {
    #[prost(message, repeated, tag = "1")]
    violations: Vec<QuotaViolation>,
}

#[derive(Message, Clone)]
struct PreconditionViolation {
    #[prost(string, tag = "1")]
    r#type: String,
    #[prost(string, tag = "2")]
    subject: String,
    #[prost(string, tag = "3")]
    description: String,
}

#[derive(Message, Clone)]
struct PreconditionFailure {
    #[prost(message, repeated, tag = "1")]
    violations: Vec<PreconditionViolation>,
}

#[derive(Message, Clone)]
struct ResourceInfo {
    #[prost(string, tag = "1")]
    resource_type: String,
    #[prost(string, tag = "2")]
    resource_name: String,
    #[prost(string, tag = "3")]
    owner: String,
    #[prost(string, tag = "4")]
    description: String,
}

#[derive(Message, Clone)]
struct HelpLink {
    #[prost(string, tag = "1")]
    description: String,
    #[prost(string, tag = "2")]
    url: String,
}

#[derive(Message, Clone)]
struct Help {
    #[prost(message, repeated, tag = "1")]
    links: Vec<HelpLink>,
}

#[derive(Message, Clone)]
struct LocalizedMessage {
    #[prost(string, tag = "1")]
    locale: String,
    #[prost(string, tag = "2")]
    message: String,
}

fn any_of(type_name: &str, msg: impl Message) -> prost_types::Any {
    prost_types::Any {
        type_url: format!("type.googleapis.com/google.rpc.{type_name}"),
        value: msg.encode_to_vec(),
    }
}

fn duration_any(s: &str) -> Option<prost_types::Duration> {
    let d = mockd_core::config::parse_duration(s).ok()?;
    Some(prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    })
}

fn detail_to_any(detail: &DetailConfig) -> prost_types::Any {
    match detail {
        DetailConfig::BadRequest { field_violations } => any_of(
            "BadRequest",
            BadRequest {
                field_violations: field_violations
                    .iter()
                    .map(|f| BadRequestField {
                        field: f.field.clone(),
                        description: f.description.clone(),
                    })
                    .collect(),
            },
        ),
        DetailConfig::ErrorInfo {
            reason,
            domain,
            metadata,
        } => any_of(
            "ErrorInfo",
            ErrorInfo {
                reason: reason.clone(),
                domain: domain.clone(),
                metadata: metadata.clone(),
            },
        ),
        DetailConfig::RetryInfo { retry_delay } => any_of(
            "RetryInfo",
            RetryInfo {
                retry_delay: duration_any(retry_delay),
            },
        ),
        DetailConfig::DebugInfo {
            stack_entries,
            detail,
        } => any_of(
            "DebugInfo",
            DebugInfo {
                stack_entries: stack_entries.clone(),
                detail: detail.clone(),
            },
        ),
        DetailConfig::QuotaFailure { violations } => any_of(
            "QuotaFailure",
            QuotaFailure {
                violations: violations
                    .iter()
                    .map(|v| QuotaViolation {
                        subject: v.subject.clone(),
                        description: v.description.clone(),
                    })
                    .collect(),
            },
        ),
        DetailConfig::PreconditionFailure { violations } => any_of(
            "PreconditionFailure",
            PreconditionFailure {
                violations: violations
                    .iter()
                    .map(|v| PreconditionViolation {
                        r#type: v.r#type.clone(),
                        subject: v.subject.clone(),
                        description: v.description.clone(),
                    })
                    .collect(),
            },
        ),
        DetailConfig::ResourceInfo {
            resource_type,
            resource_name,
            owner,
            description,
        } => any_of(
            "ResourceInfo",
            ResourceInfo {
                resource_type: resource_type.clone(),
                resource_name: resource_name.clone(),
                owner: owner.clone(),
                description: description.clone(),
            },
        ),
        DetailConfig::Help { links } => any_of(
            "Help",
            Help {
                links: links
                    .iter()
                    .map(|l| HelpLink {
                        description: l.description.clone(),
                        url: l.url.clone(),
                    })
                    .collect(),
            },
        ),
        DetailConfig::LocalizedMessage { locale, message } => any_of(
            "LocalizedMessage",
            LocalizedMessage {
                locale: locale.clone(),
                message: message.clone(),
            },
        ),
    }
}

/// Translate a configured error into a `tonic::Status`, attaching typed
/// details via the standard `grpc-status-details-bin` richer-error-model
/// mechanism.
pub fn build_status(config: &GrpcErrorConfig) -> Status {
    let code = code_from_config(&config.code);
    if config.details.is_empty() {
        return Status::new(code, config.message.clone());
    }
    let details: Vec<prost_types::Any> = config.details.values().map(detail_to_any).collect();
    let rpc_status = RpcStatus {
        code: code as i32,
        message: config.message.clone(),
        details,
    };
    Status::with_details(code, config.message.clone(), rpc_status.encode_to_vec().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::config::FieldViolation;

    #[test]
    fn name_lookup_is_case_insensitive() {
        assert_eq!(code_from_config("not_found"), Code::NotFound);
        assert_eq!(code_from_config("NOT_FOUND"), Code::NotFound);
    }

    #[test]
    fn integer_strings_resolve_to_matching_code() {
        assert_eq!(code_from_config("5"), Code::NotFound);
    }

    #[test]
    fn unknown_names_fold_to_unknown() {
        assert_eq!(code_from_config("NOT_A_REAL_CODE"), Code::Unknown);
    }

    #[test]
    fn canonical_name_round_trips() {
        assert_eq!(canonical_upper_name(Code::NotFound), "NOT_FOUND");
        assert_eq!(canonical_upper_name(Code::Ok), "OK");
    }

    #[test]
    fn build_status_without_details() {
        let cfg = GrpcErrorConfig {
            code: "NOT_FOUND".into(),
            message: "no such user".into(),
            details: HashMap::new(),
        };
        let status = build_status(&cfg);
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such user");
    }

    #[test]
    fn build_status_with_bad_request_detail_sets_details_bin() {
        let mut details = HashMap::new();
        details.insert(
            "bad_request".to_string(),
            DetailConfig::BadRequest {
                field_violations: vec![FieldViolation {
                    field: "email".into(),
                    description: "must be set".into(),
                }],
            },
        );
        let cfg = GrpcErrorConfig {
            code: "INVALID_ARGUMENT".into(),
            message: "bad input".into(),
            details,
        };
        let status = build_status(&cfg);
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(!status.details().is_empty());
    }
}
