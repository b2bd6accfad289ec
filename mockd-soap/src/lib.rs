//! The SOAP operation handler: envelope parsing with
//! version auto-detection, operation dispatch by SOAPAction or body
//! element, XPath-conditioned matching, template-driven responses, and
//! typed fault generation.

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod operation;
pub mod registry;
pub mod response;
pub mod server;
pub mod xml;
