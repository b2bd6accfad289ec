//! A compiled SOAP operation plus the
//! English singularization rule the stateful response mapper uses to
//! name a single-item response element.

use mockd_core::config::SoapOperationConfig;

pub struct CompiledOperation {
    pub config: SoapOperationConfig,
}

impl CompiledOperation {
    pub fn compile(config: SoapOperationConfig) -> Self {
        Self { config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// `buses -> bus`, `categories -> category`, `items -> item`, `address
/// -> address` (double-s is left alone).
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ses") {
        return format!("{stem}s");
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if word.ends_with("ss") {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix('s') {
        return stem.to_string();
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singularize_ses_suffix() {
        assert_eq!(singularize("buses"), "bus");
    }

    #[test]
    fn singularize_ies_suffix() {
        assert_eq!(singularize("categories"), "category");
    }

    #[test]
    fn singularize_plain_s_suffix() {
        assert_eq!(singularize("items"), "item");
    }

    #[test]
    fn singularize_leaves_double_s_alone() {
        assert_eq!(singularize("address"), "address");
    }
}
