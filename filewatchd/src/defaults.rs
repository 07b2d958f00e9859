//! Bootstrap defaults, embedded at compile time. Realizes the "appsettings seeding" step the
//! original system treats as an external mechanism with a defined contract: an ordered set of
//! `(key, value, category, description)` tuples, upserted into `Configurations` at startup for
//! any key that is not already present.

use serde::Deserialize;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultConfig {
    pub key: String,
    pub value: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct DefaultsDocument {
    #[serde(rename = "default")]
    defaults: Vec<DefaultConfig>,
}

/// Parses the embedded defaults document. Panics on malformed TOML: this is compiled-in data,
/// not operator input, so a parse failure means the crate itself is broken.
pub fn load() -> Vec<DefaultConfig> {
    let doc: DefaultsDocument =
        toml::from_str(DEFAULTS_TOML).expect("embedded defaults.toml is valid");
    doc.defaults
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse_and_cover_recognized_keys() {
        let defaults = load();
        let keys: Vec<&str> = defaults.iter().map(|d| d.key.as_str()).collect();
        assert!(keys.contains(&crate::config_service::keys::MAX_RETRIES));
        assert!(keys.contains(&crate::config_service::keys::AZURE_DEFAULT_CONTAINER));
    }
}
