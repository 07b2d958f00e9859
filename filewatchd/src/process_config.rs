//! Process-level configuration (`filewatchd.toml`), read once at startup and distinct from the
//! runtime-tunable `Configurations` table: this file holds settings the process needs before it
//! can even open the store (the database path, the local-fs blob override, the log format).
//!
//! Parsed with `toml_edit` rather than `serde` so that `--config-override key=value` can patch
//! individual keys into the document before validation, the same two-step
//! parse-then-override-then-validate shape `PageServerConf::parse_and_validate` uses for
//! `pageserver.toml`.

use std::str::FromStr;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::logging::LogFormat;

/// Deliberately omits `database_url`: its default is `<workdir>/filewatchd.db`, which can only be
/// computed once `workdir` is known, so `parse_and_validate`'s `unwrap_or_else` path supplies it
/// rather than this document hardcoding a bare relative path.
pub const DEFAULT_CONFIG_FILE: &str = r#"
log_format = 'text'
"#;

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub database_url: String,
    pub local_fs_root: Option<Utf8PathBuf>,
    pub log_format: LogFormat,
}

impl ProcessConfig {
    /// Resolves a fully-validated config against `workdir`, applying defaults for any key the
    /// document leaves unset.
    pub fn parse_and_validate(toml: &toml_edit::Document, workdir: &Utf8Path) -> anyhow::Result<Self> {
        let database_url = toml
            .get("database_url")
            .and_then(|item| item.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| workdir.join("filewatchd.db").to_string());

        let local_fs_root = toml
            .get("local_fs_root")
            .and_then(|item| item.as_str())
            .map(Utf8PathBuf::from);

        let log_format = match toml.get("log_format").and_then(|item| item.as_str()) {
            Some(s) => LogFormat::from_str(s).context("parsing log_format in filewatchd.toml")?,
            None => LogFormat::default(),
        };

        Ok(Self {
            database_url,
            local_fs_root,
            log_format,
        })
    }

    /// Reads `cfg_file_path` if present, falling back to the built-in default document, then
    /// applies each `--config-override key=value` line (parsed as its own single-line TOML
    /// document, same as the teacher's `-c` flag) before validating.
    pub fn load(
        cfg_file_path: &Utf8Path,
        overrides: &[String],
        workdir: &Utf8Path,
    ) -> anyhow::Result<Self> {
        let mut doc = if cfg_file_path.is_file() {
            let contents = std::fs::read_to_string(cfg_file_path)
                .with_context(|| format!("reading config file {cfg_file_path}"))?;
            contents
                .parse::<toml_edit::Document>()
                .with_context(|| format!("parsing config file {cfg_file_path} as TOML"))?
        } else {
            DEFAULT_CONFIG_FILE
                .parse::<toml_edit::Document>()
                .context("parsing built-in default config")?
        };

        for line in overrides {
            let patch = toml_edit::Document::from_str(line)
                .with_context(|| format!("config override {line:?} is not valid TOML"))?;
            for (key, item) in patch.iter() {
                doc.insert(key, item.clone());
            }
        }

        Self::parse_and_validate(&doc, workdir)
    }
}
