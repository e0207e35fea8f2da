//! File — pattern-file declarations (TOML), merging and compilation into a
//! [`ConfigSnapshot`].

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::model::{compile_regex, Pattern, PatternError, PatternGroup};
use super::snapshot::ConfigSnapshot;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PatternFile {
    pub patterns: Vec<GroupDecl>,
    pub date_formats: Vec<String>,
    pub autohash: Option<String>,
    pub geoip: Option<bool>,
    pub maxmind_db_dir: Option<String>,
    pub original_line: Option<bool>,
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GroupDecl {
    pub source: Option<String>,
    pub block_start: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    #[serde(rename = "match")]
    pub patterns: Vec<PatternDecl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PatternDecl {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub regex: String,
    pub fields: Vec<String>,
    pub date_format: Option<String>,
    pub geoip: Option<String>,
    pub input_filter: Option<String>,
    pub input_drop: Option<String>,
}

impl PatternFile {
    pub fn parse(contents: &str, origin: &str) -> Result<Self, PatternError> {
        toml::from_str(contents).map_err(|source| PatternError::Toml {
            origin: origin.to_string(),
            source,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, PatternError> {
        let io_err = |source| PatternError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io_err)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(io_err)?;

        Self::parse(&contents, &path.display().to_string())
    }

    /// Fold `other` into `self`: groups and date formats are appended, scalar
    /// options set in `other` win.
    pub fn merge(&mut self, other: PatternFile) {
        self.patterns.extend(other.patterns);
        self.date_formats.extend(other.date_formats);
        if other.autohash.is_some() {
            self.autohash = other.autohash;
        }
        if other.geoip.is_some() {
            self.geoip = other.geoip;
        }
        if other.maxmind_db_dir.is_some() {
            self.maxmind_db_dir = other.maxmind_db_dir;
        }
        if other.original_line.is_some() {
            self.original_line = other.original_line;
        }
        if other.debug.is_some() {
            self.debug = other.debug;
        }
    }

    pub fn compile(self) -> Result<ConfigSnapshot, PatternError> {
        let groups = self
            .patterns
            .into_iter()
            .enumerate()
            .map(|(i, g)| g.compile(i))
            .collect::<Result<Vec<_>, _>>()?;

        let mut snapshot = ConfigSnapshot::new(groups)
            .with_date_formats(&self.date_formats)
            .with_geoip(
                self.geoip.unwrap_or(false),
                self.maxmind_db_dir.map(PathBuf::from),
            )
            .with_original_line(self.original_line.unwrap_or(false))
            .with_debug(self.debug.unwrap_or(false));

        if let Some(rule) = self.autohash.as_deref() {
            snapshot = snapshot.with_autohash(compile_regex(rule, "autohash")?);
        }
        Ok(snapshot)
    }
}

impl GroupDecl {
    fn compile(self, index: usize) -> Result<PatternGroup, PatternError> {
        let patterns = self
            .patterns
            .into_iter()
            .enumerate()
            .map(|(j, p)| p.compile(index, j))
            .collect::<Result<Vec<_>, _>>()?;

        let mut group = PatternGroup::new(patterns);
        if let Some(source) = self.source.as_deref() {
            group = group.with_source(source)?;
        }
        if let Some(block_start) = self.block_start.as_deref() {
            group = group.with_block_start(block_start)?;
        }
        if let Some(type_name) = self.type_name {
            group = group.with_type(type_name);
        }
        Ok(group)
    }
}

impl PatternDecl {
    fn compile(self, group: usize, index: usize) -> Result<Pattern, PatternError> {
        let context = format!("patterns[{}].match[{}]", group, index);
        let regex_context = |e: PatternError| match e {
            PatternError::InvalidRegex { source, .. } => PatternError::InvalidRegex {
                context: context.clone(),
                source,
            },
            other => other,
        };

        let mut pattern = Pattern::new(&self.regex, &self.fields).map_err(regex_context)?;
        if let Some(type_name) = self.type_name {
            pattern = pattern.with_type(type_name);
        }
        if let Some(format) = self.date_format.as_deref() {
            pattern = pattern.with_date_format(format);
        }
        if let Some(field) = self.geoip {
            pattern = pattern.with_geoip_field(field);
        }
        if let Some(rule) = self.input_filter.as_deref() {
            let regex = compile_regex(rule, &format!("{}.input_filter", context))?;
            pattern = pattern.with_input_filter_regex(regex);
        }
        if let Some(rule) = self.input_drop.as_deref() {
            let regex = compile_regex(rule, &format!("{}.input_drop", context))?;
            pattern = pattern.with_input_drop_regex(regex);
        }
        Ok(pattern)
    }
}

/// Load, merge and compile pattern files in order.
pub fn load_pattern_files<P: AsRef<Path>>(paths: &[P]) -> Result<ConfigSnapshot, PatternError> {
    let mut merged = PatternFile::default();
    for path in paths {
        let path = path.as_ref();
        tracing::info!("Loading patterns from: {}", path.display());
        merged.merge(PatternFile::from_path(path)?);
    }

    let snapshot = merged.compile()?;
    tracing::info!(
        groups = snapshot.groups().len(),
        patterns = snapshot.pattern_count(),
        "Pattern files loaded"
    );
    Ok(snapshot)
}
