use chrono::{TimeZone, Utc};

use crate::error::IndexError;
use crate::segment::Segment;

/// Maps a captured segment onto an output-relative path (§4.2).
///
/// `path_template` is first expanded as a `strftime` template against the
/// segment's `datetime`, then `{ext}`/`{seq}`/`{timestamp}` placeholders are
/// substituted. `split(depth)` peels the first `depth` path components off
/// into `base_template`, leaving `path_template` as the tail and deriving
/// `index_key_template` from what remains — this is how the hierarchical
/// sub-manifests in §4.6 are rooted.
#[derive(Debug, Clone)]
pub struct Formatter {
    pub path_template: String,
    pub base_template: String,
    pub index_key_template: Option<String>,
    pub ext: String,
    /// Whether `guess_epoch_from_url` heuristics feed `{timestamp}` (§13 open
    /// question 4). Disabling falls back to `{seq}` for `{timestamp}`.
    pub epoch_heuristics: bool,
}

impl Default for Formatter {
    fn default() -> Self {
        Formatter::new("%Y-%m-%d/%H/{timestamp}.{ext}", "ts")
    }
}

impl Formatter {
    pub fn new(path_template: impl Into<String>, ext: impl Into<String>) -> Self {
        Formatter {
            path_template: path_template.into(),
            base_template: String::new(),
            index_key_template: None,
            ext: ext.into(),
            epoch_heuristics: true,
        }
    }

    fn expand(&self, template: &str, segment: &Segment) -> Result<String, IndexError> {
        if template.is_empty() {
            return Ok(String::new());
        }
        let needs_datetime = template.contains('%');
        let datetime = match (needs_datetime, segment.datetime) {
            (true, None) => return Err(IndexError::Malformed("item datetime not set".to_string())),
            (_, dt) => dt,
        };

        let strftime_expanded = match datetime {
            Some(dt) => dt.format(template).to_string(),
            None => template.to_string(),
        };

        let timestamp = if self.epoch_heuristics && segment.epoch > 0 {
            Utc.timestamp_opt(segment.epoch as i64, 0)
                .single()
                .map(|dt| dt.format("%Y-%m-%d_%H-%M-%S").to_string())
                .unwrap_or_else(|| segment.sequence.to_string())
        } else {
            segment.sequence.to_string()
        };

        Ok(strftime_expanded
            .replace("{ext}", &self.ext)
            .replace("{timestamp}", &timestamp)
            .replace("{seq}", &segment.sequence.to_string()))
    }

    /// The segment's output-relative path.
    pub fn path(&self, segment: &Segment) -> Result<String, IndexError> {
        self.expand(&self.path_template, segment)
    }

    /// The directory this segment's manifest tree is rooted at, relative to
    /// the parent formatter's root.
    pub fn base(&self, segment: &Segment) -> Result<String, IndexError> {
        self.expand(&self.base_template, segment)
    }

    /// The index-bucket key for this segment at this formatter's depth.
    pub fn index_key(&self, segment: &Segment) -> Result<Option<String>, IndexError> {
        match &self.index_key_template {
            Some(tpl) => Ok(Some(self.expand(tpl, segment)?)),
            None => Ok(None),
        }
    }

    fn path_components(&self) -> Vec<&str> {
        self.path_template.split('/').filter(|c| !c.is_empty()).collect()
    }

    /// Number of path components remaining below this formatter's root —
    /// the number of distinct sub-manifest depths a caller can `split` into.
    pub fn depth(&self) -> usize {
        self.path_components().len()
    }

    /// Split into a derivative formatter bound to the subtree `depth`
    /// components down from the root (§4.2, §4.6).
    pub fn split(&self, depth: usize) -> Formatter {
        let components = self.path_components();
        let depth = depth.min(components.len());
        let head = &components[..depth];
        let tail = components[depth..].join("/");

        let mut base_components: Vec<&str> = Vec::new();
        if !self.base_template.is_empty() {
            base_components.push(&self.base_template);
        }
        base_components.extend(head.iter().copied());
        let base_template = base_components.join("/");

        let index_key_template = std::path::Path::new(&tail)
            .parent()
            .and_then(|p| p.to_str())
            .and_then(|p| p.split('/').next())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Formatter {
            path_template: tail,
            base_template,
            index_key_template,
            ext: self.ext.clone(),
            epoch_heuristics: self.epoch_heuristics,
        }
    }
}
