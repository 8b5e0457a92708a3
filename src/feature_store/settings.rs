//! `StoreSettings` and `QueryConfig` (SPEC_FULL.md §A.3), plus `FileSize` /
//! `FileSizeParser` (SPEC_FULL.md §B.10).

use std::collections::BTreeMap;

use crate::error::{GeodeskError, Result};
use crate::feature_store::zoom_levels::ZoomLevels;

/// Settings parsed from the header's properties blob -- a small `key=value`
/// properties format, one `key=value` pair per line, matching the source's
/// `PropertiesParser`.
#[derive(Debug, Clone, Default)]
pub struct StoreSettings {
    pub page_size: u32,
    pub zoom_levels: ZoomLevels,
    pub rtree_branch_factor: u32,
    pub properties: BTreeMap<String, String>,
}

impl StoreSettings {
    pub fn parse(text: &str) -> Result<Self> {
        let mut properties = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                GeodeskError::corrupt(lineno as u64, format!("malformed properties line: {line:?}"))
            })?;
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }

        let page_size = properties
            .get("page_size")
            .map(|v| FileSize::parse(v).map(|s| s.bytes as u32))
            .transpose()?
            .unwrap_or(4096);
        let rtree_branch_factor = properties
            .get("rtree_branch_factor")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(8);
        let zoom_levels = properties
            .get("zoom_levels")
            .and_then(|v| v.parse::<u32>().ok())
            .map(ZoomLevels::from_u32)
            .unwrap_or_else(|| ZoomLevels::single(12));

        Ok(StoreSettings { page_size, zoom_levels, rtree_branch_factor, properties })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }

    pub fn serialize(&self) -> String {
        let mut out = format!(
            "page_size={}\nrtree_branch_factor={}\nzoom_levels={}\n",
            self.page_size,
            self.rtree_branch_factor,
            self.zoom_levels.as_u32()
        );
        for (k, v) in &self.properties {
            out.push_str(&format!("{k}={v}\n"));
        }
        out
    }
}

/// Caller-constructed, never persisted: thread pool sizing and cancellation
/// policy for one query (spec §4.7, §5).
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub thread_pool_size: usize,
    pub cancel_on_error: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            thread_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            cancel_on_error: true,
        }
    }
}

/// A parsed human-readable size, e.g. `"64K"`, `"4096"`, `"1.5G"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSize {
    pub bytes: u64,
}

impl FileSize {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (number_part, multiplier) = match s.chars().last() {
            Some(c @ ('k' | 'K')) => (&s[..s.len() - 1], 1024u64),
            Some(c @ ('m' | 'M')) => (&s[..s.len() - c.len_utf8()], 1024 * 1024),
            Some(c @ ('g' | 'G')) => (&s[..s.len() - c.len_utf8()], 1024 * 1024 * 1024),
            _ => (s, 1),
        };
        let value: f64 = number_part
            .trim()
            .parse()
            .map_err(|_| GeodeskError::corrupt(0, format!("invalid file size: {s:?}")))?;
        Ok(FileSize { bytes: (value * multiplier as f64) as u64 })
    }

    pub fn format(&self) -> String {
        const UNITS: [(&str, u64); 3] = [("G", 1024 * 1024 * 1024), ("M", 1024 * 1024), ("K", 1024)];
        for (suffix, scale) in UNITS {
            if self.bytes >= scale && self.bytes % scale == 0 {
                return format!("{}{}", self.bytes / scale, suffix);
            }
        }
        self.bytes.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!(FileSize::parse("4096").unwrap().bytes, 4096);
        assert_eq!(FileSize::parse("64K").unwrap().bytes, 64 * 1024);
        assert_eq!(FileSize::parse("1G").unwrap().bytes, 1024 * 1024 * 1024);
    }

    #[test]
    fn format_picks_largest_exact_unit() {
        assert_eq!(FileSize { bytes: 64 * 1024 }.format(), "64K");
        assert_eq!(FileSize { bytes: 4096 }.format(), "4K");
        assert_eq!(FileSize { bytes: 100 }.format(), "100");
    }

    #[test]
    fn parse_settings_reads_known_keys() {
        let text = "page_size=8192\nrtree_branch_factor=16\n# a comment\ncustom=value\n";
        let settings = StoreSettings::parse(text).unwrap();
        assert_eq!(settings.page_size, 8192);
        assert_eq!(settings.rtree_branch_factor, 16);
        assert_eq!(settings.get("custom"), Some("value"));
    }
}
