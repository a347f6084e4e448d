use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Ordered list of encoded segments handed to the concat demuxer.
#[derive(Debug, Clone, Default)]
pub struct ConcatManifest {
    entries: Vec<(u32, PathBuf)>,
}

impl ConcatManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the segment for `portion`. Portions must arrive in increasing order.
    pub fn push(&mut self, portion: u32, segment: impl Into<PathBuf>) -> Result<()> {
        if let Some((last, _)) = self.entries.last()
            && *last >= portion
        {
            bail!("Segment for portion {portion} recorded after portion {last}");
        }
        self.entries.push((portion, segment.into()));
        Ok(())
    }

    /// Render the manifest with absolute paths. Every segment must exist.
    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        for (portion, segment) in &self.entries {
            let absolute = segment.canonicalize().with_context(|| {
                format!(
                    "Segment for portion {portion} is missing: {}",
                    segment.display()
                )
            })?;
            out.push_str("file '");
            out.push_str(&escape_concat_path(&absolute));
            out.push_str("'\n");
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if self.entries.is_empty() {
            bail!("No segments were encoded; nothing to concatenate");
        }
        let content = self.render()?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write concat manifest: {}", path.display()))
    }
}

// The concat demuxer reads single-quoted strings; a quote closes, escapes and reopens.
fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}
