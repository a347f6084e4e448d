use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub const INPUT_FRAMES_DIR: &str = "input_frames";
pub const OUTPUT_FRAMES_DIR: &str = "output_frames";
pub const SEGMENTS_DIR: &str = "output_ts";

/// The scratch directories under the temp root. At most one portion's frames
/// live here at any time.
#[derive(Debug, Clone)]
pub struct WorkingDirectories {
    root: PathBuf,
    input_frames: PathBuf,
    output_frames: PathBuf,
    segments: PathBuf,
}

impl WorkingDirectories {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            input_frames: root.join(INPUT_FRAMES_DIR),
            output_frames: root.join(OUTPUT_FRAMES_DIR),
            segments: root.join(SEGMENTS_DIR),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_frames(&self) -> &Path {
        &self.input_frames
    }

    pub fn output_frames(&self) -> &Path {
        &self.output_frames
    }

    pub fn segments(&self) -> &Path {
        &self.segments
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.segments.join("concat.txt")
    }

    pub fn audio_path(&self, video_name: &str) -> PathBuf {
        self.root.join(format!("{video_name}.m4a"))
    }

    pub fn clear_frames(&self) -> Result<()> {
        clear_dir(&self.input_frames)?;
        clear_dir(&self.output_frames)
    }

    pub fn clear_segments(&self) -> Result<()> {
        clear_dir(&self.segments)
    }

    pub fn clear_all(&self) -> Result<()> {
        self.clear_frames()?;
        self.clear_segments()
    }

    /// Remove the scratch directories, and the root too if nothing else lives there.
    pub fn remove(&self) -> Result<()> {
        for dir in [&self.input_frames, &self.output_frames, &self.segments] {
            match fs::remove_dir_all(dir) {
                Err(err) if err.kind() != io::ErrorKind::NotFound => {
                    return Err(err)
                        .with_context(|| format!("Failed to remove directory: {}", dir.display()));
                }
                _ => {}
            }
        }
        // Non-empty roots belong to the user.
        let _ = fs::remove_dir(&self.root);
        Ok(())
    }
}

pub fn clear_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => debug!(dir = %path.display(), "Cleared directory"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to clear directory: {}", path.display()));
        }
    }
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Number of entries in `path`; a missing directory counts as empty.
pub fn count_files(path: &Path) -> Result<u64> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to list directory: {}", path.display()));
        }
    };
    let mut count = 0;
    for entry in entries {
        entry.with_context(|| format!("Failed to read entry in {}", path.display()))?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clearing_recreates_empty_directories() {
        let temp = tempdir().unwrap();
        let dirs = WorkingDirectories::new(temp.path().join("work"));
        dirs.clear_all().unwrap();
        fs::write(dirs.input_frames().join("00000001.png"), b"x").unwrap();
        fs::write(dirs.output_frames().join("00000001.png"), b"x").unwrap();
        fs::write(dirs.segments().join("0.ts"), b"x").unwrap();

        dirs.clear_frames().unwrap();
        assert_eq!(count_files(dirs.input_frames()).unwrap(), 0);
        assert_eq!(count_files(dirs.output_frames()).unwrap(), 0);
        assert_eq!(count_files(dirs.segments()).unwrap(), 1);

        dirs.clear_segments().unwrap();
        assert!(dirs.segments().is_dir());
        assert_eq!(count_files(dirs.segments()).unwrap(), 0);
    }

    #[test]
    fn remove_leaves_foreign_files_alone() {
        let temp = tempdir().unwrap();
        let dirs = WorkingDirectories::new(temp.path());
        dirs.clear_all().unwrap();
        fs::write(temp.path().join("notes.txt"), b"keep").unwrap();

        dirs.remove().unwrap();
        assert!(!dirs.input_frames().exists());
        assert!(!dirs.segments().exists());
        assert!(temp.path().join("notes.txt").is_file());

        let owned = WorkingDirectories::new(temp.path().join("scratch"));
        owned.clear_all().unwrap();
        owned.remove().unwrap();
        assert!(!owned.root().exists());
    }

    #[test]
    fn layout_matches_documented_names() {
        let dirs = WorkingDirectories::new("temp");
        assert_eq!(dirs.input_frames(), Path::new("temp/input_frames"));
        assert_eq!(dirs.output_frames(), Path::new("temp/output_frames"));
        assert_eq!(dirs.manifest_path(), PathBuf::from("temp/output_ts/concat.txt"));
        assert_eq!(dirs.audio_path("clip.mp4"), PathBuf::from("temp/clip.mp4.m4a"));
        assert_eq!(count_files(Path::new("temp/definitely-missing")).unwrap(), 0);
    }
}
