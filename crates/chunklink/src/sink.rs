use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chunklink_frame::{AssembledFrame, FrameConsumer};
use tracing::debug;

/// Writes every completed frame over `<dir>/latest.<ext>`.
///
/// The file is replaced by rename, so a reader never sees a partly written
/// frame. With `keep_all`, each frame is also kept as `frame-<id>.<ext>`.
#[derive(Debug)]
pub struct LatestFileSink {
    dir: PathBuf,
    extension: String,
    keep_all: bool,
    written: u64,
    last_path: Option<PathBuf>,
}

impl LatestFileSink {
    pub fn create(dir: impl Into<PathBuf>, extension: &str, keep_all: bool) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            extension: extension.trim_start_matches('.').to_string(),
            keep_all,
            written: 0,
            last_path: None,
        })
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir.join(self.file_name("latest"))
    }

    /// Where the most recent frame went; `None` if writing it failed.
    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn file_name(&self, stem: &str) -> String {
        if self.extension.is_empty() {
            stem.to_string()
        } else {
            format!("{stem}.{}", self.extension)
        }
    }
}

impl FrameConsumer for LatestFileSink {
    fn consume(&mut self, frame: &AssembledFrame) -> io::Result<()> {
        self.last_path = None;
        let latest = self.latest_path();
        let staging = self.dir.join(format!(".{}.tmp", self.file_name("latest")));
        fs::write(&staging, &frame.payload)?;
        fs::rename(&staging, &latest)?;

        if self.keep_all {
            let kept = self
                .dir
                .join(self.file_name(&format!("frame-{:010}", frame.frame_id)));
            fs::write(&kept, &frame.payload)?;
        }

        self.written += 1;
        debug!(
            frame_id = frame.frame_id,
            bytes = frame.payload.len(),
            path = %latest.display(),
            "frame written"
        );
        self.last_path = Some(latest);
        Ok(())
    }
}
