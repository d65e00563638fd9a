//! Native file selection

use std::path::PathBuf;

use crate::playback::FilePicker;

/// Container extensions offered by default
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "m4v", "ts"];

/// Blocking native open-file dialog
#[derive(Debug, Clone, Default)]
pub struct RfdPicker {
    /// Directory the dialog opens in
    pub start_dir: Option<PathBuf>,
}

impl RfdPicker {
    pub fn new(start_dir: Option<PathBuf>) -> Self {
        Self { start_dir }
    }
}

impl FilePicker for RfdPicker {
    fn pick(&mut self) -> Option<PathBuf> {
        let mut dialog = rfd::FileDialog::new()
            .set_title("Open video")
            .add_filter("Video", VIDEO_EXTENSIONS)
            .add_filter("All Files", &["*"]);
        if let Some(dir) = &self.start_dir {
            dialog = dialog.set_directory(dir);
        }

        let picked = dialog.pick_file();
        if let Some(parent) = picked.as_ref().and_then(|p| p.parent()) {
            self.start_dir = Some(parent.to_path_buf());
        }
        picked
    }
}
