use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-mode file wrapper (§4.6, §9).
///
/// Opens lazily on the first write and auto-closes whenever `dirname` or
/// `filename` changes, recreating parent directories as needed on next open.
/// Mirrors the source's `FileWriter`: directory/filename reassignment is the
/// mechanism the chunker and segments-list writer use to "roll" to a new
/// target file without the caller having to manage file handles directly.
pub struct FileWriter {
    root: PathBuf,
    dirname: PathBuf,
    filename: String,
    handle: Option<File>,
}

impl FileWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileWriter {
            root: root.into(),
            dirname: PathBuf::new(),
            filename: String::new(),
            handle: None,
        }
    }

    pub fn with_path(root: impl Into<PathBuf>, path: impl AsRef<Path>) -> Self {
        let mut writer = FileWriter::new(root);
        writer.set_path(path.as_ref());
        writer
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn dirname(&self) -> &Path {
        &self.dirname
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> PathBuf {
        self.dirname.join(&self.filename)
    }

    pub fn full_path(&self) -> PathBuf {
        self.root.join(self.path())
    }

    /// Close the current handle; the next write reopens at the (possibly
    /// new) path.
    pub fn close(&mut self) {
        self.handle = None;
    }

    pub fn set_dirname(&mut self, dirname: impl Into<PathBuf>) {
        let dirname = dirname.into();
        if dirname != self.dirname {
            self.dirname = dirname;
            self.close();
        }
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        let filename = filename.into();
        if filename != self.filename {
            self.filename = filename;
            self.close();
        }
    }

    pub fn set_path(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        let dirname = path.parent().map(PathBuf::from).unwrap_or_default();
        if filename != self.filename || dirname != self.dirname {
            self.filename = filename;
            self.dirname = dirname;
            self.close();
        }
    }

    fn open(&mut self) -> io::Result<&mut File> {
        if self.handle.is_none() {
            let dir = self.root.join(&self.dirname);
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(&dir)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(&self.filename))?;
            self.handle = Some(file);
        }
        Ok(self.handle.as_mut().expect("just opened"))
    }

    /// Byte offset the next write will start at.
    pub fn tell(&mut self) -> io::Result<u64> {
        let file = self.open()?;
        file.stream_position()
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let file = self.open()?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_lazily_and_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileWriter::with_path(dir.path(), "2023-01-01/segments.yaml");
        assert!(!writer.is_open());
        writer.write_line("- hello").unwrap();
        assert!(writer.is_open());
        let contents = fs::read_to_string(dir.path().join("2023-01-01/segments.yaml")).unwrap();
        assert_eq!(contents, "- hello\n");
    }

    #[test]
    fn closes_on_dirname_change_and_writes_to_new_location() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileWriter::with_path(dir.path(), "a/segments.yaml");
        writer.write_line("- one").unwrap();
        writer.set_dirname("b");
        assert!(!writer.is_open());
        writer.write_line("- two").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a/segments.yaml")).unwrap(), "- one\n");
        assert_eq!(fs::read_to_string(dir.path().join("b/segments.yaml")).unwrap(), "- two\n");
    }

    #[test]
    fn tell_reports_position_before_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileWriter::with_path(dir.path(), "segments.yaml");
        assert_eq!(writer.tell().unwrap(), 0);
        writer.write_line("- abc").unwrap();
        assert_eq!(writer.tell().unwrap(), 7);
    }
}
