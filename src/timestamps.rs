use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

pub trait FileStamps {
    fn created(&self, path: &Path) -> io::Result<SystemTime>;
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;
    /// Stamps the birth time of `path`. Returns `ErrorKind::Unsupported` on
    /// platforms where birth time is kernel-maintained and read-only.
    fn set_created(&self, path: &Path, at: SystemTime) -> io::Result<()>;
}

/// Reads and writes timestamps straight from file metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskStamps;

impl FileStamps for DiskStamps {
    fn created(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.created()
    }

    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }

    #[cfg(target_os = "macos")]
    fn set_created(&self, path: &Path, at: SystemTime) -> io::Result<()> {
        use std::os::macos::fs::FileTimesExt;
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_times(fs::FileTimes::new().set_created(at))
    }

    #[cfg(windows)]
    fn set_created(&self, path: &Path, at: SystemTime) -> io::Result<()> {
        use std::os::windows::fs::FileTimesExt;
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_times(fs::FileTimes::new().set_created(at))
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    fn set_created(&self, _path: &Path, _at: SystemTime) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "birth time cannot be set on this platform",
        ))
    }
}
