//! Positioned reads from the backing container file.

use std::io;
#[cfg(any(unix, windows))]
use std::{
    fs::File,
    path::{Path, PathBuf},
};

use bytes::Bytes;
#[cfg(any(unix, windows))]
use url::Url;

/// Random-access bytes that chunk locations point into.
///
/// Reads must not depend on shared cursor state: concurrent callers each
/// get exactly the range they asked for.
pub trait ByteSource: Send + Sync {
    /// Read exactly `size` bytes starting at `offset`.
    ///
    /// A range running past the end of the source is an
    /// [`io::ErrorKind::UnexpectedEof`] error, never a short result.
    fn read_range(&self, offset: u64, size: u64) -> io::Result<Bytes>;
}

/// A local file opened read-only.
#[cfg(any(unix, windows))]
#[derive(Debug)]
pub struct FileSource {
    uri: String,
    file: File,
}

#[cfg(any(unix, windows))]
impl FileSource {
    /// Open a plain path or a `file://` URL.
    pub fn open(uri: &str) -> crate::Result<Self> {
        let path = local_path(uri)?;
        let file = File::open(&path)?;
        log::debug!("opened {} as backing file", path.display());
        Ok(Self {
            uri: uri.to_string(),
            file,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            uri: path.to_string_lossy().into_owned(),
            file: File::open(path)?,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[cfg(any(unix, windows))]
fn local_path(uri: &str) -> crate::Result<PathBuf> {
    match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|()| crate::Error::general(format!("{uri} is not a local file URL"))),
        // single letters are windows drive prefixes
        Ok(url) if url.scheme().len() > 1 => Err(crate::Error::general(format!(
            "unsupported URL scheme {} for backing file {uri}",
            url.scheme()
        ))),
        _ => Ok(PathBuf::from(uri)),
    }
}

fn buffer_len(size: u64) -> io::Result<usize> {
    usize::try_from(size).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot read {size} bytes into memory"),
        )
    })
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(any(unix, windows))]
impl ByteSource for FileSource {
    fn read_range(&self, offset: u64, size: u64) -> io::Result<Bytes> {
        let mut buf = vec![0; buffer_len(size)?];
        read_exact_at(&self.file, &mut buf, offset)?;
        log::trace!("read {size} bytes at {offset} from {}", self.uri);
        Ok(Bytes::from(buf))
    }
}

impl ByteSource for Bytes {
    fn read_range(&self, offset: u64, size: u64) -> io::Result<Bytes> {
        let start = buffer_len(offset)?;
        let end = start
            .checked_add(buffer_len(size)?)
            .filter(|&end| end <= self.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "range {offset}+{size} is out of bounds for {} bytes",
                        self.len()
                    ),
                )
            })?;
        Ok(self.slice(start..end))
    }
}
