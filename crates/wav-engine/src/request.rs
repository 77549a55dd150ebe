use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use crate::error::Result;

/// Where a request's waveform bytes come from.
pub enum Source {
    File(PathBuf),
    Reader(Box<dyn Read + Send>),
}

/// A single "play this waveform" request.
pub struct PlaybackRequest {
    label: String,
    source: Source,
}

impl PlaybackRequest {
    /// Play the waveform file at `path`. The file is opened when the request runs.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            label: path.display().to_string(),
            source: Source::File(path),
        }
    }

    /// Play an already-open byte stream, identified by `label` in logs and status.
    pub fn reader(label: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            label: label.into(),
            source: Source::Reader(Box::new(reader)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Open the underlying byte stream.
    pub(crate) fn open(self) -> Result<Box<dyn Read + Send>> {
        match self.source {
            Source::File(path) => {
                let file = File::open(&path)?;
                Ok(Box::new(BufReader::new(file)))
            }
            Source::Reader(reader) => Ok(reader),
        }
    }
}

impl fmt::Debug for PlaybackRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            Source::File(_) => "file",
            Source::Reader(_) => "reader",
        };
        f.debug_struct("PlaybackRequest")
            .field("label", &self.label)
            .field("source", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlaybackError;
    use std::io::Cursor;

    #[test]
    fn missing_file_is_source_unreadable() {
        let req = PlaybackRequest::file("/definitely/not/here.wav");
        let err = req.open().err().unwrap();
        assert!(matches!(err, PlaybackError::SourceUnreadable(_)));
    }

    #[test]
    fn reader_request_keeps_label() {
        let req = PlaybackRequest::reader("memory", Cursor::new(vec![1u8, 2, 3]));
        assert_eq!(req.label(), "memory");
        let mut out = Vec::new();
        req.open().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
