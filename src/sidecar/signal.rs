//! Marker and content files in the shared signal directory.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ProtocolError;

/// Written by the executor once a request is ready.
pub const RUN_REQUESTED: &str = "run-requested";
/// Written by the evaluator once the result is ready.
pub const RUN_COMPLETE: &str = "run-complete";
/// Written by the executor when no more requests will come.
pub const AGENT_DONE: &str = "agent-done";

pub const REQUEST_FILE: &str = "request.json";
pub const RESULT_FILE: &str = "result.json";

#[derive(Debug, Clone)]
pub struct SignalDir {
    root: PathBuf,
}

impl SignalDir {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, ProtocolError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| ProtocolError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn io_err(&self, name: &str) -> impl FnOnce(io::Error) -> ProtocolError {
        let path = self.path(name);
        move |source| ProtocolError::Io { path, source }
    }

    /// Atomically creates `marker`. `false` if it already existed.
    pub fn touch(&self, marker: &str) -> Result<bool, ProtocolError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path(marker))
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.io_err(marker)(e)),
        }
    }

    pub fn exists(&self, marker: &str) -> bool {
        self.path(marker).exists()
    }

    /// Deletes `marker` and reports whether it was present. Only one reader
    /// can win the removal.
    pub fn consume(&self, marker: &str) -> Result<bool, ProtocolError> {
        match fs::remove_file(self.path(marker)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_err(marker)(e)),
        }
    }

    /// Write-then-rename so readers never see a partial file.
    pub fn write_content(&self, name: &str, content: &str) -> Result<(), ProtocolError> {
        let tmp = self.path(&format!(".{name}.tmp"));
        fs::write(&tmp, content).map_err(self.io_err(name))?;
        fs::rename(&tmp, self.path(name)).map_err(self.io_err(name))
    }

    pub fn read_content(&self, name: &str) -> Result<Option<String>, ProtocolError> {
        match fs::read_to_string(self.path(name)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(name)(e)),
        }
    }

    pub fn remove_content(&self, name: &str) -> Result<(), ProtocolError> {
        self.consume(name).map(|_| ())
    }

    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), ProtocolError> {
        let raw = serde_json::to_string(value).map_err(|source| ProtocolError::Malformed {
            path: self.path(name),
            source,
        })?;
        self.write_content(name, &raw)
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ProtocolError> {
        let Some(raw) = self.read_content(name)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| ProtocolError::Malformed {
                path: self.path(name),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_created_once_and_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let sig = SignalDir::create(dir.path().join("sig")).unwrap();

        assert!(sig.touch(RUN_REQUESTED).unwrap());
        assert!(!sig.touch(RUN_REQUESTED).unwrap());
        assert!(sig.exists(RUN_REQUESTED));

        assert!(sig.consume(RUN_REQUESTED).unwrap());
        assert!(!sig.consume(RUN_REQUESTED).unwrap());
        assert!(!sig.exists(RUN_REQUESTED));
    }

    #[test]
    fn content_round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let sig = SignalDir::create(dir.path()).unwrap();

        assert_eq!(sig.read_content(RESULT_FILE).unwrap(), None);
        sig.write_content(RESULT_FILE, "first").unwrap();
        sig.write_content(RESULT_FILE, "second").unwrap();
        assert_eq!(sig.read_content(RESULT_FILE).unwrap().as_deref(), Some("second"));

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![RESULT_FILE.to_string()]);
    }

    #[test]
    fn malformed_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let sig = SignalDir::create(dir.path()).unwrap();
        sig.write_content(REQUEST_FILE, "{not json").unwrap();

        let res: Result<Option<serde_json::Value>, _> = sig.read_json(REQUEST_FILE);
        assert!(matches!(res, Err(ProtocolError::Malformed { .. })));
    }
}
