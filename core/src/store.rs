use crate::session::Session;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RECORD_NAME: &str = "auth-storage.json";
const COOKIE_JAR_NAME: &str = "cookies.json";

/// The single persisted session record, restored on startup and removed on logout.
#[derive(Clone, Debug)]
pub struct SessionFile {
    root: PathBuf,
}

impl SessionFile {
    pub fn new(root: PathBuf) -> Self {
        fs::create_dir_all(&root).ok();
        Self { root }
    }

    pub fn in_memory() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("lexis-{}", Uuid::new_v4()));
        Self::new(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(RECORD_NAME)
    }

    /// Where the transport keeps its cookie jar, next to the session record.
    pub fn cookie_path(&self) -> PathBuf {
        self.root.join(COOKIE_JAR_NAME)
    }

    pub fn load(&self) -> Result<Option<Session>> {
        let path = self.path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let session: Session = serde_json::from_str(&contents)
            .with_context(|| format!("invalid session record {}", path.display()))?;
        if !session.is_consistent() {
            tracing::warn!(path = %path.display(), "discarding inconsistent session record");
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        fs::create_dir_all(&self.root).ok();
        let serialized = serde_json::to_vec_pretty(session)?;
        let tmp = self.root.join(format!("{RECORD_NAME}.tmp"));
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, self.path())?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(self.path()) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}
