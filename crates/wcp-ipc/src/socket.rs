use std::fs;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::error::ClientError;

const SOCKET_PREFIX: &str = "wcp-";
const SOCKET_SUFFIX: &str = ".sock";

/// `$WCP_DIR`, else `$HOME/.wcp`, else `./.wcp`.
pub fn default_session_dir() -> PathBuf {
    if let Ok(custom_dir) = std::env::var("WCP_DIR") {
        if !custom_dir.is_empty() {
            return PathBuf::from(custom_dir);
        }
    }

    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".wcp"))
        .unwrap_or_else(|_| PathBuf::from(".wcp"))
}

/// ASCII letters, digits, `_` and `-`; at least one character.
pub fn is_valid_session_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub name: String,
    pub alive: bool,
}

/// The directory holding one socket file per session.
#[derive(Debug, Clone)]
pub struct SessionDirectory {
    root: PathBuf,
}

impl SessionDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        Self::new(default_session_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}{}{}", SOCKET_PREFIX, name, SOCKET_SUFFIX))
    }

    pub fn endpoint(&self, name: &str) -> Result<Endpoint, ClientError> {
        if !is_valid_session_name(name) {
            return Err(ClientError::InvalidName(name.to_string()));
        }
        Ok(Endpoint {
            name: name.to_string(),
            path: self.socket_path(name),
        })
    }

    /// Session names with a socket file present, sorted.
    ///
    /// A missing directory means no sessions.
    pub fn names(&self) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(name) = file_name
                .strip_prefix(SOCKET_PREFIX)
                .and_then(|rest| rest.strip_suffix(SOCKET_SUFFIX))
            else {
                continue;
            };
            if is_valid_session_name(name) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn list(&self) -> io::Result<Vec<SessionEntry>> {
        Ok(self
            .names()?
            .into_iter()
            .map(|name| {
                let alive = Endpoint {
                    path: self.socket_path(&name),
                    name: name.clone(),
                }
                .is_alive();
                SessionEntry { name, alive }
            })
            .collect())
    }

    pub fn live_names(&self) -> io::Result<Vec<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|entry| entry.alive)
            .map(|entry| entry.name)
            .collect())
    }
}

/// Address of one named session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    path: PathBuf,
}

impl Endpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// True when a daemon accepts connections on the token.
    pub fn is_alive(&self) -> bool {
        match UnixStream::connect(&self.path) {
            Ok(stream) => {
                drop(stream);
                true
            }
            Err(e) => {
                debug!(session = %self.name, error = %e, "Liveness probe failed");
                false
            }
        }
    }

    /// Removes the token. `Ok(false)` when there was nothing to remove.
    pub fn remove(&self) -> io::Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn connect(&self) -> Result<UnixStream, ClientError> {
        if !self.exists() {
            return Err(ClientError::NotFound(self.name.clone()));
        }
        UnixStream::connect(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => ClientError::Stale(self.name.clone()),
            io::ErrorKind::NotFound => ClientError::NotFound(self.name.clone()),
            _ => ClientError::ConnectionFailed {
                name: self.name.clone(),
                source: e,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    #[test]
    fn test_session_name_grammar() {
        assert!(is_valid_session_name("3000"));
        assert!(is_valid_session_name("my_api-2"));
        assert!(!is_valid_session_name(""));
        assert!(!is_valid_session_name("a b"));
        assert!(!is_valid_session_name("../etc"));
        assert!(!is_valid_session_name("café"));
    }

    #[test]
    fn test_socket_path_layout() {
        let dir = SessionDirectory::new("/tmp/wcp-test");
        assert_eq!(
            dir.socket_path("api"),
            PathBuf::from("/tmp/wcp-test/wcp-api.sock")
        );
    }

    #[test]
    fn test_endpoint_rejects_invalid_name() {
        let dir = SessionDirectory::new("/tmp");
        assert!(matches!(
            dir.endpoint("no/slash"),
            Err(ClientError::InvalidName(_))
        ));
    }

    #[test]
    fn test_missing_directory_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let dir = SessionDirectory::new(tmp.path().join("absent"));
        assert!(dir.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_marks_stale_tokens() {
        let tmp = TempDir::new().unwrap();
        let dir = SessionDirectory::new(tmp.path());

        let _listener = UnixListener::bind(dir.socket_path("live")).unwrap();
        {
            let _gone = UnixListener::bind(dir.socket_path("stale")).unwrap();
        }
        fs::write(tmp.path().join("unrelated.txt"), b"x").unwrap();

        let entries = dir.list().unwrap();
        assert_eq!(
            entries,
            vec![
                SessionEntry {
                    name: "live".to_string(),
                    alive: true
                },
                SessionEntry {
                    name: "stale".to_string(),
                    alive: false
                },
            ]
        );
        assert_eq!(dir.live_names().unwrap(), vec!["live".to_string()]);
    }

    #[test]
    fn test_connect_classifies_failures() {
        let tmp = TempDir::new().unwrap();
        let dir = SessionDirectory::new(tmp.path());

        let missing = dir.endpoint("missing").unwrap();
        assert!(matches!(missing.connect(), Err(ClientError::NotFound(_))));

        {
            let _gone = UnixListener::bind(dir.socket_path("stale")).unwrap();
        }
        let stale = dir.endpoint("stale").unwrap();
        assert!(stale.exists());
        assert!(!stale.is_alive());
        assert!(matches!(stale.connect(), Err(ClientError::Stale(_))));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let dir = SessionDirectory::new(tmp.path());
        let endpoint = dir.endpoint("x").unwrap();
        fs::write(endpoint.path(), b"").unwrap();
        assert!(endpoint.remove().unwrap());
        assert!(!endpoint.remove().unwrap());
    }
}
