//! Per-host remote filesystem session.
//!
//! `HostSession` owns the connection of one host together with the cache of
//! directories known to exist on it. The cache lives and dies with the
//! session and is cleared around every destructive operation.

use crate::environment::Environment;
use crate::fs::{enumerate, metadata::format_epoch};
use crate::orchestrator::{self, EnvEntry};
use crate::transfer::PushReport;
use crate::{Result, SyncError};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mode of every directory created remotely
pub const DIR_MODE: u32 = 0o755;

/// Mode of every file uploaded
pub const FILE_MODE: u32 = 0o644;

/// A directory entry returned by [`RemoteFs::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,

    /// Modification time, seconds since the epoch
    pub mtime: Option<u64>,
}

/// Remote filesystem primitives. A missing path is reported as
/// `io::ErrorKind::NotFound`.
pub trait RemoteFs: Send {
    /// Whether `path` is a directory.
    fn stat_is_dir(&self, path: &Path) -> io::Result<bool>;

    /// Children of a directory, without `.` and `..`.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<RemoteEntry>>;

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn rmdir(&self, path: &Path) -> io::Result<()>;

    fn unlink(&self, path: &Path) -> io::Result<()>;

    /// Copy a local file to `remote`, returning the number of bytes written.
    fn put(&self, local: &Path, remote: &Path) -> io::Result<u64>;
}

/// Directories known to exist on one host.
#[derive(Debug, Default)]
pub struct DirectoryCache {
    known: HashSet<PathBuf>,
}

impl DirectoryCache {
    pub fn contains(&self, path: &Path) -> bool {
        self.known.contains(path)
    }

    pub fn insert(&mut self, path: PathBuf) {
        self.known.insert(path);
    }

    pub fn clear(&mut self) {
        self.known.clear();
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

pub struct HostSession<F: RemoteFs> {
    host: String,
    fs: F,
    dirs: DirectoryCache,
}

impl<F: RemoteFs> HostSession<F> {
    pub fn new(host: impl Into<String>, fs: F) -> Self {
        Self {
            host: host.into(),
            fs,
            dirs: DirectoryCache::default(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.dirs
    }

    /// Whether `path` is a directory. Only positive answers are cached.
    pub fn is_dir(&mut self, path: &Path) -> Result<bool> {
        if self.dirs.contains(path) {
            return Ok(true);
        }
        let is_dir = match self.fs.stat_is_dir(path) {
            Ok(is_dir) => is_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if is_dir {
            self.dirs.insert(path.to_path_buf());
        }
        Ok(is_dir)
    }

    /// Split the children of `path` into directories and files, caching the
    /// directories.
    fn list_children(&mut self, path: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut directories = Vec::new();
        let mut files = Vec::new();
        for child in self.fs.read_dir(path)? {
            let full_path = path.join(&child.name);
            if child.is_dir {
                self.dirs.insert(full_path.clone());
                directories.push(full_path);
            } else {
                files.push(full_path);
            }
        }
        Ok((directories, files))
    }

    /// Remove `path` and everything below it. A missing path is a no-op.
    pub fn remove_tree(&mut self, path: &Path) -> Result<()> {
        self.dirs.clear();
        let result = self.remove_recursive(path);
        self.dirs.clear();
        result
    }

    fn remove_recursive(&mut self, path: &Path) -> Result<()> {
        if self.is_dir(path)? {
            let (directories, files) = self.list_children(path)?;
            for directory in directories {
                self.remove_recursive(&directory)?;
            }
            for file in files {
                debug!("SFTP: Removing: {}", file.display());
                self.fs.unlink(&file)?;
            }
            self.fs.rmdir(path)?;
            return Ok(());
        }

        match self.fs.unlink(path) {
            Ok(()) => debug!("SFTP: Removing: {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("SFTP: Try to remove a missing file: {}", path.display());
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Create `path` and its missing ancestors, parents first. Returns the
    /// number of directories created.
    pub fn make_dirs(&mut self, path: &Path) -> Result<usize> {
        if path.as_os_str().is_empty() || path.parent().is_none() || self.is_dir(path)? {
            return Ok(0);
        }

        let mut created = match path.parent() {
            Some(parent) => self.make_dirs(parent)?,
            None => 0,
        };

        debug!("SFTP: Creating directory {}", path.display());
        self.fs.mkdir(path, DIR_MODE)?;
        self.fs.chmod(path, DIR_MODE)?;
        self.dirs.insert(path.to_path_buf());
        created += 1;
        Ok(created)
    }

    /// Upload one file, creating its parent directories first.
    pub fn upload_file(&mut self, source: &Path, destination: &Path) -> Result<(u64, usize)> {
        let created = match destination.parent() {
            Some(parent) => self.make_dirs(parent)?,
            None => 0,
        };

        let bytes = self
            .fs
            .put(source, destination)
            .map_err(|e| SyncError::transfer(destination.display().to_string(), e))?;
        self.fs.chmod(destination, FILE_MODE)?;
        debug!("SFTP: uploaded {} to {}", source.display(), destination.display());
        Ok((bytes, created))
    }
}

/// Destination of a push step below the environment directory.
fn step_destination(destination: &Path, relative: &str) -> PathBuf {
    if relative.is_empty() {
        destination.to_path_buf()
    } else {
        destination.join(relative)
    }
}

/// Replace the environment on one host: remove the destination tree, then
/// upload every step.
pub fn push_host<F: RemoteFs>(session: &mut HostSession<F>, env: &Environment) -> Result<PushReport> {
    let destination = env.destination();
    debug!("SFTP push: Cleaning destination {}", destination.display());
    session.remove_tree(&destination)?;

    let mut report = PushReport::default();
    orchestrator::drive(env, "SFTP push", &mut report, |step, report| {
        let target = step_destination(&destination, &step.destination);
        for entry in enumerate(&step.source)? {
            let (bytes, created) = session.upload_file(&entry.source, &entry.destination_path(&target))?;
            report.transferred_files += 1;
            report.transferred_bytes += bytes;
            report.directories_created += created;
        }
        Ok(())
    })?;

    Ok(report)
}

/// Environments present under the destination root of one host, sorted.
pub fn list_host<F: RemoteFs>(session: &mut HostSession<F>, env: &Environment) -> Result<Vec<EnvEntry>> {
    let root = Path::new(&env.destination_root);
    let children = match session.fs().read_dir(root) {
        Ok(children) => children,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("SFTP list: {} has no {}", session.host(), root.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut entries: Vec<EnvEntry> = children
        .into_iter()
        .map(|child| EnvEntry::new(child.name, child.mtime.map(format_epoch).unwrap_or_default()))
        .collect();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::local::tests::populate;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Node {
        Dir(u32),
        File(Vec<u8>, u32),
    }

    #[derive(Debug, Default)]
    pub(crate) struct Tree {
        pub nodes: BTreeMap<PathBuf, Node>,
        pub mkdirs: Vec<PathBuf>,
    }

    /// In-memory remote filesystem. Clones share the same tree.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MemoryFs {
        pub tree: Arc<Mutex<Tree>>,
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, path.display().to_string())
    }

    impl MemoryFs {
        pub fn with_root(root: &str) -> Self {
            let fs = Self::default();
            let mut path = PathBuf::new();
            for component in Path::new(root).components() {
                path.push(component);
                fs.tree.lock().unwrap().nodes.insert(path.clone(), Node::Dir(DIR_MODE));
            }
            fs
        }

        pub fn add_file(&self, path: &str, content: &[u8]) {
            self.tree
                .lock()
                .unwrap()
                .nodes
                .insert(PathBuf::from(path), Node::File(content.to_vec(), FILE_MODE));
        }

        pub fn add_dir(&self, path: &str) {
            self.tree
                .lock()
                .unwrap()
                .nodes
                .insert(PathBuf::from(path), Node::Dir(DIR_MODE));
        }

        pub fn node(&self, path: &str) -> Option<Node> {
            self.tree.lock().unwrap().nodes.get(Path::new(path)).cloned()
        }

        pub fn paths_under(&self, root: &str) -> Vec<PathBuf> {
            self.tree
                .lock()
                .unwrap()
                .nodes
                .keys()
                .filter(|p| p.starts_with(root) && p.as_path() != Path::new(root))
                .cloned()
                .collect()
        }

        pub fn mkdirs(&self) -> Vec<PathBuf> {
            self.tree.lock().unwrap().mkdirs.clone()
        }
    }

    impl RemoteFs for MemoryFs {
        fn stat_is_dir(&self, path: &Path) -> io::Result<bool> {
            match self.tree.lock().unwrap().nodes.get(path) {
                Some(Node::Dir(_)) => Ok(true),
                Some(Node::File(..)) => Ok(false),
                None => Err(not_found(path)),
            }
        }

        fn read_dir(&self, path: &Path) -> io::Result<Vec<RemoteEntry>> {
            let tree = self.tree.lock().unwrap();
            if !matches!(tree.nodes.get(path), Some(Node::Dir(_))) {
                return Err(not_found(path));
            }
            Ok(tree
                .nodes
                .iter()
                .filter(|(p, _)| p.parent() == Some(path))
                .map(|(p, node)| RemoteEntry {
                    name: p.file_name().unwrap().to_string_lossy().into_owned(),
                    is_dir: matches!(node, Node::Dir(_)),
                    mtime: Some(1_700_000_000),
                })
                .collect())
        }

        fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
            let mut tree = self.tree.lock().unwrap();
            let parent_is_dir = path
                .parent()
                .map_or(false, |p| matches!(tree.nodes.get(p), Some(Node::Dir(_))));
            if !parent_is_dir {
                return Err(not_found(path));
            }
            if tree.nodes.contains_key(path) {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "exists"));
            }
            tree.nodes.insert(path.to_path_buf(), Node::Dir(mode));
            tree.mkdirs.push(path.to_path_buf());
            Ok(())
        }

        fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
            match self.tree.lock().unwrap().nodes.get_mut(path) {
                Some(Node::Dir(m)) | Some(Node::File(_, m)) => {
                    *m = mode;
                    Ok(())
                }
                None => Err(not_found(path)),
            }
        }

        fn rmdir(&self, path: &Path) -> io::Result<()> {
            let mut tree = self.tree.lock().unwrap();
            if tree.nodes.keys().any(|p| p.parent() == Some(path)) {
                return Err(io::Error::new(io::ErrorKind::Other, "directory not empty"));
            }
            match tree.nodes.remove(path) {
                Some(Node::Dir(_)) => Ok(()),
                _ => Err(not_found(path)),
            }
        }

        fn unlink(&self, path: &Path) -> io::Result<()> {
            let mut tree = self.tree.lock().unwrap();
            match tree.nodes.get(path) {
                Some(Node::File(..)) => {
                    tree.nodes.remove(path);
                    Ok(())
                }
                _ => Err(not_found(path)),
            }
        }

        fn put(&self, local: &Path, remote: &Path) -> io::Result<u64> {
            let content = std::fs::read(local)?;
            let mut tree = self.tree.lock().unwrap();
            let parent_is_dir = remote
                .parent()
                .map_or(false, |p| matches!(tree.nodes.get(p), Some(Node::Dir(_))));
            if !parent_is_dir {
                return Err(not_found(remote));
            }
            let len = content.len() as u64;
            tree.nodes.insert(remote.to_path_buf(), Node::File(content, 0o600));
            Ok(len)
        }
    }

    fn session(fs: &MemoryFs) -> HostSession<MemoryFs> {
        HostSession::new("node1", fs.clone())
    }

    #[test]
    fn test_remove_tree_leaves_nothing() -> Result<()> {
        let fs = MemoryFs::with_root("/srv/dest");
        fs.add_dir("/srv/dest/prod");
        fs.add_dir("/srv/dest/prod/a");
        fs.add_dir("/srv/dest/prod/a/b");
        fs.add_file("/srv/dest/prod/a/b/deep", b"x");
        fs.add_file("/srv/dest/prod/top", b"y");
        fs.add_file("/srv/dest/keep", b"z");

        let mut session = session(&fs);
        session.remove_tree(Path::new("/srv/dest/prod"))?;
        assert!(fs.paths_under("/srv/dest/prod").is_empty());
        assert!(fs.node("/srv/dest/prod").is_none());
        assert!(fs.node("/srv/dest/keep").is_some());
        assert!(session.cache().is_empty());

        // Already gone
        session.remove_tree(Path::new("/srv/dest/prod"))?;
        Ok(())
    }

    #[test]
    fn test_cache_holds_directories_only() -> Result<()> {
        let fs = MemoryFs::with_root("/srv");
        fs.add_file("/srv/plain", b"x");
        let mut session = session(&fs);

        assert!(!session.is_dir(Path::new("/srv/later"))?);
        assert!(!session.is_dir(Path::new("/srv/plain"))?);
        assert!(session.cache().is_empty());

        // Missing before, a directory now
        fs.add_dir("/srv/later");
        assert!(session.is_dir(Path::new("/srv/later"))?);
        assert_eq!(session.cache().len(), 1);

        fs.add_dir("/srv/later/a");
        fs.add_dir("/srv/later/b");
        fs.add_file("/srv/later/f", b"y");
        let (directories, files) = session.list_children(Path::new("/srv/later"))?;
        assert_eq!(directories.len(), 2);
        assert_eq!(files, vec![PathBuf::from("/srv/later/f")]);
        assert!(session.cache().contains(Path::new("/srv/later/a")));
        assert!(session.cache().contains(Path::new("/srv/later/b")));
        assert!(!session.cache().contains(Path::new("/srv/later/f")));
        assert_eq!(session.cache().len(), 3);
        Ok(())
    }

    #[test]
    fn test_make_dirs_parents_first_once() -> Result<()> {
        let fs = MemoryFs::with_root("/srv");
        let mut session = session(&fs);

        assert_eq!(session.make_dirs(Path::new("/srv/a/b/c"))?, 3);
        assert_eq!(session.make_dirs(Path::new("/srv/a/b/c"))?, 0);
        assert_eq!(session.make_dirs(Path::new("/srv/a/b/d"))?, 1);

        assert_eq!(
            fs.mkdirs(),
            vec![
                PathBuf::from("/srv/a"),
                PathBuf::from("/srv/a/b"),
                PathBuf::from("/srv/a/b/c"),
                PathBuf::from("/srv/a/b/d"),
            ]
        );
        assert_eq!(fs.node("/srv/a/b"), Some(Node::Dir(0o755)));
        Ok(())
    }

    #[test]
    fn test_upload_file_sets_mode() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let local = temp_dir.path().join("motd");
        std::fs::write(&local, b"hello")?;

        let fs = MemoryFs::with_root("/srv");
        let mut session = session(&fs);
        let (bytes, created) = session.upload_file(&local, Path::new("/srv/x/motd"))?;

        assert_eq!(bytes, 5);
        assert_eq!(created, 1);
        assert_eq!(fs.node("/srv/x/motd"), Some(Node::File(b"hello".to_vec(), 0o644)));
        Ok(())
    }

    #[test]
    fn test_push_host_replaces_destination() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut env = populate(temp_dir.path())?;
        env.destination_root = "/srv/hpc-config".into();

        let fs = MemoryFs::with_root("/srv/hpc-config");
        fs.add_dir("/srv/hpc-config/prod");
        fs.add_file("/srv/hpc-config/prod/obsolete", b"old");

        let mut session = session(&fs);
        let report = push_host(&mut session, &env)?;

        assert_eq!(report.transferred_files, 7);
        assert!(fs.node("/srv/hpc-config/prod/obsolete").is_none());
        for path in [
            "/srv/hpc-config/prod/infra/prod.tar.xz",
            "/srv/hpc-config/prod/user/prod.tar.xz",
            "/srv/hpc-config/prod/files/motd",
            "/srv/hpc-config/prod/files/nodes/secret/key",
            "/srv/hpc-config/prod/puppet.conf",
            "/srv/hpc-config/prod/hiera.yaml",
            "/srv/hpc-config/prod/cluster-nodes.yaml",
        ] {
            assert!(matches!(fs.node(path), Some(Node::File(_, 0o644))), "{}", path);
        }
        Ok(())
    }

    #[test]
    fn test_list_host() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let mut env = populate(temp_dir.path())?;
        env.destination_root = "/srv/hpc-config".into();

        let fs = MemoryFs::default();
        assert!(list_host(&mut session(&fs), &env)?.is_empty());

        let fs = MemoryFs::with_root("/srv/hpc-config");
        fs.add_dir("/srv/hpc-config/zeta");
        fs.add_dir("/srv/hpc-config/alpha");
        let entries = list_host(&mut session(&fs), &env)?;
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(entries[0].modified, "2023-11-14 22:13:20");
        Ok(())
    }
}
