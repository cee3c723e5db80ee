//! SFTP sessions over `ssh2`.

use super::session::{RemoteEntry, RemoteFs};
use super::Connect;
use crate::config::SftpConfig;
use crate::{Result, SyncError};
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

// SSH_FX_NO_SUCH_FILE, SSH_FX_NO_SUCH_PATH
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

fn io_error(e: ssh2::Error) -> io::Error {
    match e.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => {
            io::Error::new(io::ErrorKind::NotFound, e)
        }
        _ => io::Error::new(io::ErrorKind::Other, e),
    }
}

/// An authenticated SFTP channel. The session is kept alongside the channel
/// so the transport outlives every request.
pub struct SshFs {
    _session: Session,
    sftp: Sftp,
}

impl RemoteFs for SshFs {
    fn stat_is_dir(&self, path: &Path) -> io::Result<bool> {
        self.sftp.stat(path).map(|stat| stat.is_dir()).map_err(io_error)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<RemoteEntry>> {
        let children = self.sftp.readdir(path).map_err(io_error)?;
        Ok(children
            .into_iter()
            .filter_map(|(child, stat)| {
                let name = child.file_name()?.to_string_lossy().into_owned();
                Some(RemoteEntry {
                    name,
                    is_dir: stat.is_dir(),
                    mtime: stat.mtime,
                })
            })
            .collect())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.sftp.mkdir(path, mode as i32).map_err(io_error)
    }

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        self.sftp.setstat(path, stat).map_err(io_error)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        self.sftp.rmdir(path).map_err(io_error)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        self.sftp.unlink(path).map_err(io_error)
    }

    fn put(&self, local: &Path, remote: &Path) -> io::Result<u64> {
        let mut source = std::fs::File::open(local)?;
        let mut target = self.sftp.create(remote).map_err(io_error)?;
        io::copy(&mut source, &mut target)
    }
}

/// Opens key-authenticated SFTP sessions to the configured hosts.
#[derive(Debug, Clone)]
pub struct SshConnector {
    username: String,
    private_key: PathBuf,
    port: u16,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl SshConnector {
    pub fn new(settings: &SftpConfig) -> Self {
        Self {
            username: settings.username.clone(),
            private_key: settings.private_key.clone(),
            port: settings.port,
            connect_timeout: settings.connect_timeout(),
            operation_timeout: Duration::from_secs(settings.operation_timeout_secs),
        }
    }

    fn tcp_connect(&self, host: &str) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in (host, self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .map(SyncError::from)
            .unwrap_or_else(|| SyncError::Connection {
                host: host.to_string(),
                verb: "connect".into(),
                message: "no address resolved".into(),
            }))
    }

    fn open(&self, tcp: TcpStream) -> Result<SshFs> {
        let mut session = Session::new()?;
        session.set_timeout(self.operation_timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_pubkey_file(&self.username, None, &self.private_key, None)?;

        if !session.authenticated() {
            return Err(SyncError::Connection {
                host: String::new(),
                verb: "auth".into(),
                message: "SSH authentication failed".into(),
            });
        }

        let sftp = session.sftp()?;
        Ok(SshFs {
            _session: session,
            sftp,
        })
    }
}

impl Connect for SshConnector {
    type Fs = SshFs;

    fn connect(&self, host: &str, verb: &str) -> Option<SshFs> {
        let tcp = match self.tcp_connect(host) {
            Ok(tcp) => tcp,
            Err(e) => {
                error!("SFTP {}: Failed to connect to host {}", verb, host);
                info!("SFTP {}: Connection error: {}.", verb, e);
                return None;
            }
        };

        match self.open(tcp) {
            Ok(fs) => Some(fs),
            Err(e) => {
                error!("SFTP {}: SSH failed to {}@{}", verb, self.username, host);
                info!("SFTP {}: SSH error: {}.", verb, e);
                None
            }
        }
    }
}
