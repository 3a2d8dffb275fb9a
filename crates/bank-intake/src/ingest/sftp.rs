use super::remote::{check_name, DropSession, RemoteDrop, RemoteEntry, TransportError};
use crate::config::SftpSettings;
use ssh2::{RenameFlags, Session, Sftp};
use std::fs::File;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Applies to every blocking libssh2 call once connected.
const SESSION_TIMEOUT_MS: u32 = 30_000;

/// A drop on an SFTP server, authenticated by password.
#[derive(Debug, Clone)]
pub struct SftpDrop {
    settings: SftpSettings,
}

impl SftpDrop {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }

    fn unreachable(&self, source: io::Error) -> TransportError {
        TransportError::Unreachable {
            location: self.location(),
            source,
        }
    }

    fn open(&self) -> io::Result<SftpSession> {
        let addr = (self.settings.host.as_str(), self.settings.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;

        let mut session = Session::new()?;
        session.set_timeout(SESSION_TIMEOUT_MS);
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&self.settings.username, &self.settings.password)?;
        if !session.authenticated() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "password authentication rejected",
            ));
        }

        let sftp = session.sftp()?;
        Ok(SftpSession {
            sftp,
            _session: session,
            remote_dir: PathBuf::from(&self.settings.remote_dir),
        })
    }
}

impl RemoteDrop for SftpDrop {
    fn connect(&self) -> Result<Box<dyn DropSession>, TransportError> {
        let session = self.open().map_err(|err| self.unreachable(err))?;
        debug!(location = %self.location(), "sftp session opened");
        Ok(Box::new(session))
    }

    fn location(&self) -> String {
        format!(
            "sftp://{}@{}:{}{}",
            self.settings.username, self.settings.host, self.settings.port, self.settings.remote_dir
        )
    }
}

struct SftpSession {
    // Declared first so the channel closes before the session.
    sftp: Sftp,
    _session: Session,
    remote_dir: PathBuf,
}

impl SftpSession {
    fn path_for(&self, name: &str) -> Result<PathBuf, TransportError> {
        check_name(name)?;
        Ok(self.remote_dir.join(name))
    }
}

impl DropSession for SftpSession {
    fn list(&mut self) -> Result<Vec<RemoteEntry>, TransportError> {
        let entries = self
            .sftp
            .readdir(&self.remote_dir)
            .map_err(|err| TransportError::operation("list", ".", err.into()))?;

        let mut listed: Vec<RemoteEntry> = entries
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_str()?.to_string();
                // Hidden names are in-flight deposits.
                (!name.starts_with('.')).then(|| RemoteEntry {
                    name,
                    size: stat.size.unwrap_or(0),
                })
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    fn fetch(&mut self, name: &str, destination: &Path) -> Result<u64, TransportError> {
        let source = self.path_for(name)?;
        let fetch = |err: io::Error| TransportError::operation("fetch", name, err);

        let mut remote = self.sftp.open(&source).map_err(|err| fetch(err.into()))?;
        let mut local = File::create(destination).map_err(fetch)?;
        let copied = io::copy(&mut remote, &mut local).map_err(fetch)?;
        local.flush().map_err(fetch)?;
        Ok(copied)
    }

    fn remove(&mut self, name: &str) -> Result<(), TransportError> {
        let path = self.path_for(name)?;
        self.sftp
            .unlink(&path)
            .map_err(|err| TransportError::operation("remove", name, err.into()))
    }

    fn deposit(&mut self, name: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let target = self.path_for(name)?;
        let partial = self.remote_dir.join(format!(".{name}.partial"));

        let written = self
            .sftp
            .create(&partial)
            .map_err(io::Error::from)
            .and_then(|mut file| file.write_all(bytes))
            .and_then(|()| {
                self.sftp
                    .rename(&partial, &target, Some(RenameFlags::OVERWRITE))
                    .map_err(io::Error::from)
            });
        written.map_err(|err| {
            let _ = self.sftp.unlink(&partial);
            TransportError::operation("deposit", name, err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn settings(port: u16) -> SftpSettings {
        SftpSettings {
            host: "127.0.0.1".to_string(),
            port,
            username: "bank".to_string(),
            password: "password".to_string(),
            remote_dir: "/incoming".to_string(),
        }
    }

    #[test]
    fn location_names_user_host_and_directory() {
        let drop = SftpDrop::new(settings(2222));
        assert_eq!(drop.location(), "sftp://bank@127.0.0.1:2222/incoming");
    }

    #[test]
    fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("binds");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = SftpDrop::new(settings(port))
            .connect()
            .err()
            .expect("nothing listens");
        assert!(matches!(err, TransportError::Unreachable { .. }));
        assert!(err.to_string().contains("sftp://bank@127.0.0.1"));
    }

    #[test]
    fn server_that_hangs_up_before_handshake_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("binds");
        let port = listener.local_addr().expect("addr").port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accepts");
            drop(stream);
        });

        let result = SftpDrop::new(settings(port)).connect();
        assert!(matches!(result, Err(TransportError::Unreachable { .. })));
        server.join().expect("server thread");
    }
}
