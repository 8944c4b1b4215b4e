// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! [`ProcessTable`] backed by a procfs mount.

use std::collections::HashSet;
use std::env;
use std::fs::{self, read_dir, read_link};
use std::io;
use std::path::{Path, PathBuf};

use log::trace;

use crate::discovery::netns::{AddressFamily, Ino, parse_listen_table};
use crate::discovery::{ListenEndpoint, ProcessTable};

/// The kernel truncates `comm` to 15 bytes.
const MAX_COMM_LEN: usize = 15;

#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// procfs of the host, honouring `HOST_PROC` when running in a container.
    pub fn host() -> Self {
        match env::var("HOST_PROC") {
            Ok(root) if !root.is_empty() => Self::new(root),
            _ => Self::new("/proc"),
        }
    }

    fn pid_path(&self, pid: i32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    /// Process name as `ps` reports it. Falls back to the basename of argv[0]
    /// when `comm` may have been truncated.
    fn process_name(&self, pid: i32) -> io::Result<String> {
        let comm = fs::read_to_string(self.pid_path(pid).join("comm"))?;
        let comm = comm.trim_end_matches('\n').to_string();
        if comm.len() < MAX_COMM_LEN {
            return Ok(comm);
        }

        let cmdline = fs::read_to_string(self.pid_path(pid).join("cmdline")).unwrap_or_default();
        let argv0 = cmdline
            .split('\0')
            .next()
            .and_then(|arg| Path::new(arg).file_name())
            .and_then(|name| name.to_str());
        match argv0 {
            Some(name) if name.starts_with(&comm) => Ok(name.to_string()),
            _ => Ok(comm),
        }
    }

    /// Inodes of the sockets held open by a process, from /proc/<pid>/fd.
    fn socket_inodes(&self, pid: i32) -> io::Result<HashSet<Ino>> {
        let sockets = read_dir(self.pid_path(pid).join("fd"))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| read_link(entry.path()).ok())
            .filter_map(|link| is_socket(&link))
            .collect();
        Ok(sockets)
    }
}

fn is_socket(link: &Path) -> Option<Ino> {
    let link = link.to_str()?;
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

impl ProcessTable for ProcFs {
    fn find_process(&self, name: &str) -> io::Result<Option<i32>> {
        let mut found: Option<i32> = None;

        for entry in read_dir(&self.root)?.filter_map(|entry| entry.ok()) {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            else {
                continue;
            };

            // Processes exit between listing and reading; permission errors
            // are also expected for other users' processes.
            let Ok(process_name) = self.process_name(pid) else {
                trace!("Could not read name of pid {pid}");
                continue;
            };

            if process_name == name {
                found = Some(found.map_or(pid, |current| current.min(pid)));
            }
        }

        Ok(found)
    }

    fn listen_endpoints(&self, pid: i32) -> io::Result<Vec<ListenEndpoint>> {
        let sockets = self.socket_inodes(pid)?;

        let mut seen = HashSet::new();
        let mut endpoints = Vec::new();
        for family in [AddressFamily::V4, AddressFamily::V6] {
            let table = self.pid_path(pid).join("net").join(family.table_name());
            for (inode, endpoint) in parse_listen_table(&table, family) {
                if sockets.contains(&inode) && seen.insert(endpoint) {
                    endpoints.push(endpoint);
                }
            }
        }

        Ok(endpoints)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    const HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n";

    /// Minimal fake procfs tree.
    struct FakeProc {
        dir: TempDir,
    }

    impl FakeProc {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn add_process(&self, pid: i32, comm: &str, cmdline: &str) {
            let pid_dir = self.dir.path().join(pid.to_string());
            fs::create_dir_all(pid_dir.join("fd")).unwrap();
            fs::create_dir_all(pid_dir.join("net")).unwrap();
            fs::write(pid_dir.join("comm"), format!("{comm}\n")).unwrap();
            fs::write(pid_dir.join("cmdline"), cmdline).unwrap();
        }

        fn add_socket_fd(&self, pid: i32, fd: u32, inode: Ino) {
            let link = self
                .dir
                .path()
                .join(pid.to_string())
                .join("fd")
                .join(fd.to_string());
            symlink(format!("socket:[{inode}]"), link).unwrap();
        }

        fn write_table(&self, pid: i32, table: &str, lines: &[&str]) {
            let mut contents = HEADER.to_string();
            for line in lines {
                contents.push_str(line);
                contents.push('\n');
            }
            let path = self.dir.path().join(pid.to_string()).join("net").join(table);
            fs::write(path, contents).unwrap();
        }

        fn procfs(&self) -> ProcFs {
            ProcFs::new(self.dir.path())
        }
    }

    fn listen_line(address: &str, port: u16, inode: Ino) -> String {
        format!(
            "   0: {address}:{port:04X} 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 {inode} 1 0000000000000000 100 0 0 10 0"
        )
    }

    #[test]
    fn test_find_process_lowest_pid_wins() {
        let proc = FakeProc::new();
        proc.add_process(420, "manifestd", "/usr/bin/manifestd\0start\0");
        proc.add_process(42, "manifestd", "/usr/bin/manifestd\0start\0");
        proc.add_process(7, "bash", "/bin/bash\0");
        fs::create_dir_all(proc.dir.path().join("self")).unwrap();

        let table = proc.procfs();
        assert_eq!(table.find_process("manifestd").unwrap(), Some(42));
        assert_eq!(table.find_process("manifest").unwrap(), None);
        assert_eq!(table.find_process("absent").unwrap(), None);
    }

    #[test]
    fn test_find_process_truncated_comm() {
        let proc = FakeProc::new();
        proc.add_process(
            10,
            "manifest-exten",
            "/opt/bin/manifest-extended-node\0--flag\0",
        );
        proc.add_process(
            11,
            "manifest-extend",
            "/opt/bin/manifest-extended-node\0--flag\0",
        );

        let table = proc.procfs();
        assert_eq!(
            table.find_process("manifest-extended-node").unwrap(),
            Some(11)
        );
    }

    #[test]
    fn test_find_process_missing_root() {
        let table = ProcFs::new("/nonexistent/proc/root");
        assert!(table.find_process("manifestd").is_err());
    }

    #[test]
    fn test_listen_endpoints_filters_by_owned_sockets() {
        let proc = FakeProc::new();
        proc.add_process(42, "manifestd", "manifestd\0");
        proc.add_socket_fd(42, 3, 1001);
        proc.add_socket_fd(42, 4, 1002);
        proc.add_socket_fd(42, 5, 1003);
        // fd that is not a socket
        symlink("/dev/null", proc.dir.path().join("42/fd/0")).unwrap();

        proc.write_table(
            42,
            "tcp",
            &[
                &listen_line("00000000", 26657, 1001),
                &listen_line("00000000", 9090, 1002),
                // Owned by another process sharing the namespace
                &listen_line("00000000", 1317, 2000),
            ],
        );
        proc.write_table(
            42,
            "tcp6",
            &[&listen_line("00000000000000000000000000000000", 9091, 1003)],
        );

        let endpoints = proc.procfs().listen_endpoints(42).unwrap();
        assert_eq!(
            endpoints,
            vec![
                ListenEndpoint {
                    address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    port: 26657
                },
                ListenEndpoint {
                    address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    port: 9090
                },
                ListenEndpoint {
                    address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                    port: 9091
                },
            ]
        );
    }

    #[test]
    fn test_listen_endpoints_without_fd_dir() {
        let proc = FakeProc::new();
        assert!(proc.procfs().listen_endpoints(99).is_err());
    }

    #[test]
    fn test_is_socket() {
        assert_eq!(is_socket(Path::new("socket:[12345]")), Some(12345));
        assert_eq!(is_socket(Path::new("pipe:[12345]")), None);
        assert_eq!(is_socket(Path::new("/dev/null")), None);
    }
}
