// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::Display;
use std::fs::File;
use std::io;
use std::io::Read;
use std::path::Path;

/// Error of reading /proc/pid/oom_score_adj
#[derive(Debug)]
pub enum Error {
    NotFound(i32),
    FileCorrupt,
    Io(io::Error),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotFound(_) => None,
            Self::FileCorrupt => None,
            Self::Io(e) => Some(e),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(pid) => {
                f.write_fmt(format_args!("/proc/{pid}/oom_score_adj is not found"))
            }
            Self::FileCorrupt => f.write_str("/proc/pid/oom_score_adj invalid format"),
            Self::Io(e) => f.write_fmt(format_args!("procfs: {e}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Load the OOM priority of the process from `<proc_root>/<pid>/oom_score_adj`.
/// Higher values are killed first.
pub fn load_oom_score_adj(proc_root: &Path, pid: i32) -> Result<i32> {
    let mut file = open_oom_score_adj_file(proc_root, pid)?;
    parse_oom_score_adj(&mut file)
}

fn open_oom_score_adj_file(proc_root: &Path, pid: i32) -> Result<File> {
    File::open(proc_root.join(pid.to_string()).join("oom_score_adj")).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NotFound(pid)
        } else {
            Error::Io(e)
        }
    })
}

fn parse_oom_score_adj<R: Read>(reader: &mut R) -> Result<i32> {
    // oom_score_adj is at most "-1000\n".
    let mut buf = String::with_capacity(8);
    reader.read_to_string(&mut buf).map_err(Error::Io)?;
    buf.trim().parse().map_err(|_| Error::FileCorrupt)
}

#[cfg(test)]
mod tests {
    use std::io::Seek;
    use std::io::SeekFrom;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_oom_score_adj() {
        let pid = i32::try_from(std::process::id()).unwrap();
        let score = load_oom_score_adj(Path::new("/proc"), pid).unwrap();
        assert!((-1000..=1000).contains(&score));
        assert!(matches!(
            load_oom_score_adj(Path::new("/proc"), i32::MAX),
            Err(Error::NotFound(i32::MAX))
        ));
    }

    #[test]
    fn test_parse_oom_score_adj() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"-1000\n").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(parse_oom_score_adj(&mut file).unwrap(), -1000);

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"882").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(parse_oom_score_adj(&mut file).unwrap(), 882);
    }

    #[test]
    fn test_parse_oom_score_adj_corrupt() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"high\n").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert!(matches!(
            parse_oom_score_adj(&mut file),
            Err(Error::FileCorrupt)
        ));

        let mut empty = tempfile::tempfile().unwrap();
        assert!(matches!(
            parse_oom_score_adj(&mut empty),
            Err(Error::FileCorrupt)
        ));
    }
}
