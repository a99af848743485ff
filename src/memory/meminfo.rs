// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;

/// Free swap from /proc/meminfo, in KiB.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemInfo {
    pub swap_free: u64,
}

impl MemInfo {
    /// Load /proc/meminfo and parse it.
    pub fn load() -> io::Result<Self> {
        let reader = File::open("/proc/meminfo")?;
        let reader = BufReader::new(reader);
        Self::parse(reader)
    }

    fn parse<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut result = Self::default();
        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            let field = match key {
                "SwapFree:" => &mut result.swap_free,
                _ => continue,
            };
            let Some(value) = tokens.next() else {
                continue;
            };
            let Ok(value) = value.parse::<u64>() else {
                continue;
            };
            *field = value;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let mock_meminfo = r#"
MemTotal:        8025656 kB
MemFree:         4586928 kB
MemAvailable:    6704404 kB
Cached:          1949056 kB
SwapCached:            0 kB
Active(anon):     489640 kB
Inactive(anon):    29188 kB
SwapTotal:      11756332 kB
SwapFree:       11756331 kB
Dirty:              5712 kB
Shmem:            140156 kB"#;
        let meminfo = MemInfo::parse(mock_meminfo.as_bytes()).unwrap();
        assert_eq!(meminfo.swap_free, 11756331);
    }

    #[test]
    fn test_parse_meminfo_without_swap() {
        let meminfo = MemInfo::parse("MemTotal: 8025656 kB".as_bytes()).unwrap();
        assert_eq!(meminfo, MemInfo::default());
    }
}
