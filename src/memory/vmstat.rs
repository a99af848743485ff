// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;

/// Global page counters from /proc/vmstat. All values are in pages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Vmstat {
    pub nr_free_pages: u64,
    pub nr_file_pages: u64,
    pub nr_shmem: u64,
    pub nr_active_anon: u64,
    pub nr_inactive_anon: u64,
    pub nr_active_file: u64,
    pub nr_inactive_file: u64,
}

impl Vmstat {
    /// Load /proc/vmstat and parse it.
    pub fn load() -> io::Result<Self> {
        let reader = File::open("/proc/vmstat")?;
        let reader = BufReader::new(reader);
        Self::parse(reader)
    }

    pub(crate) fn parse<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut result = Self::default();
        for line in reader.lines() {
            let line = line?;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            let field = match key {
                "nr_free_pages" => &mut result.nr_free_pages,
                "nr_file_pages" => &mut result.nr_file_pages,
                "nr_shmem" => &mut result.nr_shmem,
                "nr_active_anon" => &mut result.nr_active_anon,
                "nr_inactive_anon" => &mut result.nr_inactive_anon,
                "nr_active_file" => &mut result.nr_active_file,
                "nr_inactive_file" => &mut result.nr_inactive_file,
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
    fn test_parse_vmstat() {
        let mock_vmstat = r#"
nr_free_pages 44453
nr_zone_inactive_anon 100986
nr_zone_active_anon 294376
nr_zone_inactive_file 61713
nr_zone_active_file 62802
nr_zone_unevictable 22615
nr_inactive_anon 100987
nr_active_anon 294377
nr_inactive_file 61714
nr_active_file 62803
nr_unevictable 22615
nr_anon_pages 299987
nr_mapped 123606
nr_file_pages 243333
nr_dirty 400
nr_shmem 115859
nr_shmem_hugepages 0
workingset_refault_anon 72178310
pgsteal_direct 5087936"#;
        let vmstat = Vmstat::parse(mock_vmstat.as_bytes()).unwrap();
        assert_eq!(vmstat.nr_free_pages, 44453);
        assert_eq!(vmstat.nr_file_pages, 243333);
        assert_eq!(vmstat.nr_shmem, 115859);
        // The per-zone counters must not shadow the global ones.
        assert_eq!(vmstat.nr_active_anon, 294377);
        assert_eq!(vmstat.nr_inactive_anon, 100987);
        assert_eq!(vmstat.nr_active_file, 62803);
        assert_eq!(vmstat.nr_inactive_file, 61714);
    }

    #[test]
    fn test_parse_vmstat_skips_malformed_lines() {
        let mock_vmstat = "nr_free_pages\nnr_shmem abc\nnr_file_pages 12345";
        let vmstat = Vmstat::parse(mock_vmstat.as_bytes()).unwrap();
        assert_eq!(vmstat.nr_free_pages, 0);
        assert_eq!(vmstat.nr_shmem, 0);
        assert_eq!(vmstat.nr_file_pages, 12345);
    }
}
