// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use once_cell::sync::Lazy;

static PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf is memory safe.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if page_size > 0 {
        page_size as u64
    } else {
        4096
    }
});

pub fn get_page_size() -> u64 {
    *PAGE_SIZE
}

/// Converts a KiB count (as reported by /proc/meminfo) to pages, rounding down.
pub fn kb_to_pages(kb: u64) -> u64 {
    kb.saturating_mul(1024) / get_page_size()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kb_to_pages() {
        let page_kb = get_page_size() / 1024;
        assert_eq!(kb_to_pages(0), 0);
        assert_eq!(kb_to_pages(page_kb), 1);
        assert_eq!(kb_to_pages(page_kb * 100 + page_kb - 1), 100);
    }
}
