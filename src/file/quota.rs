use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use super::error::{FileError, FileResult};
use super::PAGE_STRIDE;

/// Maximum length of the database name stored in the metadata record
const NAME_LEN: usize = 256;

/// Full metadata record: limit + used + mtime + name + original KB setting
const RECORD_SIZE: usize = 8 + 8 + 8 + NAME_LEN + 8;

/// Older record layout without the original-KB field
const OLD_RECORD_SIZE: usize = 8 + 8 + 8 + NAME_LEN;

/// Per-database disk quota, counted in pages and persisted across sessions.
///
/// A limit of zero means the quota is disabled. The counter is saved to
/// `{database}.pf_metadata` inside the database directory on every change,
/// so an interrupted session still observes its own allocations on reopen.
pub struct DiskQuota {
    limit_pages: usize,
    used_pages: usize,
    database: Option<String>,
    metadata_path: Option<PathBuf>,
}

impl DiskQuota {
    /// Create a quota tracker not yet attached to any database
    pub fn new() -> Self {
        Self {
            limit_pages: 0,
            used_pages: 0,
            database: None,
            metadata_path: None,
        }
    }

    pub fn limit_pages(&self) -> usize {
        self.limit_pages
    }

    pub fn used_pages(&self) -> usize {
        self.used_pages
    }

    pub fn available_pages(&self) -> usize {
        self.limit_pages.saturating_sub(self.used_pages)
    }

    pub fn enabled(&self) -> bool {
        self.limit_pages > 0
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Point the quota at a database directory, saving the previous
    /// database's record and loading the target's.
    pub fn set_database(&mut self, dir: &Path, name: &str) -> FileResult<()> {
        if self.database.as_deref() == Some(name) {
            return Ok(());
        }

        if self.enabled() {
            self.save()?;
        }

        self.database = Some(name.to_string());
        self.metadata_path = Some(dir.join(format!("{}.pf_metadata", name)));
        self.limit_pages = 0;
        self.used_pages = 0;
        self.load();

        Ok(())
    }

    /// Detach from the current database, flushing its record first.
    pub fn detach(&mut self) -> FileResult<()> {
        if self.enabled() {
            self.save()?;
        }
        self.database = None;
        self.metadata_path = None;
        self.limit_pages = 0;
        self.used_pages = 0;
        Ok(())
    }

    /// Set the quota from a kilobyte budget; returns the resulting page limit.
    pub fn set_limit_kb(&mut self, kb: usize) -> FileResult<usize> {
        let new_limit = (kb * 1024) / PAGE_STRIDE;
        if self.limit_pages > 0 && self.limit_pages != new_limit {
            info!(
                "quota: overriding saved limit of {} pages with {} pages",
                self.limit_pages, new_limit
            );
        }
        self.limit_pages = new_limit;
        self.save()?;
        info!(
            "quota: limit set to {} pages ({} KB), {} in use",
            self.limit_pages, kb, self.used_pages
        );
        Ok(self.limit_pages)
    }

    pub fn can_charge(&self, pages: usize) -> bool {
        !self.enabled() || self.used_pages + pages <= self.limit_pages
    }

    /// Account for newly allocated pages; fails without side effects when
    /// the budget would be exceeded.
    pub fn charge(&mut self, pages: usize) -> FileResult<()> {
        if !self.enabled() {
            return Ok(());
        }
        if self.used_pages + pages > self.limit_pages {
            warn!(
                "quota: refusing {} page(s), {}/{} in use",
                pages, self.used_pages, self.limit_pages
            );
            return Err(FileError::NoMemory {
                used: self.used_pages,
                limit: self.limit_pages,
            });
        }
        self.used_pages += pages;
        self.save()
    }

    /// Return pages to the budget.
    pub fn release(&mut self, pages: usize) -> FileResult<()> {
        if !self.enabled() {
            return Ok(());
        }
        if pages > self.used_pages {
            warn!(
                "quota: releasing {} page(s) but only {} in use",
                pages, self.used_pages
            );
            self.used_pages = 0;
        } else {
            self.used_pages -= pages;
        }
        self.save()
    }

    /// Write the current counters to the metadata file.
    pub fn save(&self) -> FileResult<()> {
        let (path, name) = match (&self.metadata_path, &self.database) {
            (Some(p), Some(n)) => (p, n),
            _ => return Ok(()),
        };

        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&(self.limit_pages as u64).to_le_bytes());
        buf[8..16].copy_from_slice(&(self.used_pages as u64).to_le_bytes());
        buf[16..24].copy_from_slice(&mtime.to_le_bytes());
        let name_bytes = name.as_bytes();
        let n = name_bytes.len().min(NAME_LEN - 1);
        buf[24..24 + n].copy_from_slice(&name_bytes[..n]);
        let original_kb = (self.limit_pages * PAGE_STRIDE / 1024) as u64;
        buf[24 + NAME_LEN..].copy_from_slice(&original_kb.to_le_bytes());

        fs::write(path, buf)?;
        Ok(())
    }

    /// Load counters from the metadata file; silently starts from zero when
    /// the file is absent, truncated, or names a different database.
    fn load(&mut self) {
        let (path, name) = match (&self.metadata_path, &self.database) {
            (Some(p), Some(n)) => (p, n),
            _ => return,
        };

        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return,
        };

        let mut buf = [0u8; RECORD_SIZE];
        let read = match file.read(&mut buf) {
            Ok(n) => n,
            Err(_) => return,
        };

        // The original-KB tail was added later; accept both layouts
        if read != RECORD_SIZE && read != OLD_RECORD_SIZE {
            return;
        }

        let stored_name_end = buf[24..24 + NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        let stored_name = &buf[24..24 + stored_name_end];
        if stored_name != name.as_bytes() {
            return;
        }

        self.limit_pages = u64::from_le_bytes(buf[0..8].try_into().unwrap()) as usize;
        self.used_pages = u64::from_le_bytes(buf[8..16].try_into().unwrap()) as usize;
    }
}

impl Default for DiskQuota {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disabled_quota_accepts_everything() {
        let mut quota = DiskQuota::new();
        assert!(!quota.enabled());
        assert!(quota.charge(1_000_000).is_ok());
        assert_eq!(quota.used_pages(), 0);
    }

    #[test]
    fn test_charge_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let mut quota = DiskQuota::new();
        quota.set_database(temp_dir.path(), "testdb").unwrap();
        quota.set_limit_kb(40).unwrap(); // 10 pages at 4096 bytes each
        assert_eq!(quota.limit_pages(), 10);

        quota.charge(8).unwrap();
        assert_eq!(quota.used_pages(), 8);
        assert!(quota.can_charge(2));
        assert!(!quota.can_charge(3));

        let result = quota.charge(3);
        assert!(matches!(result, Err(FileError::NoMemory { .. })));
        assert_eq!(quota.used_pages(), 8);

        quota.release(4).unwrap();
        assert_eq!(quota.used_pages(), 4);
        quota.charge(3).unwrap();
        assert_eq!(quota.used_pages(), 7);
    }

    #[test]
    fn test_over_release_saturates() {
        let temp_dir = TempDir::new().unwrap();
        let mut quota = DiskQuota::new();
        quota.set_database(temp_dir.path(), "testdb").unwrap();
        quota.set_limit_kb(40).unwrap();
        quota.charge(2).unwrap();
        quota.release(5).unwrap();
        assert_eq!(quota.used_pages(), 0);
    }

    #[test]
    fn test_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut quota = DiskQuota::new();
            quota.set_database(temp_dir.path(), "testdb").unwrap();
            quota.set_limit_kb(40).unwrap();
            quota.charge(7).unwrap();
        }

        let mut quota = DiskQuota::new();
        quota.set_database(temp_dir.path(), "testdb").unwrap();
        assert_eq!(quota.limit_pages(), 10);
        assert_eq!(quota.used_pages(), 7);
    }

    #[test]
    fn test_other_database_record_ignored() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut quota = DiskQuota::new();
            quota.set_database(temp_dir.path(), "first").unwrap();
            quota.set_limit_kb(40).unwrap();
            quota.charge(3).unwrap();
        }

        // Overwrite the file under a name the loader will not accept
        let first = temp_dir.path().join("first.pf_metadata");
        let second = temp_dir.path().join("second.pf_metadata");
        fs::copy(&first, &second).unwrap();

        let mut quota = DiskQuota::new();
        quota.set_database(temp_dir.path(), "second").unwrap();
        assert_eq!(quota.limit_pages(), 0);
        assert_eq!(quota.used_pages(), 0);
    }

    #[test]
    fn test_old_record_layout_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("olddb.pf_metadata");

        let mut buf = vec![0u8; OLD_RECORD_SIZE];
        buf[0..8].copy_from_slice(&12u64.to_le_bytes());
        buf[8..16].copy_from_slice(&5u64.to_le_bytes());
        buf[24..24 + 5].copy_from_slice(b"olddb");
        fs::write(&path, &buf).unwrap();

        let mut quota = DiskQuota::new();
        quota.set_database(temp_dir.path(), "olddb").unwrap();
        assert_eq!(quota.limit_pages(), 12);
        assert_eq!(quota.used_pages(), 5);
    }

    #[test]
    fn test_switching_database_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let mut quota = DiskQuota::new();
        quota.set_database(temp_dir.path(), "a").unwrap();
        quota.set_limit_kb(40).unwrap();
        quota.charge(4).unwrap();

        quota.set_database(temp_dir.path(), "b").unwrap();
        assert_eq!(quota.used_pages(), 0);

        quota.set_database(temp_dir.path(), "a").unwrap();
        assert_eq!(quota.used_pages(), 4);
        assert_eq!(quota.limit_pages(), 10);
    }
}
