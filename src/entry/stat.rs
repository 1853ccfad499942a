//! `stat(2)`-shaped views of entry metadata.

use std::fs;

use filetime::FileTime;

use super::{Entry, Timestamp};

/// The fields of a `struct stat` an entry can be built from or reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Device holding the file.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// File type and permissions.
    pub mode: u32,
    /// Hard link count.
    pub nlink: u32,
    /// Owner user id.
    pub uid: i64,
    /// Group id.
    pub gid: i64,
    /// Device a special file represents.
    pub rdev: u64,
    /// Size in bytes.
    pub size: i64,
    /// Last access.
    pub atime: Timestamp,
    /// Last modification.
    pub mtime: Timestamp,
    /// Last status change.
    pub ctime: Timestamp,
}

impl Entry {
    /// Returns the entry's metadata as a [`Stat`]; unset fields read as zero.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev(),
            ino: self.ino(),
            mode: self.mode(),
            nlink: self.nlink(),
            uid: self.uid(),
            gid: self.gid(),
            rdev: self.rdev(),
            size: self.size(),
            atime: self.atime(),
            mtime: self.mtime(),
            ctime: self.ctime(),
        }
    }

    /// Sets every field a [`Stat`] carries.
    pub fn set_stat(&mut self, st: &Stat) {
        self.set_dev(st.dev);
        self.set_ino(st.ino);
        self.set_mode(st.mode);
        self.set_nlink(st.nlink);
        self.set_uid(st.uid);
        self.set_gid(st.gid);
        self.set_rdev(st.rdev);
        self.set_size(st.size);
        self.set_atime(st.atime);
        self.set_mtime(st.mtime);
        self.set_ctime(st.ctime);
    }

    /// Fills the entry from file system metadata.
    ///
    /// Timestamps come from [`filetime`]; the creation time is set only where
    /// the platform reports one. On Unix the ownership, device and inode
    /// fields are copied as well.
    pub fn copy_metadata(&mut self, metadata: &fs::Metadata) {
        self.set_atime(FileTime::from_last_access_time(metadata).into());
        self.set_mtime(FileTime::from_last_modification_time(metadata).into());
        match FileTime::from_creation_time(metadata) {
            Some(created) => self.set_birthtime(created.into()),
            None => self.unset_birthtime(),
        }
        self.set_size(i64::try_from(metadata.len()).unwrap_or(i64::MAX));

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;

            self.set_mode(metadata.mode());
            self.set_ctime(Timestamp::new(metadata.ctime(), metadata.ctime_nsec()));
            self.set_dev(metadata.dev());
            self.set_ino(metadata.ino());
            self.set_nlink(u32::try_from(metadata.nlink()).unwrap_or(u32::MAX));
            self.set_uid(i64::from(metadata.uid()));
            self.set_gid(i64::from(metadata.gid()));
            self.set_rdev(metadata.rdev());
        }

        #[cfg(not(unix))]
        {
            use super::{AE_IFDIR, AE_IFLNK, AE_IFREG};

            let file_type = metadata.file_type();
            let filetype = if file_type.is_dir() {
                AE_IFDIR
            } else if file_type.is_symlink() {
                AE_IFLNK
            } else {
                AE_IFREG
            };
            let perm = match (metadata.permissions().readonly(), file_type.is_dir()) {
                (true, true) => 0o555,
                (true, false) => 0o444,
                (false, true) => 0o755,
                (false, false) => 0o644,
            };
            self.set_mode(filetype | perm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AE_IFDIR, AE_IFLNK, AE_IFREG};

    #[test]
    fn test_stat_roundtrip() {
        let st = Stat {
            dev: 0x801,
            ino: 42,
            mode: AE_IFREG | 0o600,
            nlink: 2,
            uid: 1000,
            gid: 100,
            rdev: 0,
            size: 12,
            atime: Timestamp::new(10, 1),
            mtime: Timestamp::new(20, 2),
            ctime: Timestamp::new(30, 3),
        };
        let mut entry = Entry::new();
        entry.set_stat(&st);
        assert_eq!(entry.stat(), st);
        assert!(entry.rdev_is_set());
        assert!(!entry.birthtime_is_set());
    }

    #[test]
    fn test_copy_metadata_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        fs::write(&path, b"hello").unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 500);
        filetime::set_file_mtime(&path, mtime).unwrap();

        let mut entry = Entry::new();
        entry.copy_metadata(&fs::metadata(&path).unwrap());
        assert_eq!(entry.size(), 5);
        assert_eq!(entry.filetype(), AE_IFREG);
        assert_eq!(entry.mtime(), Timestamp::from_filetime(mtime));
        assert!(entry.atime_is_set());
    }

    #[test]
    fn test_copy_metadata_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = Entry::new();
        entry.copy_metadata(&fs::metadata(dir.path()).unwrap());
        assert_eq!(entry.filetype(), AE_IFDIR);
        assert_ne!(entry.filetype(), AE_IFLNK);
    }
}
