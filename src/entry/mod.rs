//! Archive entry metadata.
//!
//! An [`Entry`] describes one archive member: its path, link targets, owner,
//! mode, device numbers, size, timestamps, file flags, digests and
//! encryption flags. A read session fills one entry per header; a write
//! session takes an entry the application built.
//!
//! Every scalar field is tri-state (see [`Field`]): a format can declare a
//! field not applicable, leave it unset, or set it. Getters return a default
//! value for the first two states, so presence is checked separately with the
//! matching `*_is_set` method.
//!
//! # Example
//!
//! ```rust
//! use arcstream::{Entry, Timestamp};
//! use arcstream::entry::AE_IFREG;
//!
//! let mut entry = Entry::new();
//! entry.set_pathname("docs/readme.txt");
//! entry.set_filetype(AE_IFREG);
//! entry.set_perm(0o640);
//! entry.set_size(1024);
//! entry.set_mtime(Timestamp::new(1_700_000_000, 0));
//!
//! assert_eq!(entry.pathname_utf8(), Some("docs/readme.txt"));
//! assert_eq!(entry.strmode(), "-rw-r----- ");
//! assert!(entry.mtime_is_set());
//! assert!(!entry.atime_is_set());
//! assert_eq!(entry.atime(), Timestamp::default());
//! ```

mod mode;
mod stat;
mod timestamp;

pub use mode::{
    AE_IFBLK, AE_IFCHR, AE_IFDIR, AE_IFIFO, AE_IFLNK, AE_IFMT, AE_IFREG, AE_IFSOCK, FileFlags,
    SymlinkType,
};
pub use stat::Stat;
pub use timestamp::Timestamp;

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// One tri-state metadata field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    /// The archive format has no place for this field.
    NotApplicable,
    /// The format supports the field but no value is known.
    Unset,
    /// The field holds a value.
    Set(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unset
    }
}

impl<T> Field<T> {
    /// Returns the value, if set.
    pub fn get(&self) -> Option<&T> {
        match self {
            Field::Set(value) => Some(value),
            Field::NotApplicable | Field::Unset => None,
        }
    }

    /// Returns true if the field holds a value.
    pub fn is_set(&self) -> bool {
        matches!(self, Field::Set(_))
    }

    /// Returns the state without the value.
    pub fn state(&self) -> FieldState {
        match self {
            Field::NotApplicable => FieldState::NotApplicable,
            Field::Unset => FieldState::Unset,
            Field::Set(_) => FieldState::Set,
        }
    }

    fn set(&mut self, value: T) {
        *self = Field::Set(value);
    }

    fn unset(&mut self) {
        *self = Field::Unset;
    }
}

impl<T: Copy + Default> Field<T> {
    fn value(&self) -> T {
        self.get().copied().unwrap_or_default()
    }
}

/// The state of a [`Field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldState {
    /// See [`Field::NotApplicable`].
    NotApplicable,
    /// See [`Field::Unset`].
    Unset,
    /// See [`Field::Set`].
    Set,
}

/// Names a tri-state field of [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Attribute {
    Pathname,
    Sourcepath,
    Hardlink,
    Symlink,
    Uid,
    Uname,
    Gid,
    Gname,
    Filetype,
    Perm,
    Dev,
    Rdev,
    Ino,
    Nlink,
    Size,
    Atime,
    Mtime,
    Ctime,
    Birthtime,
    Fflags,
}

/// Digest algorithms an entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Digest {
    /// MD5, 16 bytes.
    Md5,
    /// RIPEMD-160, 20 bytes.
    Rmd160,
    /// SHA-1, 20 bytes.
    Sha1,
    /// SHA-256, 32 bytes.
    Sha256,
    /// SHA-384, 48 bytes.
    Sha384,
    /// SHA-512, 64 bytes.
    Sha512,
}

impl Digest {
    /// Converts from the numeric algorithm identifier (1 to 6).
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(Digest::Md5),
            2 => Some(Digest::Rmd160),
            3 => Some(Digest::Sha1),
            4 => Some(Digest::Sha256),
            5 => Some(Digest::Sha384),
            6 => Some(Digest::Sha512),
            _ => None,
        }
    }

    /// Returns the numeric algorithm identifier.
    pub fn as_raw(self) -> i32 {
        match self {
            Digest::Md5 => 1,
            Digest::Rmd160 => 2,
            Digest::Sha1 => 3,
            Digest::Sha256 => 4,
            Digest::Sha384 => 5,
            Digest::Sha512 => 6,
        }
    }

    /// Length of a digest value in bytes.
    pub fn len(self) -> usize {
        match self {
            Digest::Md5 => 16,
            Digest::Rmd160 | Digest::Sha1 => 20,
            Digest::Sha256 => 32,
            Digest::Sha384 => 48,
            Digest::Sha512 => 64,
        }
    }
}

// glibc's device number encoding.
fn makedev(major: u64, minor: u64) -> u64 {
    ((major & 0xffff_f000) << 32)
        | ((major & 0x0000_0fff) << 8)
        | ((minor & 0xffff_ff00) << 12)
        | (minor & 0x0000_00ff)
}

fn major(dev: u64) -> u64 {
    ((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff)
}

fn minor(dev: u64) -> u64 {
    ((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff)
}

fn as_utf8(bytes: Option<&Vec<u8>>) -> Option<&str> {
    bytes.and_then(|b| std::str::from_utf8(b).ok())
}

/// Metadata of one archive member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pathname: Field<Vec<u8>>,
    sourcepath: Field<Vec<u8>>,
    hardlink: Field<Vec<u8>>,
    symlink: Field<Vec<u8>>,
    symlink_type: SymlinkType,
    uid: Field<i64>,
    uname: Field<Vec<u8>>,
    gid: Field<i64>,
    gname: Field<Vec<u8>>,
    filetype: Field<u32>,
    perm: Field<u32>,
    dev: Field<u64>,
    rdev: Field<u64>,
    ino: Field<u64>,
    nlink: Field<u32>,
    size: Field<i64>,
    atime: Field<Timestamp>,
    mtime: Field<Timestamp>,
    ctime: Field<Timestamp>,
    birthtime: Field<Timestamp>,
    fflags: Field<FileFlags>,
    fflags_text: Option<String>,
    digests: BTreeMap<Digest, Vec<u8>>,
    data_encrypted: bool,
    metadata_encrypted: bool,
}

impl Entry {
    /// Creates an entry with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every field, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Returns the state of a field.
    pub fn field_state(&self, attribute: Attribute) -> FieldState {
        match attribute {
            Attribute::Pathname => self.pathname.state(),
            Attribute::Sourcepath => self.sourcepath.state(),
            Attribute::Hardlink => self.hardlink.state(),
            Attribute::Symlink => self.symlink.state(),
            Attribute::Uid => self.uid.state(),
            Attribute::Uname => self.uname.state(),
            Attribute::Gid => self.gid.state(),
            Attribute::Gname => self.gname.state(),
            Attribute::Filetype => self.filetype.state(),
            Attribute::Perm => self.perm.state(),
            Attribute::Dev => self.dev.state(),
            Attribute::Rdev => self.rdev.state(),
            Attribute::Ino => self.ino.state(),
            Attribute::Nlink => self.nlink.state(),
            Attribute::Size => self.size.state(),
            Attribute::Atime => self.atime.state(),
            Attribute::Mtime => self.mtime.state(),
            Attribute::Ctime => self.ctime.state(),
            Attribute::Birthtime => self.birthtime.state(),
            Attribute::Fflags => self.fflags.state(),
        }
    }

    /// Declares that the archive format has no place for a field.
    ///
    /// Any value the field held is dropped. Formats call this from
    /// `read_header`; a later setter makes the field applicable again.
    pub fn mark_inapplicable(&mut self, attribute: Attribute) {
        match attribute {
            Attribute::Pathname => self.pathname = Field::NotApplicable,
            Attribute::Sourcepath => self.sourcepath = Field::NotApplicable,
            Attribute::Hardlink => self.hardlink = Field::NotApplicable,
            Attribute::Symlink => self.symlink = Field::NotApplicable,
            Attribute::Uid => self.uid = Field::NotApplicable,
            Attribute::Uname => self.uname = Field::NotApplicable,
            Attribute::Gid => self.gid = Field::NotApplicable,
            Attribute::Gname => self.gname = Field::NotApplicable,
            Attribute::Filetype => self.filetype = Field::NotApplicable,
            Attribute::Perm => self.perm = Field::NotApplicable,
            Attribute::Dev => self.dev = Field::NotApplicable,
            Attribute::Rdev => self.rdev = Field::NotApplicable,
            Attribute::Ino => self.ino = Field::NotApplicable,
            Attribute::Nlink => self.nlink = Field::NotApplicable,
            Attribute::Size => self.size = Field::NotApplicable,
            Attribute::Atime => self.atime = Field::NotApplicable,
            Attribute::Mtime => self.mtime = Field::NotApplicable,
            Attribute::Ctime => self.ctime = Field::NotApplicable,
            Attribute::Birthtime => self.birthtime = Field::NotApplicable,
            Attribute::Fflags => {
                self.fflags = Field::NotApplicable;
                self.fflags_text = None;
            }
        }
    }

    // Paths and names

    /// Path of the entry within the archive, as raw bytes.
    pub fn pathname(&self) -> Option<&[u8]> {
        self.pathname.get().map(Vec::as_slice)
    }

    /// Path of the entry, if it is valid UTF-8.
    pub fn pathname_utf8(&self) -> Option<&str> {
        as_utf8(self.pathname.get())
    }

    /// Sets the path.
    pub fn set_pathname(&mut self, pathname: impl Into<Vec<u8>>) {
        self.pathname.set(pathname.into());
    }

    /// Clears the path.
    pub fn unset_pathname(&mut self) {
        self.pathname.unset();
    }

    /// Path of the file on disk the entry was built from.
    pub fn sourcepath(&self) -> Option<&[u8]> {
        self.sourcepath.get().map(Vec::as_slice)
    }

    /// Sets the source path.
    pub fn set_sourcepath(&mut self, sourcepath: impl Into<Vec<u8>>) {
        self.sourcepath.set(sourcepath.into());
    }

    /// Target of a hard link, as raw bytes.
    pub fn hardlink(&self) -> Option<&[u8]> {
        self.hardlink.get().map(Vec::as_slice)
    }

    /// Target of a hard link, if it is valid UTF-8.
    pub fn hardlink_utf8(&self) -> Option<&str> {
        as_utf8(self.hardlink.get())
    }

    /// Returns true if the entry is a hard link.
    pub fn hardlink_is_set(&self) -> bool {
        self.hardlink.is_set()
    }

    /// Makes the entry a hard link to `target`.
    pub fn set_hardlink(&mut self, target: impl Into<Vec<u8>>) {
        self.hardlink.set(target.into());
    }

    /// Clears the hard link target.
    pub fn unset_hardlink(&mut self) {
        self.hardlink.unset();
    }

    /// Target of a symbolic link, as raw bytes.
    pub fn symlink(&self) -> Option<&[u8]> {
        self.symlink.get().map(Vec::as_slice)
    }

    /// Target of a symbolic link, if it is valid UTF-8.
    pub fn symlink_utf8(&self) -> Option<&str> {
        as_utf8(self.symlink.get())
    }

    /// Returns true if the entry has a symbolic link target.
    pub fn symlink_is_set(&self) -> bool {
        self.symlink.is_set()
    }

    /// Sets the symbolic link target.
    pub fn set_symlink(&mut self, target: impl Into<Vec<u8>>) {
        self.symlink.set(target.into());
    }

    /// Clears the symbolic link target.
    pub fn unset_symlink(&mut self) {
        self.symlink.unset();
    }

    /// Sets the symbolic link target if one is set, the hard link target otherwise.
    pub fn set_link(&mut self, target: impl Into<Vec<u8>>) {
        if self.symlink.is_set() {
            self.symlink.set(target.into());
        } else {
            self.hardlink.set(target.into());
        }
    }

    /// What the symbolic link points at.
    pub fn symlink_type(&self) -> SymlinkType {
        self.symlink_type
    }

    /// Sets what the symbolic link points at.
    pub fn set_symlink_type(&mut self, symlink_type: SymlinkType) {
        self.symlink_type = symlink_type;
    }

    // Ownership

    /// Owner user id; 0 when unset.
    pub fn uid(&self) -> i64 {
        self.uid.value()
    }

    /// Returns true if the owner user id is set.
    pub fn uid_is_set(&self) -> bool {
        self.uid.is_set()
    }

    /// Sets the owner user id.
    pub fn set_uid(&mut self, uid: i64) {
        self.uid.set(uid);
    }

    /// Owner user name, as raw bytes.
    pub fn uname(&self) -> Option<&[u8]> {
        self.uname.get().map(Vec::as_slice)
    }

    /// Owner user name, if it is valid UTF-8.
    pub fn uname_utf8(&self) -> Option<&str> {
        as_utf8(self.uname.get())
    }

    /// Sets the owner user name.
    pub fn set_uname(&mut self, uname: impl Into<Vec<u8>>) {
        self.uname.set(uname.into());
    }

    /// Clears the owner user name.
    pub fn unset_uname(&mut self) {
        self.uname.unset();
    }

    /// Group id; 0 when unset.
    pub fn gid(&self) -> i64 {
        self.gid.value()
    }

    /// Returns true if the group id is set.
    pub fn gid_is_set(&self) -> bool {
        self.gid.is_set()
    }

    /// Sets the group id.
    pub fn set_gid(&mut self, gid: i64) {
        self.gid.set(gid);
    }

    /// Group name, as raw bytes.
    pub fn gname(&self) -> Option<&[u8]> {
        self.gname.get().map(Vec::as_slice)
    }

    /// Group name, if it is valid UTF-8.
    pub fn gname_utf8(&self) -> Option<&str> {
        as_utf8(self.gname.get())
    }

    /// Sets the group name.
    pub fn set_gname(&mut self, gname: impl Into<Vec<u8>>) {
        self.gname.set(gname.into());
    }

    /// Clears the group name.
    pub fn unset_gname(&mut self) {
        self.gname.unset();
    }

    // Type and permissions

    /// File type bits (one of the `AE_IF*` constants); 0 when unset.
    pub fn filetype(&self) -> u32 {
        self.filetype.value()
    }

    /// Returns true if the file type is set.
    pub fn filetype_is_set(&self) -> bool {
        self.filetype.is_set()
    }

    /// Sets the file type; bits outside [`AE_IFMT`] are ignored.
    pub fn set_filetype(&mut self, filetype: u32) {
        self.filetype.set(filetype & AE_IFMT);
    }

    /// Permission bits, including setuid, setgid and sticky; 0 when unset.
    pub fn perm(&self) -> u32 {
        self.perm.value()
    }

    /// Returns true if the permissions are set.
    pub fn perm_is_set(&self) -> bool {
        self.perm.is_set()
    }

    /// Sets the permission bits; type bits are ignored.
    pub fn set_perm(&mut self, perm: u32) {
        self.perm.set(perm & !AE_IFMT);
    }

    /// The full mode: file type and permissions.
    pub fn mode(&self) -> u32 {
        self.filetype() | self.perm()
    }

    /// Sets both the file type and the permissions from a full mode.
    pub fn set_mode(&mut self, mode: u32) {
        self.set_filetype(mode);
        self.set_perm(mode);
    }

    /// Renders the mode like `ls -l`, for example `"drwxr-xr-x "`.
    ///
    /// The type character is `h` for a hard link whose type is unknown.
    pub fn strmode(&self) -> String {
        mode::strmode(self.mode(), self.hardlink.is_set())
    }

    // Device numbers

    /// Device holding the file; 0 when unset.
    pub fn dev(&self) -> u64 {
        self.dev.value()
    }

    /// Returns true if the device is set.
    pub fn dev_is_set(&self) -> bool {
        self.dev.is_set()
    }

    /// Sets the device.
    pub fn set_dev(&mut self, dev: u64) {
        self.dev.set(dev);
    }

    /// Major number of [`dev`](Self::dev).
    pub fn devmajor(&self) -> u64 {
        major(self.dev())
    }

    /// Minor number of [`dev`](Self::dev).
    pub fn devminor(&self) -> u64 {
        minor(self.dev())
    }

    /// Replaces the major number of the device.
    pub fn set_devmajor(&mut self, value: u64) {
        self.dev.set(makedev(value, minor(self.dev())));
    }

    /// Replaces the minor number of the device.
    pub fn set_devminor(&mut self, value: u64) {
        self.dev.set(makedev(major(self.dev()), value));
    }

    /// Device a special file represents; 0 when unset.
    pub fn rdev(&self) -> u64 {
        self.rdev.value()
    }

    /// Returns true if the represented device is set.
    pub fn rdev_is_set(&self) -> bool {
        self.rdev.is_set()
    }

    /// Sets the represented device.
    pub fn set_rdev(&mut self, rdev: u64) {
        self.rdev.set(rdev);
    }

    /// Major number of [`rdev`](Self::rdev).
    pub fn rdevmajor(&self) -> u64 {
        major(self.rdev())
    }

    /// Minor number of [`rdev`](Self::rdev).
    pub fn rdevminor(&self) -> u64 {
        minor(self.rdev())
    }

    /// Replaces the major number of the represented device.
    pub fn set_rdevmajor(&mut self, value: u64) {
        self.rdev.set(makedev(value, minor(self.rdev())));
    }

    /// Replaces the minor number of the represented device.
    pub fn set_rdevminor(&mut self, value: u64) {
        self.rdev.set(makedev(major(self.rdev()), value));
    }

    // Inode, links and size

    /// Inode number; 0 when unset.
    pub fn ino(&self) -> u64 {
        self.ino.value()
    }

    /// Returns true if the inode number is set.
    pub fn ino_is_set(&self) -> bool {
        self.ino.is_set()
    }

    /// Sets the inode number.
    pub fn set_ino(&mut self, ino: u64) {
        self.ino.set(ino);
    }

    /// Hard link count; 0 when unset.
    pub fn nlink(&self) -> u32 {
        self.nlink.value()
    }

    /// Sets the hard link count.
    pub fn set_nlink(&mut self, nlink: u32) {
        self.nlink.set(nlink);
    }

    /// Data size in bytes; 0 when unset.
    pub fn size(&self) -> i64 {
        self.size.value()
    }

    /// Returns true if the size is known.
    pub fn size_is_set(&self) -> bool {
        self.size.is_set()
    }

    /// Sets the size.
    pub fn set_size(&mut self, size: i64) {
        self.size.set(size);
    }

    /// Marks the size as unknown.
    pub fn unset_size(&mut self) {
        self.size.unset();
    }

    // Timestamps

    /// Last access time; the epoch when unset.
    pub fn atime(&self) -> Timestamp {
        self.atime.value()
    }

    /// Returns true if the access time is set.
    pub fn atime_is_set(&self) -> bool {
        self.atime.is_set()
    }

    /// Sets the access time.
    pub fn set_atime(&mut self, time: Timestamp) {
        self.atime.set(time);
    }

    /// Clears the access time.
    pub fn unset_atime(&mut self) {
        self.atime.unset();
    }

    /// Last modification time; the epoch when unset.
    pub fn mtime(&self) -> Timestamp {
        self.mtime.value()
    }

    /// Returns true if the modification time is set.
    pub fn mtime_is_set(&self) -> bool {
        self.mtime.is_set()
    }

    /// Sets the modification time.
    pub fn set_mtime(&mut self, time: Timestamp) {
        self.mtime.set(time);
    }

    /// Clears the modification time.
    pub fn unset_mtime(&mut self) {
        self.mtime.unset();
    }

    /// Last status change time; the epoch when unset.
    pub fn ctime(&self) -> Timestamp {
        self.ctime.value()
    }

    /// Returns true if the status change time is set.
    pub fn ctime_is_set(&self) -> bool {
        self.ctime.is_set()
    }

    /// Sets the status change time.
    pub fn set_ctime(&mut self, time: Timestamp) {
        self.ctime.set(time);
    }

    /// Clears the status change time.
    pub fn unset_ctime(&mut self) {
        self.ctime.unset();
    }

    /// Creation time; the epoch when unset.
    pub fn birthtime(&self) -> Timestamp {
        self.birthtime.value()
    }

    /// Returns true if the creation time is set.
    pub fn birthtime_is_set(&self) -> bool {
        self.birthtime.is_set()
    }

    /// Sets the creation time.
    pub fn set_birthtime(&mut self, time: Timestamp) {
        self.birthtime.set(time);
    }

    /// Clears the creation time.
    pub fn unset_birthtime(&mut self) {
        self.birthtime.unset();
    }

    // File flags

    /// File flags to set and clear; both empty when unset.
    pub fn fflags(&self) -> FileFlags {
        self.fflags.value()
    }

    /// Sets the file flags from bitmasks.
    pub fn set_fflags(&mut self, set: u64, clear: u64) {
        self.fflags.set(FileFlags { set, clear });
        self.fflags_text = None;
    }

    /// File flags as text, such as `"nodump,uappnd"`.
    ///
    /// Text given to [`set_fflags_text`](Self::set_fflags_text) is returned
    /// as given; otherwise the text is built from the bitmasks.
    pub fn fflags_text(&self) -> Option<String> {
        match &self.fflags_text {
            Some(text) => Some(text.clone()),
            None => self.fflags.get().and_then(|flags| flags.to_text()),
        }
    }

    /// Sets the file flags from text and returns the first unknown name.
    ///
    /// Known names take effect even when the text also has unknown ones.
    pub fn set_fflags_text<'t>(&mut self, text: &'t str) -> Option<&'t str> {
        let (flags, unknown) = FileFlags::parse(text);
        self.fflags.set(flags);
        self.fflags_text = Some(text.to_string());
        unknown
    }

    // Digests

    /// Returns the stored digest for an algorithm.
    pub fn digest(&self, algorithm: Digest) -> Option<&[u8]> {
        self.digests.get(&algorithm).map(Vec::as_slice)
    }

    /// Stores a digest; its length must match the algorithm.
    pub fn set_digest(&mut self, algorithm: Digest, value: &[u8]) -> Result<()> {
        if value.len() != algorithm.len() {
            return Err(Error::InvalidArgument(format!(
                "{:?} digest must be {} bytes, got {}",
                algorithm,
                algorithm.len(),
                value.len()
            )));
        }
        self.digests.insert(algorithm, value.to_vec());
        Ok(())
    }

    // Encryption

    /// Returns true if the entry's data is encrypted.
    pub fn is_data_encrypted(&self) -> bool {
        self.data_encrypted
    }

    /// Returns true if the entry's metadata is encrypted.
    pub fn is_metadata_encrypted(&self) -> bool {
        self.metadata_encrypted
    }

    /// Returns true if either the data or the metadata is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.data_encrypted || self.metadata_encrypted
    }

    /// Marks the data as encrypted or not.
    pub fn set_data_encrypted(&mut self, encrypted: bool) {
        self.data_encrypted = encrypted;
    }

    /// Marks the metadata as encrypted or not.
    pub fn set_metadata_encrypted(&mut self, encrypted: bool) {
        self.metadata_encrypted = encrypted;
    }
}
