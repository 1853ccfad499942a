//! File types, permission strings and file flags.

/// Mask selecting the file type bits of a mode.
pub const AE_IFMT: u32 = 0o170000;
/// Regular file.
pub const AE_IFREG: u32 = 0o100000;
/// Symbolic link.
pub const AE_IFLNK: u32 = 0o120000;
/// Socket.
pub const AE_IFSOCK: u32 = 0o140000;
/// Character device.
pub const AE_IFCHR: u32 = 0o020000;
/// Block device.
pub const AE_IFBLK: u32 = 0o060000;
/// Directory.
pub const AE_IFDIR: u32 = 0o040000;
/// Named pipe.
pub const AE_IFIFO: u32 = 0o010000;

const S_ISUID: u32 = 0o4000;
const S_ISGID: u32 = 0o2000;
const S_ISVTX: u32 = 0o1000;

/// What a symbolic link points at, for platforms that distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SymlinkType {
    /// Unknown or irrelevant.
    #[default]
    Undefined,
    /// A file.
    File,
    /// A directory.
    Directory,
}

impl SymlinkType {
    /// Converts from the numeric form (0, 1, 2); other values are undefined.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => SymlinkType::File,
            2 => SymlinkType::Directory,
            _ => SymlinkType::Undefined,
        }
    }

    /// Returns the numeric form.
    pub fn as_raw(self) -> i32 {
        match self {
            SymlinkType::Undefined => 0,
            SymlinkType::File => 1,
            SymlinkType::Directory => 2,
        }
    }
}

/// Builds an `ls -l` style mode string: type, nine permission characters, space.
pub(crate) fn strmode(mode: u32, has_hardlink: bool) -> String {
    let mut out = *b"?rwxrwxrwx ";
    out[0] = match mode & AE_IFMT {
        AE_IFREG => b'-',
        AE_IFBLK => b'b',
        AE_IFCHR => b'c',
        AE_IFDIR => b'd',
        AE_IFLNK => b'l',
        AE_IFSOCK => b's',
        AE_IFIFO => b'p',
        _ if has_hardlink => b'h',
        _ => b'?',
    };
    for (i, slot) in out[1..10].iter_mut().enumerate() {
        if mode & (0o400 >> i) == 0 {
            *slot = b'-';
        }
    }
    if mode & S_ISUID != 0 {
        out[3] = if mode & 0o100 != 0 { b's' } else { b'S' };
    }
    if mode & S_ISGID != 0 {
        out[6] = if mode & 0o010 != 0 { b's' } else { b'S' };
    }
    if mode & S_ISVTX != 0 {
        out[9] = if mode & 0o001 != 0 { b't' } else { b'T' };
    }
    out.iter().map(|&b| char::from(b)).collect()
}

/// File flags to set and to clear when an entry is restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags {
    /// Flags to turn on.
    pub set: u64,
    /// Flags to turn off.
    pub clear: u64,
}

/// Linux inode flag bits (`FS_*_FL`).
mod bits {
    pub(super) const SECRM: u64 = 0x0000_0001;
    pub(super) const UNRM: u64 = 0x0000_0002;
    pub(super) const COMPR: u64 = 0x0000_0004;
    pub(super) const SYNC: u64 = 0x0000_0008;
    pub(super) const IMMUTABLE: u64 = 0x0000_0010;
    pub(super) const APPEND: u64 = 0x0000_0020;
    pub(super) const NODUMP: u64 = 0x0000_0040;
    pub(super) const NOATIME: u64 = 0x0000_0080;
    pub(super) const JOURNAL_DATA: u64 = 0x0000_4000;
    pub(super) const NOTAIL: u64 = 0x0000_8000;
    pub(super) const DIRSYNC: u64 = 0x0001_0000;
    pub(super) const TOPDIR: u64 = 0x0002_0000;
    pub(super) const NOCOW: u64 = 0x0080_0000;
    pub(super) const PROJINHERIT: u64 = 0x2000_0000;
}

/// (name that sets the bit, name that clears it, bit); first match names the bit.
const FLAG_NAMES: &[(&str, &str, u64)] = &[
    ("sappnd", "nosappnd", bits::APPEND),
    ("sappend", "nosappend", bits::APPEND),
    ("schg", "noschg", bits::IMMUTABLE),
    ("schange", "noschange", bits::IMMUTABLE),
    ("simmutable", "nosimmutable", bits::IMMUTABLE),
    ("nodump", "dump", bits::NODUMP),
    ("noatime", "atime", bits::NOATIME),
    ("compress", "nocompress", bits::COMPR),
    ("securedeletion", "nosecuredeletion", bits::SECRM),
    ("undel", "noundel", bits::UNRM),
    ("journal-data", "nojournal-data", bits::JOURNAL_DATA),
    ("sync", "nosync", bits::SYNC),
    ("dirsync", "nodirsync", bits::DIRSYNC),
    ("notail", "tail", bits::NOTAIL),
    ("topdir", "notopdir", bits::TOPDIR),
    ("nocow", "cow", bits::NOCOW),
    ("projinherit", "noprojinherit", bits::PROJINHERIT),
];

impl FileFlags {
    /// Renders the flags as comma-separated names, set flags first.
    ///
    /// Returns `None` when no flag is set or cleared.
    pub fn to_text(self) -> Option<String> {
        let mut names = Vec::new();
        let mut seen = 0u64;
        for &(set_name, _, bit) in FLAG_NAMES {
            if self.set & bit != 0 && seen & bit == 0 {
                names.push(set_name);
                seen |= bit;
            }
        }
        seen = 0;
        for &(_, clear_name, bit) in FLAG_NAMES {
            if self.clear & bit != 0 && seen & bit == 0 {
                names.push(clear_name);
                seen |= bit;
            }
        }
        (!names.is_empty()).then(|| names.join(","))
    }

    /// Parses comma- or space-separated names.
    ///
    /// Known names are applied even when others are not; the first unknown
    /// name is returned alongside the result.
    pub fn parse(text: &str) -> (Self, Option<&str>) {
        let mut flags = Self::default();
        let mut unknown = None;
        for token in text
            .split(|c: char| c == ',' || c.is_ascii_whitespace())
            .filter(|t| !t.is_empty())
        {
            if let Some(&(_, _, bit)) = FLAG_NAMES.iter().find(|(set, _, _)| *set == token) {
                flags.set |= bit;
                flags.clear &= !bit;
            } else if let Some(&(_, _, bit)) =
                FLAG_NAMES.iter().find(|(_, clear, _)| *clear == token)
            {
                flags.clear |= bit;
                flags.set &= !bit;
            } else if unknown.is_none() {
                unknown = Some(token);
            }
        }
        (flags, unknown)
    }
}
