use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// One attribute a match key can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMode {
    Hash,
    /// Chunk hashes of the first MiB.
    HashBegin1Mb,
    FileSize,
    Created,
    ModifiedMillis,
    ModifiedSec,
    RefInode,
    /// Prefix, run root and relative directory. No filename.
    FullPath,
    FullPathExclPrefix,
    /// Full directory with the first matching configured relative root removed.
    RelPath,
    /// Directory relative to the run root.
    RelPath2,
    Filename,
}

impl MatchMode {
    pub const ALL: [MatchMode; 12] = [
        MatchMode::Hash,
        MatchMode::HashBegin1Mb,
        MatchMode::FileSize,
        MatchMode::Created,
        MatchMode::ModifiedMillis,
        MatchMode::ModifiedSec,
        MatchMode::RefInode,
        MatchMode::FullPath,
        MatchMode::FullPathExclPrefix,
        MatchMode::RelPath,
        MatchMode::RelPath2,
        MatchMode::Filename,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn name(self) -> &'static str {
        match self {
            MatchMode::Hash => "HASH",
            MatchMode::HashBegin1Mb => "HASH_BEGIN_1MB",
            MatchMode::FileSize => "FILE_SIZE",
            MatchMode::Created => "CREATED",
            MatchMode::ModifiedMillis => "MODIFIED_MILLIS",
            MatchMode::ModifiedSec => "MODIFIED_SEC",
            MatchMode::RefInode => "REF_INODE",
            MatchMode::FullPath => "FULL_PATH",
            MatchMode::FullPathExclPrefix => "FULL_PATH_EXCL_PREFIX",
            MatchMode::RelPath => "REL_PATH",
            MatchMode::RelPath2 => "REL_PATH2",
            MatchMode::Filename => "FILENAME",
        }
    }
}

/// A set of [`MatchMode`]s, built with `|`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MatchModes(u16);

impl MatchModes {
    pub const fn empty() -> Self {
        MatchModes(0)
    }

    pub fn contains(self, mode: MatchMode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn with(self, mode: MatchMode) -> Self {
        MatchModes(self.0 | mode.bit())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = MatchMode> {
        MatchMode::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl From<MatchMode> for MatchModes {
    fn from(mode: MatchMode) -> Self {
        MatchModes(mode.bit())
    }
}

impl BitOr for MatchMode {
    type Output = MatchModes;

    fn bitor(self, rhs: MatchMode) -> MatchModes {
        MatchModes::from(self).with(rhs)
    }
}

impl BitOr<MatchMode> for MatchModes {
    type Output = MatchModes;

    fn bitor(self, rhs: MatchMode) -> MatchModes {
        self.with(rhs)
    }
}

impl BitOr for MatchModes {
    type Output = MatchModes;

    fn bitor(self, rhs: MatchModes) -> MatchModes {
        MatchModes(self.0 | rhs.0)
    }
}

impl fmt::Display for MatchModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(MatchMode::name).collect();
        write!(f, "{}", names.join("+"))
    }
}

impl fmt::Debug for MatchModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchModes({})", self)
    }
}

impl FromStr for MatchModes {
    type Err = String;

    /// Parses `HASH+FILE_SIZE` style lists. Names are case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut modes = MatchModes::empty();
        for part in s.split(['+', ',']).map(str::trim).filter(|p| !p.is_empty()) {
            let mode = MatchMode::ALL
                .into_iter()
                .find(|m| m.name().eq_ignore_ascii_case(part))
                .ok_or_else(|| format!("unknown match mode '{}'", part))?;
            modes = modes.with(mode);
        }
        if modes.is_empty() {
            return Err("no match mode given".to_string());
        }
        Ok(modes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_and_display() {
        let modes = MatchMode::FileSize | MatchMode::Hash | MatchMode::Filename;
        assert!(modes.contains(MatchMode::Hash));
        assert!(!modes.contains(MatchMode::Created));
        assert_eq!(modes.to_string(), "HASH+FILE_SIZE+FILENAME");
    }

    #[test]
    fn test_parse() {
        let modes: MatchModes = "hash+file_size".parse().unwrap();
        assert_eq!(modes, MatchMode::Hash | MatchMode::FileSize);
        assert!("HASH+NOPE".parse::<MatchModes>().is_err());
        assert!("".parse::<MatchModes>().is_err());
    }
}
