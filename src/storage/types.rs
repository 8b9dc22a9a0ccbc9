//! core type-safe wrappers for object ids, object kinds and reference names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// number of raw bytes in a SHA-1 object id
pub const OBJECT_ID_LENGTH: usize = 20;

/// number of hex characters in a SHA-1 object id
pub const OBJECT_ID_HEX_LENGTH: usize = OBJECT_ID_LENGTH * 2;

/// A content address: the SHA-1 of an object's header and payload.
///
/// Stored in the `objects` table as 40 lowercase hex characters. Ids are
/// only ever produced by hashing (see [`crate::storage::hashing`]) or by
/// parsing a full hex string read back from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectId([u8; OBJECT_ID_LENGTH]);

impl ObjectId {
    /// wrap a raw digest
    pub fn from_bytes(bytes: [u8; OBJECT_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// parse a full 40-character hex id (either case)
    pub fn from_hex(hex: &str) -> Result<Self, InvalidIdError> {
        if hex.len() != OBJECT_ID_HEX_LENGTH {
            return Err(InvalidIdError::WrongLength(hex.len()));
        }
        if let Some((position, char)) = hex.chars().enumerate().find(|(_, c)| !c.is_ascii_hexdigit()) {
            return Err(InvalidIdError::InvalidCharacter { char, position });
        }

        let mut bytes = [0u8; OBJECT_ID_LENGTH];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|_| InvalidIdError::WrongLength(hex.len()))?;
        Ok(Self(bytes))
    }

    /// the all-zero id git uses for "no object"
    pub fn zero() -> Self {
        Self([0u8; OBJECT_ID_LENGTH])
    }

    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LENGTH] {
        &self.0
    }

    /// lowercase hex form, as stored in the `hash` column
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = InvalidIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_hex()
    }
}

impl TryFrom<String> for ObjectId {
    type Error = InvalidIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<git2::Oid> for ObjectId {
    fn from(oid: git2::Oid) -> Self {
        let mut bytes = [0u8; OBJECT_ID_LENGTH];
        bytes.copy_from_slice(oid.as_bytes());
        Self(bytes)
    }
}

/// A hex prefix of an object id, used for abbreviated-hash lookups.
///
/// Stored hashes are lowercase hex, so the prefix is lowercased on
/// construction; anything outside `[0-9a-fA-F]` is rejected. The empty
/// prefix is valid and matches every id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbbreviatedObjectId(String);

impl AbbreviatedObjectId {
    pub fn new(prefix: impl Into<String>) -> Result<Self, InvalidIdError> {
        let prefix = prefix.into().to_ascii_lowercase();
        if prefix.len() > OBJECT_ID_HEX_LENGTH {
            return Err(InvalidIdError::WrongLength(prefix.len()));
        }
        for (position, char) in prefix.chars().enumerate() {
            if !matches!(char, '0'..='9' | 'a'..='f') {
                return Err(InvalidIdError::InvalidCharacter { char, position });
            }
        }
        Ok(Self(prefix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// true when the abbreviation is actually a full id
    pub fn is_complete(&self) -> bool {
        self.0.len() == OBJECT_ID_HEX_LENGTH
    }
}

impl fmt::Display for AbbreviatedObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&ObjectId> for AbbreviatedObjectId {
    fn from(id: &ObjectId) -> Self {
        Self(id.to_hex())
    }
}

/// The kind of a stored object, using git's numeric type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// numeric code stored in the `type` column
    pub fn code(self) -> i64 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }

    /// name used in the object header (`"blob 12\0"`)
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "commit" => Some(Self::Commit),
            "tree" => Some(Self::Tree),
            "blob" => Some(Self::Blob),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }

    pub(crate) fn from_git2(kind: git2::ObjectType) -> Option<Self> {
        match kind {
            git2::ObjectType::Commit => Some(Self::Commit),
            git2::ObjectType::Tree => Some(Self::Tree),
            git2::ObjectType::Blob => Some(Self::Blob),
            git2::ObjectType::Tag => Some(Self::Tag),
            _ => None,
        }
    }

    pub(crate) fn to_git2(self) -> git2::ObjectType {
        match self {
            Self::Commit => git2::ObjectType::Commit,
            Self::Tree => git2::ObjectType::Tree,
            Self::Blob => git2::ObjectType::Blob,
            Self::Tag => git2::ObjectType::Tag,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// A validated reference name such as `HEAD` or `refs/heads/main`.
///
/// Git is more permissive in places but we reject the shapes that can
/// never be stored as a loose ref on any platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefName(String);

impl RefName {
    /// the well-known head pointer
    pub const HEAD: &'static str = "HEAD";

    /// namespace prefix for branches
    pub const R_HEADS: &'static str = "refs/heads/";

    const MAX_LENGTH: usize = 512;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        for (i, c) in name.chars().enumerate() {
            if c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if name.contains("..")
            || name.contains("//")
            || name.contains("@{")
            || name.starts_with('/')
            || name.ends_with('/')
            || name.ends_with('.')
            || name.ends_with(".lock")
        {
            return Err(InvalidNameError::InvalidPath(name.to_string()));
        }

        Ok(())
    }

    /// full ref name of a branch (e.g. `main` -> `refs/heads/main`)
    pub fn branch(short: &str) -> Result<Self, InvalidNameError> {
        Self::new(format!("{}{}", Self::R_HEADS, short))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// error type for malformed object ids and abbreviations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidIdError {
    WrongLength(usize),
    InvalidCharacter { char: char, position: usize },
}

impl fmt::Display for InvalidIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength(len) => write!(f, "invalid object id length: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid hex character '{}' at position {}", char, position)
            }
        }
    }
}

impl std::error::Error for InvalidIdError {}

/// error type for invalid reference names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ce013625030ba8dba906f756967f9e9ca394464a";

    #[test]
    fn test_object_id_hex() {
        let id = ObjectId::from_hex(SAMPLE).unwrap();
        assert_eq!(id.to_hex(), SAMPLE);
        assert_eq!(id.to_string(), SAMPLE);

        // uppercase input is normalised
        let upper = ObjectId::from_hex(&SAMPLE.to_uppercase()).unwrap();
        assert_eq!(upper, id);
    }

    #[test]
    fn test_object_id_invalid() {
        assert_eq!(ObjectId::from_hex("abc"), Err(InvalidIdError::WrongLength(3)));
        let bad = format!("{}z", &SAMPLE[..39]);
        assert!(matches!(
            ObjectId::from_hex(&bad),
            Err(InvalidIdError::InvalidCharacter { char: 'z', position: 39 })
        ));
    }

    #[test]
    fn test_object_id_serde() {
        let id = ObjectId::from_hex(SAMPLE).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", SAMPLE));
        let back: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_object_id_from_git2() {
        let oid = git2::Oid::from_str(SAMPLE).unwrap();
        assert_eq!(ObjectId::from(oid).to_hex(), SAMPLE);
    }

    #[test]
    fn test_abbreviation() {
        let id = ObjectId::from_hex(SAMPLE).unwrap();
        assert_eq!(AbbreviatedObjectId::new("CE01").unwrap().as_str(), "ce01");
        assert!(AbbreviatedObjectId::new("").unwrap().is_empty());
        assert!(AbbreviatedObjectId::new("ce0%").is_err());
        assert!(AbbreviatedObjectId::new("a".repeat(41)).is_err());
        assert!(AbbreviatedObjectId::from(&id).is_complete());
    }

    #[test]
    fn test_object_kind_codes() {
        for kind in [ObjectKind::Commit, ObjectKind::Tree, ObjectKind::Blob, ObjectKind::Tag] {
            assert_eq!(ObjectKind::from_code(kind.code()), Some(kind));
            assert_eq!(ObjectKind::from_type_name(kind.type_name()), Some(kind));
            assert_eq!(ObjectKind::from_git2(kind.to_git2()), Some(kind));
        }
        assert_eq!(ObjectKind::from_code(0), None);
        assert_eq!(ObjectKind::from_code(7), None);
        assert_eq!(ObjectKind::Blob.code(), 3);
    }

    #[test]
    fn test_ref_name_valid() {
        assert!(RefName::new("HEAD").is_ok());
        assert!(RefName::new("refs/heads/main").is_ok());
        assert!(RefName::new("refs/heads/feature/x-1").is_ok());
        assert!(RefName::new("refs/tags/v1.0").is_ok());
    }

    #[test]
    fn test_ref_name_invalid() {
        assert_eq!(RefName::new(""), Err(InvalidNameError::Empty));
        assert!(RefName::new("refs/heads/a..b").is_err());
        assert!(RefName::new("refs/heads/").is_err());
        assert!(RefName::new("/refs/heads/main").is_err());
        assert!(RefName::new("refs/heads/main.lock").is_err());
        assert!(RefName::new("refs/heads/has space").is_err());
        assert!(RefName::new("refs/heads/a:b").is_err());
        assert!(RefName::new("r".repeat(513)).is_err());
    }

    #[test]
    fn test_ref_name_helpers() {
        let branch = RefName::branch("main").unwrap();
        assert_eq!(branch.as_str(), "refs/heads/main");
        assert!(RefName::branch("bad name").is_err());
    }
}
