//! Object type enumeration shared by the pack and object-model layers.

use std::fmt::Display;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// In Git, each object type is assigned a unique integer value, which is used to identify the
/// type of the object in Git repositories.
///
/// * `Commit` (1): a commit, recording author/committer/tree/parents/message.
/// * `Tree` (2): a directory listing of other trees and blobs.
/// * `Blob` (3): the content of a file.
/// * `Tag` (4): an annotated tag pointing at another object.
/// * `OffsetDelta` (6): a delta object whose base is addressed by a negative offset in the
///   same pack.
/// * `HashDelta` (7): a delta object whose base is addressed by the base object's hash
///   (git calls this `ref-delta`).
///
/// Values 1-4 and 6-7 match the type field git itself writes into a packfile's variable-length
/// type+size header; `5` is reserved by the format and not assigned to anything here.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize, Decode, Encode)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
    OffsetDelta = 6,
    HashDelta,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "OffsetDelta"),
            ObjectType::HashDelta => write!(f, "HashDelta"),
        }
    }
}

impl ObjectType {
    /// Convert object type to the 3-bit pack header type id.
    pub fn to_pack_type_u8(&self) -> Result<u8, GitError> {
        match self {
            ObjectType::Commit => Ok(1),
            ObjectType::Tree => Ok(2),
            ObjectType::Blob => Ok(3),
            ObjectType::Tag => Ok(4),
            ObjectType::OffsetDelta => Ok(6),
            ObjectType::HashDelta => Ok(7),
        }
    }

    /// Decode 3-bit pack header type id to object type.
    pub fn from_pack_type_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::HashDelta),
            _ => Err(GitError::InvalidObjectType(format!(
                "Invalid pack object type number: {number}"
            ))),
        }
    }

    /// ASCII type name as used in the loose-object header (`"blob"`, `"tree"`, ...).
    /// Delta types have no loose-object representation and return an error.
    pub fn to_bytes(&self) -> Result<&'static [u8], GitError> {
        match self {
            ObjectType::Commit => Ok(COMMIT_OBJECT_TYPE),
            ObjectType::Tree => Ok(TREE_OBJECT_TYPE),
            ObjectType::Blob => Ok(BLOB_OBJECT_TYPE),
            ObjectType::Tag => Ok(TAG_OBJECT_TYPE),
            ObjectType::OffsetDelta | ObjectType::HashDelta => Err(GitError::InvalidObjectType(
                format!("delta type `{}` has no loose-object header", self),
            )),
        }
    }

    /// Parses the ASCII type name used in loose-object headers and commit parent/tree lines.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(GitError::InvalidObjectType(s.to_string())),
        }
    }

    /// Convert an object type to its ASCII type-name bytes (owned).
    pub fn to_data(self) -> Result<Vec<u8>, GitError> {
        self.to_bytes().map(|b| b.to_vec())
    }

    /// Convert an object type to a number (same as the pack header type id for base
    /// objects, extended to cover delta records).
    pub fn to_u8(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
            ObjectType::OffsetDelta => 6,
            ObjectType::HashDelta => 7,
        }
    }

    /// Convert a number to an object type.
    pub fn from_u8(number: u8) -> Result<ObjectType, GitError> {
        Self::from_pack_type_u8(number)
    }

    /// Whether this type is a fully materialized object (as opposed to a delta record
    /// that still needs its base resolved).
    pub fn is_base(&self) -> bool {
        !matches!(self, ObjectType::OffsetDelta | ObjectType::HashDelta)
    }
}

#[cfg(test)]
mod tests {
    use crate::internal::object::types::ObjectType;

    /// Verify ObjectType::Blob converts to its ASCII byte representation "blob".
    #[test]
    fn test_object_type_to_data() {
        let blob = ObjectType::Blob;
        let blob_bytes = blob.to_data().unwrap();
        assert_eq!(blob_bytes, b"blob".to_vec());
    }

    /// Verify parsing "tree" string returns ObjectType::Tree.
    #[test]
    fn test_object_type_from_string() {
        assert_eq!(ObjectType::from_string("blob").unwrap(), ObjectType::Blob);
        assert_eq!(ObjectType::from_string("tree").unwrap(), ObjectType::Tree);
        assert_eq!(
            ObjectType::from_string("commit").unwrap(),
            ObjectType::Commit
        );
        assert_eq!(ObjectType::from_string("tag").unwrap(), ObjectType::Tag);
        assert!(ObjectType::from_string("invalid_type").is_err());
    }

    /// Verify ObjectType::Commit converts to pack type number 1.
    #[test]
    fn test_object_type_to_u8() {
        let commit = ObjectType::Commit;
        assert_eq!(commit.to_u8(), 1);
    }

    /// Verify pack type number 4 parses to ObjectType::Tag.
    #[test]
    fn test_object_type_from_u8() {
        assert_eq!(ObjectType::from_u8(4).unwrap(), ObjectType::Tag);
    }

    /// Delta types cannot be rendered as a loose-object header.
    #[test]
    fn test_delta_type_has_no_bytes() {
        assert!(ObjectType::OffsetDelta.to_bytes().is_err());
        assert!(ObjectType::HashDelta.to_bytes().is_err());
    }

    /// is_base distinguishes fully materialized objects from delta records.
    #[test]
    fn test_is_base() {
        assert!(ObjectType::Blob.is_base());
        assert!(!ObjectType::OffsetDelta.is_base());
        assert!(!ObjectType::HashDelta.is_base());
    }
}
