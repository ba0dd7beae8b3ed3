//! The Tag object is an annotated tag: a named, signed pointer at another object (usually a
//! commit), distinct from a lightweight tag which is just a ref.
use std::fmt::Display;
use std::str::FromStr;

use bincode::{Decode, Encode};
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

#[derive(Eq, Debug, Clone, Serialize, Deserialize, Decode, Encode)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_hash: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Signature,
    pub message: String,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_hash)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        writeln!(f, "{}", self.tagger)?;
        write!(f, "\n{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_hash: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Signature,
        message: String,
    ) -> Tag {
        let mut tag = Tag {
            id: ObjectHash::default(),
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        };
        tag.id = ObjectHash::from_type_and_data(ObjectType::Tag, &tag.to_data().unwrap());
        tag
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut rest = data;

        let object_line_end = rest.find_byte(0x0a).ok_or(GitError::InvalidTagObject(
            "missing object line".to_string(),
        ))?;
        let object_hash = ObjectHash::from_str(
            rest[7..object_line_end] // "object "
                .to_str()
                .map_err(|e| GitError::ConversionError(e.to_string()))?,
        )
        .map_err(GitError::InvalidHashValue)?;
        rest = &rest[object_line_end + 1..];

        let type_line_end = rest
            .find_byte(0x0a)
            .ok_or(GitError::InvalidTagObject("missing type line".to_string()))?;
        let object_type = ObjectType::from_string(
            rest[5..type_line_end] // "type "
                .to_str()
                .map_err(|e| GitError::ConversionError(e.to_string()))?,
        )?;
        rest = &rest[type_line_end + 1..];

        let tag_line_end = rest
            .find_byte(0x0a)
            .ok_or(GitError::InvalidTagObject("missing tag line".to_string()))?;
        let tag_name = rest[4..tag_line_end] // "tag "
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?
            .to_string();
        rest = &rest[tag_line_end + 1..];

        let tagger_line_end = rest.find_byte(0x0a).ok_or(GitError::InvalidTagObject(
            "missing tagger line".to_string(),
        ))?;
        let tagger = Signature::from_data(rest[..tagger_line_end].to_vec())?;
        rest = &rest[tagger_line_end + 1..];

        // Skip the blank line separating the header from the message, if present.
        let message_start = if rest.first() == Some(&0x0a) { 1 } else { 0 };
        let message = rest[message_start..]
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?
            .to_string();

        Ok(Tag {
            id: hash,
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_hash.to_string().as_bytes());
        data.push(0x0a);
        data.extend(b"type ");
        data.extend(self.object_type.to_string().as_bytes());
        data.push(0x0a);
        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.push(0x0a);
        data.extend(self.tagger.to_data()?);
        data.push(0x0a);
        data.push(0x0a);
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::signature::SignatureType;

    #[test]
    fn test_tag_roundtrip() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let tagger = Signature::new(
            SignatureType::Tagger,
            "tester".to_string(),
            "tester@example.com".to_string(),
        );
        let tag = Tag::new(
            ObjectHash::new(b"some commit"),
            ObjectType::Commit,
            "v1.0.0".to_string(),
            tagger,
            "release v1.0.0\n".to_string(),
        );

        let data = tag.to_data().unwrap();
        let parsed = Tag::from_bytes(&data, tag.id).unwrap();
        assert_eq!(parsed.object_hash, tag.object_hash);
        assert_eq!(parsed.object_type, tag.object_type);
        assert_eq!(parsed.tag_name, tag.tag_name);
        assert_eq!(parsed.message, tag.message);
    }
}
