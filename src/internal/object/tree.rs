//! The Tree object represents a directory listing: an ordered set of (mode, name, hash) entries
//! pointing at blobs (files), other trees (subdirectories), or commits (submodules).
use std::fmt::Display;

use bincode::{Decode, Encode};
use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::{ObjectHash, get_hash_kind};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// The Unix file mode recorded alongside each tree entry, written as ASCII octal in the
/// tree's binary encoding (e.g. `100644`, `40000`).
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize, Decode, Encode)]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl TreeItemMode {
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    /// Parse the ASCII-octal mode bytes used in a tree's binary encoding.
    pub fn tree_item_type_from_bytes(mode: &[u8]) -> Result<TreeItemMode, GitError> {
        match mode {
            b"040000" | b"40000" => Ok(TreeItemMode::Tree),
            b"100644" => Ok(TreeItemMode::Blob),
            b"100755" => Ok(TreeItemMode::BlobExecutable),
            b"120000" => Ok(TreeItemMode::Link),
            b"160000" => Ok(TreeItemMode::Commit),
            _ => Err(GitError::InvalidTreeItem(format!(
                "invalid tree entry mode: {:?}",
                mode
            ))),
        }
    }
}

/// A single entry in a tree: the mode, the hash of the object it points at, and its name
/// within this directory.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Serialize, Deserialize, Decode, Encode)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> Self {
        TreeItem { mode, id, name }
    }
}

#[derive(Eq, Debug, Clone, Serialize, Deserialize, Decode, Encode)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for item in &self.tree_items {
            writeln!(
                f,
                "{:o} {} {}\t{}",
                match item.mode {
                    TreeItemMode::Blob => 100644,
                    TreeItemMode::BlobExecutable => 100755,
                    TreeItemMode::Link => 120000,
                    TreeItemMode::Tree => 40000,
                    TreeItemMode::Commit => 160000,
                },
                if item.mode == TreeItemMode::Tree {
                    "tree"
                } else {
                    "blob"
                },
                item.id,
                item.name
            )?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from a set of entries, computing its object hash. Entries are sorted by
    /// name so the encoding (and therefore the hash) is stable regardless of insertion order.
    pub fn from_tree_items(mut items: Vec<TreeItem>) -> Result<Tree, GitError> {
        if items.is_empty() {
            return Err(GitError::EmptyTreeItems(
                "a tree must contain at least one entry".to_string(),
            ));
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items: items,
        };
        let data = tree.to_data()?;
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &data);
        Ok(tree)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let hash_size = get_hash_kind().size();
        let mut tree_items = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let space = rest
                .find_byte(b' ')
                .ok_or(GitError::InvalidTreeObject)?;
            let mode = TreeItemMode::tree_item_type_from_bytes(&rest[..space])?;

            let nul = rest
                .find_byte(0x00)
                .ok_or(GitError::InvalidTreeObject)?;
            let name = rest[space + 1..nul]
                .to_str()
                .map_err(|e| GitError::ConversionError(e.to_string()))?
                .to_string();

            let hash_start = nul + 1;
            let hash_end = hash_start + hash_size;
            if rest.len() < hash_end {
                return Err(GitError::InvalidTreeObject);
            }
            let id = ObjectHash::from_bytes(&rest[hash_start..hash_end])
                .map_err(GitError::InvalidHashValue)?;

            tree_items.push(TreeItem { mode, id, name });
            rest = &rest[hash_end..];
        }

        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.tree_items.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.mode.to_bytes());
            data.push(b' ');
            data.extend(item.name.as_bytes());
            data.push(0x00);
            data.extend(item.id.as_ref());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use crate::internal::object::blob::Blob;

    #[test]
    fn test_tree_roundtrip() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob1 = Blob::from_content("hello");
        let blob2 = Blob::from_content("world");

        let item1 = TreeItem::new(TreeItemMode::Blob, blob1.id, "hello.txt".to_string());
        let item2 = TreeItem::new(TreeItemMode::Blob, blob2.id, "world.txt".to_string());
        let tree = Tree::from_tree_items(vec![item1, item2]).unwrap();

        let data = tree.to_data().unwrap();
        let parsed = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(parsed.tree_items, tree.tree_items);
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert!(Tree::from_tree_items(vec![]).is_err());
    }

    #[test]
    fn test_entries_sorted_by_name() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob = Blob::from_content("x");
        let item_z = TreeItem::new(TreeItemMode::Blob, blob.id, "z.txt".to_string());
        let item_a = TreeItem::new(TreeItemMode::Blob, blob.id, "a.txt".to_string());
        let tree = Tree::from_tree_items(vec![item_z, item_a]).unwrap();
        assert_eq!(tree.tree_items[0].name, "a.txt");
        assert_eq!(tree.tree_items[1].name, "z.txt");
    }
}
