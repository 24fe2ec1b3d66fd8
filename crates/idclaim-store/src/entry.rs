//! Entry resource: one occupied identifier position.

use idclaim_kernel::{EntrySeed, OwnerRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::meta::{LABEL_INDEX, LABEL_OWNER, LABEL_OWNER_UID, ObjectMeta};

/// Storage key: at most one entry per (index, scope, id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub namespace: String,
    pub index: String,
    /// Range claim the position was sub-allocated from; `None` at index level.
    pub scope: Option<String>,
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub meta: ObjectMeta,
    pub spec: EntrySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub index: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub owner: OwnerRef,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display: String,
}

impl Entry {
    /// Build the entry for `seed`, copying the owner's user labels and
    /// stamping the system labels.
    pub fn build(
        index: &str,
        scope: Option<&str>,
        seed: EntrySeed,
        owner: &OwnerRef,
        user_labels: &BTreeMap<String, String>,
    ) -> Self {
        let name = match scope {
            Some(scope) => format!("{index}.{scope}.{}", seed.id),
            None => format!("{index}.{}", seed.id),
        };
        let mut meta = ObjectMeta::new(owner.namespace.clone(), name);
        meta.labels = user_labels.clone();
        meta.labels
            .insert(LABEL_INDEX.to_string(), index.to_string());
        meta.labels
            .insert(LABEL_OWNER.to_string(), owner.name.clone());
        meta.labels
            .insert(LABEL_OWNER_UID.to_string(), owner.uid.clone());

        Self {
            meta,
            spec: EntrySpec {
                index: index.to_string(),
                id: seed.id,
                scope: scope.map(str::to_string),
                owner: owner.clone(),
                display: seed.display,
            },
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            namespace: self.meta.namespace.clone(),
            index: self.spec.index.clone(),
            scope: self.spec.scope.clone(),
            id: self.spec.id,
        }
    }

    /// Same position, owner, display and labels; ignores bookkeeping fields.
    pub fn same_content(&self, other: &Entry) -> bool {
        self.spec == other.spec && self.meta.labels == other.meta.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_names_scoped_and_unscoped_entries() {
        let owner = OwnerRef::claim("default", "c6", "uid-6");
        let seed = EntrySeed {
            id: 11,
            display: "vlan-11".to_string(),
        };
        let mut labels = BTreeMap::new();
        labels.insert("site".to_string(), "ams".to_string());

        let top = Entry::build("vlan", None, seed.clone(), &owner, &labels);
        assert_eq!(top.meta.name, "vlan.11");
        assert_eq!(top.meta.labels.get("site").map(String::as_str), Some("ams"));
        assert_eq!(
            top.meta.labels.get(LABEL_OWNER).map(String::as_str),
            Some("c6")
        );

        let scoped = Entry::build("vlan", Some("c4"), seed, &owner, &labels);
        assert_eq!(scoped.meta.name, "vlan.c4.11");
        assert_ne!(top.key(), scoped.key());
    }
}
