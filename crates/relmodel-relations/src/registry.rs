//! Relation definitions by identity.

use std::collections::BTreeMap;
use std::rc::Rc;

use relmodel_core::RelationId;

use crate::many_to_many::ManyToManyDef;

/// All relation definitions known to a saver.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    relations: BTreeMap<RelationId, Rc<ManyToManyDef>>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `def`, replacing any definition with the same id.
    pub fn register(&mut self, def: ManyToManyDef) -> Rc<ManyToManyDef> {
        let id = def.id();
        let def = Rc::new(def);
        if self.relations.insert(id, Rc::clone(&def)).is_some() {
            tracing::warn!(relation = %id, "relation definition replaced");
        }
        def
    }

    pub fn get(&self, id: &RelationId) -> Option<&Rc<ManyToManyDef>> {
        self.relations.get(id)
    }

    /// Relations exposed as attributes of `table`.
    pub fn owned_by<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Rc<ManyToManyDef>> + 'a {
        self.relations
            .values()
            .filter(move |def| def.id().table == table)
    }

    /// Relations whose related side is `table`.
    pub fn referencing<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a Rc<ManyToManyDef>> + 'a {
        self.relations
            .values()
            .filter(move |def| def.related().name() == table)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmodel_core::{AssociationTable, IntegerColumn, Table};

    fn table(name: &'static str) -> Rc<Table> {
        Table::builder(name, "id")
            .column(IntegerColumn::big("id").unsigned().auto_increment())
            .build()
            .unwrap()
    }

    fn post_tags() -> AssociationTable {
        AssociationTable::new("post_tags", ("post_id", "posts"), ("tag_id", "tags")).unwrap()
    }

    #[test]
    fn test_lookup_by_owner_and_related_side() {
        let mut registry = RelationRegistry::new();
        assert!(registry.is_empty());

        let tags = RelationId::new("posts", "tags");
        let posts = RelationId::new("tags", "posts");
        registry.register(ManyToManyDef::new(tags, table("tags"), post_tags()).unwrap());
        registry.register(ManyToManyDef::new(posts, table("posts"), post_tags()).unwrap());
        assert_eq!(registry.len(), 2);

        let owned: Vec<_> = registry.owned_by("posts").map(|d| d.id()).collect();
        assert_eq!(owned, vec![tags]);
        let referencing: Vec<_> = registry.referencing("posts").map(|d| d.id()).collect();
        assert_eq!(referencing, vec![posts]);
        assert_eq!(registry.get(&tags).unwrap().other_column(), "post_id");
    }

    #[test]
    fn test_registering_twice_replaces() {
        let mut registry = RelationRegistry::new();
        let id = RelationId::new("posts", "tags");
        registry.register(ManyToManyDef::new(id, table("tags"), post_tags()).unwrap());
        let second = registry.register(
            ManyToManyDef::new(id, table("tags"), post_tags())
                .unwrap()
                .mirrored_by("posts"),
        );
        assert_eq!(registry.len(), 1);
        assert!(Rc::ptr_eq(registry.get(&id).unwrap(), &second));
    }
}
