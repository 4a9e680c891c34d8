//! The contract shared by relation kinds.

use asupersync::{Cx, Outcome};
use relmodel_core::{CollectionRef, Connection, EntityRef, Error, RelationId, Subscription};

use crate::config::RelationConfig;

/// A relation attribute bound to one parent entity.
///
/// Implementations describe how to fetch the related collection, how to keep
/// it in sync with lifecycle events, and how to write its changes back.
pub trait Relation {
    /// Identity of the relation attribute on the parent.
    fn id(&self) -> RelationId;

    /// The entity owning this relation.
    fn parent(&self) -> &EntityRef;

    fn config(&self) -> &RelationConfig;

    /// Query storage for the related entities, always building a fresh
    /// collection.
    fn fetch_results<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> impl Future<Output = Outcome<CollectionRef, Error>>;

    /// Subscribe `collection` to lifecycle events of the related table.
    fn register_events(&self, collection: &CollectionRef) -> Vec<Subscription>;

    /// Attach `collection` to the parent as this relation, subscribing it
    /// when `keep_synced` and releasing whatever the replaced collection held.
    fn attach(&self, collection: &CollectionRef);

    /// Write the membership changes of `collection` back to storage.
    fn persist<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        collection: &CollectionRef,
    ) -> impl Future<Output = Outcome<(), Error>>;

    /// Remove the storage rows linking `parent` to related entities.
    fn on_delete<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
        parent: &EntityRef,
    ) -> impl Future<Output = Outcome<u64, Error>>;

    /// The loaded collection, fetching and attaching it to the parent on
    /// first access.
    fn get_results<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> impl Future<Output = Outcome<CollectionRef, Error>> {
        async move {
            let id = self.id();
            let loaded = self.parent().borrow().relation(&id);
            if let Some(collection) = loaded {
                tracing::trace!(relation = %id, "relation already loaded");
                return Outcome::Ok(collection);
            }

            let collection = match self.fetch_results(cx, conn).await {
                Outcome::Ok(collection) => collection,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };

            self.attach(&collection);
            Outcome::Ok(collection)
        }
    }
}
