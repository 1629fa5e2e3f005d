//! Field, array and nested-property operations.
//!
//! Mutators build a one-path update (`{"$op": {"<field>": value}}` or
//! `{"$op": {"<field>.<key>": value}}`) and run it through the shared
//! mutation path, so each is a single atomic store operation. Readers use
//! the cached document when a cache is configured and a projected store
//! read otherwise.

use serde_json::json;
use tessera_core::{
    build_path, each, field_contains, get_path, id_query, operator, ops, Document, DocumentId,
    PathDescriptor, TesseraResult, Value,
};
use tracing::debug;

use super::CacheAsideRepository;
use crate::store::FindAndModifyOptions;

impl CacheAsideRepository {
    // ========================================================================
    // FIELDS
    // ========================================================================

    /// Value of `field`, or `None` when the document or the field is missing.
    pub async fn get_field(&self, id: &DocumentId, field: &str) -> TesseraResult<Option<Value>> {
        self.read_path("get_field", id, build_path(field, 1, None))
            .await
    }

    /// `$set` one field. Returns the number of documents modified.
    pub async fn set_field(
        &self,
        id: &DocumentId,
        field: &str,
        value: impl Into<Value>,
    ) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, "set_field");
        self.update("set_field", id, operator(ops::SET, build_path(field, value, None)))
            .await
    }

    /// `$unset` one field.
    pub async fn remove_field(&self, id: &DocumentId, field: &str) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, "remove_field");
        self.update("remove_field", id, operator(ops::UNSET, build_path(field, 1, None)))
            .await
    }

    // ========================================================================
    // ARRAYS
    // ========================================================================

    /// Append `value` to the array `field`, creating it if absent.
    pub async fn add_element(
        &self,
        id: &DocumentId,
        field: &str,
        value: impl Into<Value>,
    ) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, "add_element");
        self.update("add_element", id, operator(ops::PUSH, build_path(field, value, None)))
            .await
    }

    /// Append every value, in order.
    pub async fn add_elements(
        &self,
        id: &DocumentId,
        field: &str,
        values: Vec<Value>,
    ) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, count = values.len(), "add_elements");
        let descriptor = build_path(field, each(values), None);
        self.update("add_elements", id, operator(ops::PUSH, descriptor))
            .await
    }

    /// Remove every occurrence of `value` from the array `field`.
    pub async fn remove_element(
        &self,
        id: &DocumentId,
        field: &str,
        value: impl Into<Value>,
    ) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, "remove_element");
        self.update("remove_element", id, operator(ops::PULL, build_path(field, value, None)))
            .await
    }

    /// Remove every occurrence of each of `values`.
    pub async fn remove_elements(
        &self,
        id: &DocumentId,
        field: &str,
        values: Vec<Value>,
    ) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, count = values.len(), "remove_elements");
        let descriptor = build_path(field, Value::Array(values), None);
        self.update("remove_elements", id, operator(ops::PULL_ALL, descriptor))
            .await
    }

    /// Whether `field` contains `value` (or equals it, for a scalar field).
    /// A missing document answers `false`.
    pub async fn has_element(
        &self,
        id: &DocumentId,
        field: &str,
        value: impl Into<Value>,
    ) -> TesseraResult<bool> {
        let value = value.into();
        if self.cache().is_some() {
            let Some(found) = self.get_field_cached("has_element", id, field).await? else {
                return Ok(false);
            };
            return Ok(field_contains(&found, &value));
        }
        self.exists_where("has_element", id, field, value).await
    }

    /// Whether `field` contains at least one of `values`.
    pub async fn has_some_elements(
        &self,
        id: &DocumentId,
        field: &str,
        values: Vec<Value>,
    ) -> TesseraResult<bool> {
        if self.cache().is_some() {
            let Some(found) = self.get_field_cached("has_some_elements", id, field).await? else {
                return Ok(false);
            };
            return Ok(values.iter().any(|v| field_contains(&found, v)));
        }
        self.exists_where("has_some_elements", id, field, json!({ "$in": values }))
            .await
    }

    /// Whether `field` contains every one of `values`.
    pub async fn has_all_elements(
        &self,
        id: &DocumentId,
        field: &str,
        values: Vec<Value>,
    ) -> TesseraResult<bool> {
        if self.cache().is_some() {
            let Some(found) = self.get_field_cached("has_all_elements", id, field).await? else {
                return Ok(false);
            };
            return Ok(values.iter().all(|v| field_contains(&found, v)));
        }
        self.exists_where("has_all_elements", id, field, json!({ "$all": values }))
            .await
    }

    // ========================================================================
    // NESTED PROPERTIES
    // ========================================================================

    /// Value at `field.key`.
    pub async fn get_property(
        &self,
        id: &DocumentId,
        field: &str,
        key: &str,
    ) -> TesseraResult<Option<Value>> {
        self.read_path("get_property", id, build_path(key, 1, Some(field)))
            .await
    }

    /// `$set` the value at `field.key`, creating `field` if absent.
    pub async fn set_property(
        &self,
        id: &DocumentId,
        field: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, key, "set_property");
        let descriptor = build_path(key, value, Some(field));
        self.update("set_property", id, operator(ops::SET, descriptor))
            .await
    }

    /// Atomically add `amount` to the number at `field.key` and return the
    /// new value. `None` when the document does not exist.
    ///
    /// The cached copy is deleted so the cache never holds a stale
    /// document. The store replies with the incremented path only, which
    /// cannot replace the full cached document.
    pub async fn inc_property(
        &self,
        id: &DocumentId,
        field: &str,
        key: &str,
        amount: impl Into<Value>,
    ) -> TesseraResult<Option<Value>> {
        debug!(collection = %self.name(), id = %id, field, key, "inc_property");
        let descriptor = build_path(key, amount, Some(field));
        let path = descriptor.path().to_string();
        let options = FindAndModifyOptions::returning_new()
            .with_projection(build_path(&path, 1, None).into_document());

        let modified = self
            .find_one_and_modify(&id_query(id), &operator(ops::INC, descriptor), options)
            .await
            .map_err(self.in_operation("inc_property", Some(id)))?;
        Ok(modified.and_then(|doc| get_path(&doc, &path).cloned()))
    }

    /// `$unset` the value at `field.key`.
    pub async fn remove_property(
        &self,
        id: &DocumentId,
        field: &str,
        key: &str,
    ) -> TesseraResult<u64> {
        debug!(collection = %self.name(), id = %id, field, key, "remove_property");
        let descriptor = build_path(key, 1, Some(field));
        self.update("remove_property", id, operator(ops::UNSET, descriptor))
            .await
    }

    // ========================================================================
    // READ HELPERS
    // ========================================================================

    /// Read the value at `descriptor`'s path: from the loaded document when
    /// caching, otherwise through a projected `find_one`.
    async fn read_path(
        &self,
        operation: &'static str,
        id: &DocumentId,
        descriptor: PathDescriptor,
    ) -> TesseraResult<Option<Value>> {
        let path = descriptor.path().to_string();
        if self.cache().is_some() {
            debug!(collection = %self.name(), id = %id, path = %path, "{} load", operation);
            let loaded = self
                .load(id)
                .await
                .map_err(|e| e.in_operation(operation, self.name(), Some(id.to_string())))?;
            return Ok(loaded.and_then(|doc| get_path(&doc, &path).cloned()));
        }

        debug!(collection = %self.name(), id = %id, path = %path, "{} find_one", operation);
        let projection = descriptor.into_document();
        let found = self
            .collection()
            .find_one(&id_query(id), Some(&projection))
            .await
            .map_err(self.in_operation(operation, Some(id)))?;
        Ok(found.and_then(|doc| get_path(&doc, &path).cloned()))
    }

    async fn get_field_cached(
        &self,
        operation: &'static str,
        id: &DocumentId,
        field: &str,
    ) -> TesseraResult<Option<Value>> {
        self.read_path(operation, id, build_path(field, 1, None))
            .await
    }

    /// `count({_id, field: condition}) > 0`.
    async fn exists_where(
        &self,
        operation: &'static str,
        id: &DocumentId,
        field: &str,
        condition: Value,
    ) -> TesseraResult<bool> {
        let mut query: Document = id_query(id);
        query.insert(field.to_string(), condition);
        debug!(collection = %self.name(), id = %id, field, "{} count", operation);
        let n = self
            .collection()
            .count(&query)
            .await
            .map_err(self.in_operation(operation, Some(id)))?;
        Ok(n > 0)
    }
}
