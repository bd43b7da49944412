use super::{fold, values_match, Collation, LinkEnd, LinkSpec, Row, StorageBackend, SyncPlan, TableSpec};
use crate::error::StorageError;
use log::{debug, info};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::RwLock;

const SEP: char = '\0';

/// sled-backed [`StorageBackend`].
///
/// Tree layout per generation `g`:
/// - `g{g}/table/{entity}`: folded id to row JSON
/// - `g{g}/index/{entity}/{column}`: `{folded value}\0{folded id}` to id
/// - `g{g}/pending/{entity}`: `{folded id}\0{column}` to a column value
///   deferred until the row exists
/// - `g{g}/link/{through}`: `{entity}\0{id}\0{entity}\0{id}` to the far id,
///   stored in both directions
pub struct SledStore {
    db: sled::Db,
    /// Trees created by `sync_tables` and not yet dropped
    synced: RwLock<HashSet<String>>,
}

impl SledStore {
    pub fn new(db: sled::Db) -> Self {
        Self {
            db,
            synced: RwLock::new(HashSet::new()),
        }
    }

    /// A store backed by a temporary database, removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(StorageError::from_sled("open"))?;
        Ok(Self::new(db))
    }

    /// Gets a reference to the underlying database
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn table_tree_name(entity: &str, generation: u64) -> String {
        format!("g{}/table/{}", generation, entity)
    }

    fn index_tree_name(entity: &str, column: &str, generation: u64) -> String {
        format!("g{}/index/{}/{}", generation, entity, column)
    }

    fn pending_tree_name(entity: &str, generation: u64) -> String {
        format!("g{}/pending/{}", generation, entity)
    }

    fn link_tree_name(through: &str, generation: u64) -> String {
        format!("g{}/link/{}", generation, through)
    }

    fn open_synced(&self, name: &str) -> Result<sled::Tree, StorageError> {
        let synced = self
            .synced
            .read()
            .map_err(|_| StorageError::Lock("synced tables".to_string()))?;
        if !synced.contains(name) {
            return Err(StorageError::MissingTable(name.to_string()));
        }
        self.db.open_tree(name).map_err(StorageError::from_sled("open_tree"))
    }

    fn table_tree(&self, table: &TableSpec) -> Result<sled::Tree, StorageError> {
        self.open_synced(&Self::table_tree_name(&table.entity, table.generation))
    }

    fn index_tree(&self, table: &TableSpec, column: &str) -> Result<sled::Tree, StorageError> {
        self.open_synced(&Self::index_tree_name(&table.entity, column, table.generation))
    }

    fn pending_tree(&self, table: &TableSpec) -> Result<sled::Tree, StorageError> {
        self.open_synced(&Self::pending_tree_name(&table.entity, table.generation))
    }

    fn link_tree(&self, link: &LinkSpec) -> Result<sled::Tree, StorageError> {
        self.open_synced(&Self::link_tree_name(&link.through, link.generation))
    }

    fn tree_exists(&self, name: &str) -> bool {
        self.db.tree_names().iter().any(|n| &n[..] == name.as_bytes())
    }

    fn decode_row(bytes: &[u8]) -> Result<Row, StorageError> {
        serde_json::from_slice(bytes).map_err(StorageError::from_serde("row"))
    }

    /// Index key prefix for a value; `None` for values that are not indexed.
    fn index_value(collation: Collation, value: &JsonValue) -> Option<String> {
        match value {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(match collation {
                Collation::CaseInsensitive => fold(s),
                Collation::Binary => s.clone(),
            }),
            JsonValue::Number(n) => Some(n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())),
            other => Some(other.to_string()),
        }
    }

    fn index_key(value: &str, id: &str) -> String {
        format!("{}{}{}", value, SEP, fold(id))
    }

    fn deferred_key(id: &str, column: &str) -> String {
        format!("{}{}{}", fold(id), SEP, column)
    }

    fn decode_value(bytes: &[u8]) -> Result<JsonValue, StorageError> {
        serde_json::from_slice(bytes).map_err(StorageError::from_serde("deferred value"))
    }

    /// Moves the deferred columns of `id` into a copy of `row`, unless the
    /// row already holds a value for them.
    fn take_deferred(&self, table: &TableSpec, id: &str, row: &Row) -> Result<Option<Row>, StorageError> {
        let pending = self.pending_tree(table)?;
        let prefix = format!("{}{}", fold(id), SEP);
        let mut entries = Vec::new();
        for result in pending.scan_prefix(prefix.as_bytes()) {
            entries.push(result.map_err(StorageError::from_sled("deferred scan"))?);
        }

        let mut merged: Option<Row> = None;
        for (key, value) in entries {
            pending.remove(&key).map_err(StorageError::from_sled("deferred remove"))?;
            let column = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
            let value = Self::decode_value(&value)?;
            let target = merged.get_or_insert_with(|| row.clone());
            if target.get(&column).map_or(true, JsonValue::is_null) {
                debug!("Applying deferred '{}' to '{}' row '{}'", column, table.entity, id);
                target.insert(column, value);
            }
        }
        Ok(merged)
    }

    fn link_key(from: LinkEnd<'_>, to: LinkEnd<'_>) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            from.entity,
            fold(from.id),
            to.entity,
            fold(to.id),
            sep = SEP
        )
    }

    fn update_indexes(
        &self,
        table: &TableSpec,
        id: &str,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<(), StorageError> {
        for column in &table.indexes {
            let collation = table.collation(column);
            let before = old
                .and_then(|row| row.get(column))
                .and_then(|v| Self::index_value(collation, v));
            let after = new
                .and_then(|row| row.get(column))
                .and_then(|v| Self::index_value(collation, v));
            if before == after {
                continue;
            }
            let tree = self.index_tree(table, column)?;
            if let Some(value) = before {
                tree.remove(Self::index_key(&value, id).as_bytes())
                    .map_err(StorageError::from_sled("index remove"))?;
            }
            if let Some(value) = after {
                tree.insert(Self::index_key(&value, id).as_bytes(), id.as_bytes())
                    .map_err(StorageError::from_sled("index insert"))?;
            }
        }
        Ok(())
    }

    fn copy_table(&self, table: &TableSpec, previous: u64) -> Result<usize, StorageError> {
        let old_name = Self::table_tree_name(&table.entity, previous);
        if !self.tree_exists(&old_name) {
            return Ok(0);
        }
        let old = self.db.open_tree(&old_name).map_err(StorageError::from_sled("open_tree"))?;
        let mut copied = 0;
        for result in old.iter() {
            let (_, value) = result.map_err(StorageError::from_sled("scan"))?;
            let row = Self::decode_row(&value)?;
            let Some(id) = row.get("id").and_then(JsonValue::as_str).map(str::to_string) else {
                continue;
            };
            self.put_row(table, &id, &row)?;
            copied += 1;
        }
        Ok(copied)
    }

    fn copy_pending(&self, table: &TableSpec, previous: u64) -> Result<(), StorageError> {
        let old_name = Self::pending_tree_name(&table.entity, previous);
        if !self.tree_exists(&old_name) {
            return Ok(());
        }
        let old = self.db.open_tree(&old_name).map_err(StorageError::from_sled("open_tree"))?;
        let new = self.pending_tree(table)?;
        for result in old.iter() {
            let (key, value) = result.map_err(StorageError::from_sled("scan"))?;
            new.insert(key, value).map_err(StorageError::from_sled("insert"))?;
        }
        Ok(())
    }

    fn copy_link(&self, link: &LinkSpec, previous: u64) -> Result<(), StorageError> {
        let old_name = Self::link_tree_name(&link.through, previous);
        if !self.tree_exists(&old_name) {
            return Ok(());
        }
        let old = self.db.open_tree(&old_name).map_err(StorageError::from_sled("open_tree"))?;
        let new = self.link_tree(link)?;
        for result in old.iter() {
            let (key, value) = result.map_err(StorageError::from_sled("scan"))?;
            new.insert(key, value).map_err(StorageError::from_sled("insert"))?;
        }
        Ok(())
    }
}

impl StorageBackend for SledStore {
    fn sync_tables(&self, plan: &SyncPlan) -> Result<(), StorageError> {
        let mut names = Vec::new();
        for table in &plan.tables {
            names.push(Self::table_tree_name(&table.entity, plan.generation));
            names.push(Self::pending_tree_name(&table.entity, plan.generation));
            for column in &table.indexes {
                names.push(Self::index_tree_name(&table.entity, column, plan.generation));
            }
        }
        for link in &plan.links {
            names.push(Self::link_tree_name(&link.through, plan.generation));
        }

        for name in &names {
            self.db.open_tree(name).map_err(StorageError::from_sled("open_tree"))?;
        }
        {
            let mut synced = self
                .synced
                .write()
                .map_err(|_| StorageError::Lock("synced tables".to_string()))?;
            synced.extend(names.iter().cloned());
        }

        if let Some(previous) = plan.previous {
            for table in &plan.tables {
                let copied = self.copy_table(table, previous)?;
                if copied > 0 {
                    debug!("Carried {} row(s) of '{}' into generation {}", copied, table.entity, plan.generation);
                }
                self.copy_pending(table, previous)?;
            }
            for link in &plan.links {
                self.copy_link(link, previous)?;
            }
        }

        self.flush()?;
        info!(
            "Synced generation {}: {} table(s), {} link table(s)",
            plan.generation,
            plan.tables.len(),
            plan.links.len()
        );
        Ok(())
    }

    fn drop_generation(&self, generation: u64) -> Result<(), StorageError> {
        let prefix = format!("g{}/", generation);
        let mut dropped = 0;
        for name in self.db.tree_names() {
            if name.starts_with(prefix.as_bytes()) {
                self.db.drop_tree(&name).map_err(StorageError::from_sled("drop_tree"))?;
                dropped += 1;
            }
        }
        let mut synced = self
            .synced
            .write()
            .map_err(|_| StorageError::Lock("synced tables".to_string()))?;
        synced.retain(|name| !name.starts_with(&prefix));
        info!("Dropped {} tree(s) of generation {}", dropped, generation);
        Ok(())
    }

    fn put_row(&self, table: &TableSpec, id: &str, row: &Row) -> Result<(), StorageError> {
        let tree = self.table_tree(table)?;
        let merged = self.take_deferred(table, id, row)?;
        let row = merged.as_ref().unwrap_or(row);
        let bytes = serde_json::to_vec(row).map_err(StorageError::from_serde("row"))?;
        let previous = tree
            .insert(fold(id).as_bytes(), bytes)
            .map_err(StorageError::from_sled("insert"))?;
        let previous = previous.map(|bytes| Self::decode_row(&bytes)).transpose()?;
        self.update_indexes(table, id, previous.as_ref(), Some(row))
    }

    fn get_row(&self, table: &TableSpec, id: &str) -> Result<Option<Row>, StorageError> {
        let tree = self.table_tree(table)?;
        match tree.get(fold(id).as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(Self::decode_row(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::database("get", e)),
        }
    }

    fn delete_row(&self, table: &TableSpec, id: &str) -> Result<bool, StorageError> {
        let tree = self.table_tree(table)?;
        let removed = tree
            .remove(fold(id).as_bytes())
            .map_err(StorageError::from_sled("remove"))?;
        match removed {
            Some(bytes) => {
                let old = Self::decode_row(&bytes)?;
                self.update_indexes(table, id, Some(&old), None)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn scan_rows(&self, table: &TableSpec) -> Result<Vec<Row>, StorageError> {
        let tree = self.table_tree(table)?;
        let mut rows = Vec::with_capacity(tree.len());
        for result in tree.iter() {
            let (_, value) = result.map_err(StorageError::from_sled("scan"))?;
            rows.push(Self::decode_row(&value)?);
        }
        Ok(rows)
    }

    fn rows_where(&self, table: &TableSpec, column: &str, value: &JsonValue) -> Result<Vec<Row>, StorageError> {
        let collation = table.collation(column);

        if !table.is_indexed(column) {
            return Ok(self
                .scan_rows(table)?
                .into_iter()
                .filter(|row| row.get(column).is_some_and(|v| values_match(collation, v, value)))
                .collect());
        }

        let Some(encoded) = Self::index_value(collation, value) else {
            return Ok(Vec::new());
        };
        let index = self.index_tree(table, column)?;
        let prefix = format!("{}{}", encoded, SEP);
        let mut rows = Vec::new();
        for result in index.scan_prefix(prefix.as_bytes()) {
            let (_, id) = result.map_err(StorageError::from_sled("index scan"))?;
            let id = String::from_utf8_lossy(&id).to_string();
            // An index entry can briefly outlive a concurrent update.
            if let Some(row) = self.get_row(table, &id)? {
                if row.get(column).is_some_and(|v| values_match(collation, v, value)) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    fn set_column(&self, table: &TableSpec, id: &str, column: &str, value: JsonValue) -> Result<bool, StorageError> {
        let tree = self.table_tree(table)?;
        let key = fold(id);
        loop {
            let Some(current) = tree.get(key.as_bytes()).map_err(StorageError::from_sled("get"))? else {
                return Ok(false);
            };
            let old = Self::decode_row(&current)?;
            let mut row = old.clone();
            row.insert(column.to_string(), value.clone());
            let bytes = serde_json::to_vec(&row).map_err(StorageError::from_serde("row"))?;
            let swapped = tree
                .compare_and_swap(key.as_bytes(), Some(&current), Some(bytes))
                .map_err(StorageError::from_sled("compare_and_swap"))?;
            if swapped.is_ok() {
                self.update_indexes(table, id, Some(&old), Some(&row))?;
                return Ok(true);
            }
            debug!("Row '{}' of '{}' changed under update of '{}', retrying", id, table.entity, column);
        }
    }

    fn defer_column(&self, table: &TableSpec, id: &str, column: &str, value: JsonValue) -> Result<(), StorageError> {
        let pending = self.pending_tree(table)?;
        let bytes = serde_json::to_vec(&value).map_err(StorageError::from_serde("deferred value"))?;
        pending
            .insert(Self::deferred_key(id, column).as_bytes(), bytes)
            .map_err(StorageError::from_sled("defer"))?;
        Ok(())
    }

    fn deferred_ids(&self, table: &TableSpec, column: &str, value: &JsonValue) -> Result<Vec<String>, StorageError> {
        let pending = self.pending_tree(table)?;
        let collation = table.collation(column);
        let mut ids = Vec::new();
        for result in pending.iter() {
            let (key, stored) = result.map_err(StorageError::from_sled("deferred scan"))?;
            let key = String::from_utf8_lossy(&key).to_string();
            let Some((id, stored_column)) = key.split_once(SEP) else {
                continue;
            };
            if stored_column == column && values_match(collation, &Self::decode_value(&stored)?, value) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    fn discard_deferred(
        &self,
        table: &TableSpec,
        id: &str,
        column: &str,
        value: &JsonValue,
    ) -> Result<bool, StorageError> {
        let pending = self.pending_tree(table)?;
        let key = Self::deferred_key(id, column);
        let Some(stored) = pending.get(key.as_bytes()).map_err(StorageError::from_sled("get"))? else {
            return Ok(false);
        };
        if !values_match(table.collation(column), &Self::decode_value(&stored)?, value) {
            return Ok(false);
        }
        let removed = pending
            .compare_and_swap(key.as_bytes(), Some(&stored), None::<&[u8]>)
            .map_err(StorageError::from_sled("compare_and_swap"))?;
        Ok(removed.is_ok())
    }

    fn link(&self, link: &LinkSpec, from: LinkEnd<'_>, to: LinkEnd<'_>) -> Result<bool, StorageError> {
        let tree = self.link_tree(link)?;
        let previous = tree
            .insert(Self::link_key(from, to).as_bytes(), to.id.as_bytes())
            .map_err(StorageError::from_sled("link"))?;
        tree.insert(Self::link_key(to, from).as_bytes(), from.id.as_bytes())
            .map_err(StorageError::from_sled("link"))?;
        Ok(previous.is_none())
    }

    fn unlink(&self, link: &LinkSpec, from: LinkEnd<'_>, to: LinkEnd<'_>) -> Result<bool, StorageError> {
        let tree = self.link_tree(link)?;
        let previous = tree
            .remove(Self::link_key(from, to).as_bytes())
            .map_err(StorageError::from_sled("unlink"))?;
        tree.remove(Self::link_key(to, from).as_bytes())
            .map_err(StorageError::from_sled("unlink"))?;
        Ok(previous.is_some())
    }

    fn linked_ids(&self, link: &LinkSpec, from: LinkEnd<'_>, target_entity: &str) -> Result<Vec<String>, StorageError> {
        let tree = self.link_tree(link)?;
        let prefix = format!(
            "{}{sep}{}{sep}{}{sep}",
            from.entity,
            fold(from.id),
            target_entity,
            sep = SEP
        );
        let mut ids = Vec::new();
        for result in tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result.map_err(StorageError::from_sled("link scan"))?;
            ids.push(String::from_utf8_lossy(&value).to_string());
        }
        Ok(ids)
    }

    fn is_linked(&self, link: &LinkSpec, from: LinkEnd<'_>, to: LinkEnd<'_>) -> Result<bool, StorageError> {
        let tree = self.link_tree(link)?;
        tree.contains_key(Self::link_key(from, to).as_bytes())
            .map_err(StorageError::from_sled("link lookup"))
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(StorageError::from_sled("flush"))?;
        Ok(())
    }
}
