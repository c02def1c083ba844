/// Model Module
///
/// An active-record base: a `Model<T>` holds a row's attributes, tracks
/// which of them have drifted from the last-persisted snapshot, and knows
/// how to insert, update, delete and find itself through a
/// `ConnectionPool` handle passed explicitly to every operation. There is
/// no process-wide pool.
///
/// Each concrete model supplies its table name, primary key and lifecycle
/// hooks through the `Table` descriptor trait rather than generated
/// boilerplate.
///
/// Error contract: model operations log failures at this boundary and
/// return them typed. "No such record" stays distinct from a driver
/// fault: the finders return `Ok(None)`, and `update`/`delete` against a
/// missing key return `QuarryError::NotFound`.
use crate::builder::QueryBuilder;
use crate::connection::Connection;
use crate::core::{QuarryError, Result};
use crate::pool::ConnectionPool;
use crate::result_set::ResultSet;
use crate::value::SqlValue;
use std::marker::PhantomData;
use tracing::error;

/// Table descriptor: the capability a concrete model supplies to the
/// generic base. Hooks and validation have no-op defaults.
pub trait Table {
    /// Table name in the database.
    const TABLE: &'static str;
    /// Primary key column.
    const PRIMARY_KEY: &'static str = "id";
    /// When true, `insert` stamps `created_at`/`updated_at` and `update`
    /// re-stamps `updated_at`.
    const TIMESTAMPS: bool = false;

    fn validate(_model: &Model<Self>) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }

    fn before_insert(_model: &mut Model<Self>) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }

    fn after_insert(_model: &mut Model<Self>)
    where
        Self: Sized,
    {
    }

    fn before_update(_model: &mut Model<Self>) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }

    fn after_update(_model: &mut Model<Self>)
    where
        Self: Sized,
    {
    }
}

fn lookup<'a>(pairs: &'a [(String, SqlValue)], key: &str) -> Option<&'a SqlValue> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Acquire-run-release convenience used by every model operation.
fn with_connection<R>(
    pool: &ConnectionPool,
    f: impl FnOnce(&Connection) -> Result<R>,
) -> Result<R> {
    let pooled = pool.acquire_default()?;
    let result = f(pooled.connection());
    pool.release(pooled);
    result
}

/// A row with dirty tracking. Attribute order is insertion order, which
/// fixes the binding order of the SQL the model compiles.
#[derive(Debug, Clone)]
pub struct Model<T: Table> {
    attributes: Vec<(String, SqlValue)>,
    original: Vec<(String, SqlValue)>,
    is_new: bool,
    _table: PhantomData<T>,
}

impl<T: Table> Default for Model<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Table> Model<T> {
    /// An empty, not-yet-persisted record.
    pub fn new() -> Self {
        Model {
            attributes: Vec::new(),
            original: Vec::new(),
            is_new: true,
            _table: PhantomData,
        }
    }

    /// Hydrates an existing record from the result set's current row; the
    /// original snapshot is synced immediately.
    pub fn from_row(rs: &ResultSet) -> Result<Self> {
        let attributes = rs.row_pairs()?;
        Ok(Model {
            original: attributes.clone(),
            attributes,
            is_new: false,
            _table: PhantomData,
        })
    }

    /// A SELECT builder preset with this model's table.
    pub fn query() -> QueryBuilder {
        QueryBuilder::create().table(T::TABLE)
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn attributes(&self) -> &[(String, SqlValue)] {
        &self.attributes
    }

    pub fn get_attribute(&self, name: &str) -> Option<&SqlValue> {
        lookup(&self.attributes, name)
    }

    /// Sets an attribute, replacing in place or appending in order.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<SqlValue>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    /// Keys whose current value differs from the original snapshot,
    /// including keys present on only one side.
    pub fn get_dirty(&self) -> Vec<String> {
        let mut dirty: Vec<String> = Vec::new();
        for (key, value) in &self.attributes {
            if lookup(&self.original, key) != Some(value) {
                dirty.push(key.clone());
            }
        }
        for (key, _) in &self.original {
            if lookup(&self.attributes, key).is_none() && !dirty.contains(key) {
                dirty.push(key.clone());
            }
        }
        dirty
    }

    pub fn is_dirty(&self) -> bool {
        !self.get_dirty().is_empty()
    }

    /// Re-snapshots the current attributes as "persisted".
    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    fn primary_key_value(&self) -> Result<SqlValue> {
        match self.get_attribute(T::PRIMARY_KEY) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(QuarryError::Model(format!(
                "missing primary key attribute `{}`",
                T::PRIMARY_KEY
            ))),
        }
    }

    fn stamp(&mut self, column: &str) {
        self.set_attribute(column, chrono::Utc::now().naive_utc());
    }

    /// Persists the record: INSERT when new, UPDATE otherwise.
    pub fn save(&mut self, pool: &ConnectionPool) -> Result<()> {
        if self.is_new {
            self.insert(pool)
        } else {
            self.update(pool)
        }
    }

    /// Inserts the full attribute set, back-filling an autogenerated
    /// primary key from the connection's last-insert-id when the key
    /// attribute was absent.
    pub fn insert(&mut self, pool: &ConnectionPool) -> Result<()> {
        T::validate(self).map_err(|e| {
            error!("{} insert validation failed: {e}", T::TABLE);
            e
        })?;

        if T::TIMESTAMPS {
            if self.get_attribute("created_at").is_none() {
                self.stamp("created_at");
            }
            self.stamp("updated_at");
        }

        T::before_insert(self)?;

        if self.attributes.is_empty() {
            return Err(QuarryError::Model(
                "cannot insert a record with no attributes".to_string(),
            ));
        }

        let qb = QueryBuilder::create()
            .table(T::TABLE)
            .insert(self.attributes.clone());

        let had_key = self
            .get_attribute(T::PRIMARY_KEY)
            .map(|v| !v.is_null())
            .unwrap_or(false);

        let generated_id = with_connection(pool, |conn| {
            qb.execute(conn)?;
            if had_key {
                Ok(None)
            } else {
                Ok(Some(conn.last_insert_id()?))
            }
        })
        .map_err(|e| {
            error!("insert into {} failed: {e}", T::TABLE);
            e
        })?;

        if let Some(id) = generated_id {
            self.set_attribute(T::PRIMARY_KEY, SqlValue::BigInt(id));
        }
        self.is_new = false;
        self.sync_original();
        T::after_insert(self);
        Ok(())
    }

    /// Updates only the dirty attribute subset, keyed by primary key.
    /// A clean record is a no-op success issuing no SQL.
    pub fn update(&mut self, pool: &ConnectionPool) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }

        T::validate(self).map_err(|e| {
            error!("{} update validation failed: {e}", T::TABLE);
            e
        })?;

        if T::TIMESTAMPS {
            self.stamp("updated_at");
        }

        T::before_update(self)?;

        let key = self.primary_key_value()?;
        let dirty_keys = self.get_dirty();
        let pairs: Vec<(String, SqlValue)> = self
            .attributes
            .iter()
            .filter(|(k, _)| dirty_keys.contains(k) && k != T::PRIMARY_KEY)
            .cloned()
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }

        let qb = QueryBuilder::create()
            .table(T::TABLE)
            .where_(T::PRIMARY_KEY, key)
            .update(pairs);

        let affected = with_connection(pool, |conn| qb.execute(conn)).map_err(|e| {
            error!("update of {} failed: {e}", T::TABLE);
            e
        })?;
        if affected == 0 {
            return Err(QuarryError::NotFound);
        }

        self.sync_original();
        T::after_update(self);
        Ok(())
    }

    /// Deletes the row by primary key. The record becomes "new" again and
    /// keeps its attributes.
    pub fn delete(&mut self, pool: &ConnectionPool) -> Result<()> {
        let key = self.primary_key_value()?;
        let qb = QueryBuilder::create()
            .table(T::TABLE)
            .where_(T::PRIMARY_KEY, key)
            .delete();

        let affected = with_connection(pool, |conn| qb.execute(conn)).map_err(|e| {
            error!("delete from {} failed: {e}", T::TABLE);
            e
        })?;
        if affected == 0 {
            return Err(QuarryError::NotFound);
        }
        self.is_new = true;
        self.original.clear();
        Ok(())
    }

    /// Finds one record by primary key.
    pub fn find(pool: &ConnectionPool, id: impl Into<SqlValue>) -> Result<Option<Self>> {
        let qb = Self::query().where_(T::PRIMARY_KEY, id);
        Self::first(pool, qb)
    }

    /// First record matching the builder, if any.
    pub fn first(pool: &ConnectionPool, qb: QueryBuilder) -> Result<Option<Self>> {
        let mut rs = with_connection(pool, |conn| qb.first(conn)).map_err(|e| {
            error!("first on {} failed: {e}", T::TABLE);
            e
        })?;
        if rs.next() {
            Ok(Some(Self::from_row(&rs)?))
        } else {
            Ok(None)
        }
    }

    /// Every record in the table.
    pub fn all(pool: &ConnectionPool) -> Result<Vec<Self>> {
        Self::find_where(pool, Self::query())
    }

    /// All records matching the builder, hydrated in result order.
    pub fn find_where(pool: &ConnectionPool, qb: QueryBuilder) -> Result<Vec<Self>> {
        let mut rs = with_connection(pool, |conn| qb.fetch(conn)).map_err(|e| {
            error!("find on {} failed: {e}", T::TABLE);
            e
        })?;
        let mut models = Vec::with_capacity(rs.row_count());
        while rs.next() {
            models.push(Self::from_row(&rs)?);
        }
        Ok(models)
    }

    /// Whether any record matches the builder.
    pub fn exists(pool: &ConnectionPool, qb: QueryBuilder) -> Result<bool> {
        with_connection(pool, |conn| qb.exists(conn)).map_err(|e| {
            error!("exists on {} failed: {e}", T::TABLE);
            e
        })
    }
}
