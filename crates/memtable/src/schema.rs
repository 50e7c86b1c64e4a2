//! Table schema: column definitions and per-table storage options.

use std::collections::BTreeMap;

use crate::key::{DecoratedKey, PartitionerKind};

pub type ColumnId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Static,
    Regular,
}

impl ColumnKind {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnKind::Static => "static",
            ColumnKind::Regular => "regular",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub id: ColumnId,
    pub name: String,
    pub kind: ColumnKind,
    /// Multi-valued column (list, set, map).
    pub collection: bool,
}

impl ColumnDefinition {
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        !self.collection
    }
}

/// Chunk compressor used for Data.db.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressorKind {
    /// Checksummed but uncompressed.
    None,
    #[default]
    Lz4,
    Snappy,
    Deflate,
}

/// Column lookups plus the storage options of one table.
#[derive(Debug, Clone)]
pub struct Schema {
    pub keyspace: String,
    pub table: String,
    pub partitioner: PartitionerKind,
    pub compressor: CompressorKind,
    pub bloom_filter_fp_chance: f64,
    static_columns: BTreeMap<ColumnId, ColumnDefinition>,
    regular_columns: BTreeMap<ColumnId, ColumnDefinition>,
}

impl Schema {
    pub fn builder(keyspace: impl Into<String>, table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            schema: Schema {
                keyspace: keyspace.into(),
                table: table.into(),
                partitioner: PartitionerKind::default(),
                compressor: CompressorKind::default(),
                bloom_filter_fp_chance: 0.01,
                static_columns: BTreeMap::new(),
                regular_columns: BTreeMap::new(),
            },
        }
    }

    #[must_use]
    pub fn static_column_at(&self, id: ColumnId) -> Option<&ColumnDefinition> {
        self.static_columns.get(&id)
    }

    #[must_use]
    pub fn regular_column_at(&self, id: ColumnId) -> Option<&ColumnDefinition> {
        self.regular_columns.get(&id)
    }

    #[must_use]
    pub fn column_at(&self, kind: ColumnKind, id: ColumnId) -> Option<&ColumnDefinition> {
        match kind {
            ColumnKind::Static => self.static_column_at(id),
            ColumnKind::Regular => self.regular_column_at(id),
        }
    }

    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDefinition> {
        self.static_columns
            .values()
            .chain(self.regular_columns.values())
            .find(|c| c.name == name)
    }

    pub fn decorate_key(&self, key: impl Into<Vec<u8>>) -> DecoratedKey {
        self.partitioner.decorate_key(key)
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.static_columns.values().chain(self.regular_columns.values())
    }
}

pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    fn column(mut self, kind: ColumnKind, name: &str, collection: bool) -> Self {
        let columns = match kind {
            ColumnKind::Static => &mut self.schema.static_columns,
            ColumnKind::Regular => &mut self.schema.regular_columns,
        };
        let id = columns.len() as ColumnId;
        columns.insert(
            id,
            ColumnDefinition {
                id,
                name: name.to_string(),
                kind,
                collection,
            },
        );
        self
    }

    /// Adds a static atomic column; ids are assigned in declaration order.
    pub fn static_column(self, name: &str) -> Self {
        self.column(ColumnKind::Static, name, false)
    }

    pub fn static_collection(self, name: &str) -> Self {
        self.column(ColumnKind::Static, name, true)
    }

    pub fn regular_column(self, name: &str) -> Self {
        self.column(ColumnKind::Regular, name, false)
    }

    pub fn regular_collection(self, name: &str) -> Self {
        self.column(ColumnKind::Regular, name, true)
    }

    pub fn partitioner(mut self, partitioner: PartitionerKind) -> Self {
        self.schema.partitioner = partitioner;
        self
    }

    pub fn compressor(mut self, compressor: CompressorKind) -> Self {
        self.schema.compressor = compressor;
        self
    }

    pub fn bloom_filter_fp_chance(mut self, chance: f64) -> Self {
        self.schema.bloom_filter_fp_chance = chance;
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}
