pub mod weaviate;

use anyhow::Result;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Text,
    Int,
    Bool,
    TextArray,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Int => "int",
            DataType::Bool => "boolean",
            DataType::TextArray => "text[]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property {
    pub name: &'static str,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreObject {
    pub uuid: Uuid,
    pub properties: Map<String, Value>,
    pub vector: Option<Vec<f32>>,
}

/// A multi-tenant vector database with cross-references between collections.
pub trait VectorStore {
    /// Creates the collection if missing. Returns true when it was created.
    fn ensure_collection(&self, name: &str, properties: &[Property]) -> Result<bool>;

    fn ensure_reference_property(&self, from: &str, property: &str, to: &str) -> Result<()>;

    fn ensure_tenant(&self, collection: &str, tenant: &str) -> Result<()>;

    /// Inserts or replaces objects. Returns the number that failed.
    fn upsert_objects(&self, collection: &str, tenant: &str, objects: &[StoreObject])
    -> Result<usize>;

    fn add_reference(
        &self,
        collection: &str,
        tenant: &str,
        from: Uuid,
        property: &str,
        to_collection: &str,
        to: Uuid,
    ) -> Result<()>;
}
