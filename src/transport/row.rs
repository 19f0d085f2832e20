use linked_hash_map::LinkedHashMap;

use crate::statement::{DataValue, Params};

/// Represents a row returned by a read
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    /// Values by column name, in column order
    values: LinkedHashMap<String, DataValue>,
}

impl Row {
    /// Create a new empty row
    pub fn new() -> Self {
        Row {
            values: LinkedHashMap::new(),
        }
    }

    /// Create a row from statement parameters
    pub fn from_params(params: &Params) -> Self {
        Row {
            values: params.clone(),
        }
    }

    /// Get a value by column name
    pub fn get(&self, column: &str) -> Option<&DataValue> {
        self.values.get(column)
    }

    /// Set a value for a column
    pub fn set(&mut self, column: String, value: DataValue) {
        if let Some(existing) = self.values.get_mut(&column) {
            *existing = value;
        } else {
            self.values.insert(column, value);
        }
    }

    /// Overwrite columns with the given parameters
    pub fn merge(&mut self, params: &Params) {
        for (column, value) in params.iter() {
            self.set(column.clone(), value.clone());
        }
    }

    /// Get all values with their corresponding column names, in column order
    pub fn values_with_names(&self) -> impl Iterator<Item = (&String, &DataValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
