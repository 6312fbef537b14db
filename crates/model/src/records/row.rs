use serde::{Deserialize, Serialize};

/// A single cell in PostgreSQL text representation; `None` is SQL NULL.
pub type Cell = Option<String>;

/// One source row, positionally aligned with its batch's column list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Row { cells }
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.cells.get(idx).and_then(|c| c.as_deref())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.as_ref().map_or(0, |v| v.len()))
            .sum()
    }
}

impl From<Vec<Cell>> for Row {
    fn from(cells: Vec<Cell>) -> Self {
        Row::new(cells)
    }
}
