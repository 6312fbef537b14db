use crate::records::row::Row;
use std::sync::Arc;

/// A bounded slice of source rows processed as one load+merge unit.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based position of the batch within its job.
    pub number: u64,
    /// Offset of the window this batch was read from.
    pub offset: u64,
    pub columns: Arc<[String]>,
    pub rows: Vec<Row>,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manifest {
    pub row_count: usize,
    pub size_bytes: usize,
}

impl Batch {
    pub fn new(number: u64, offset: u64, columns: Arc<[String]>, rows: Vec<Row>) -> Self {
        Batch {
            number,
            offset,
            columns,
            rows,
            ts: chrono::Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.rows.iter().map(|r| r.size_bytes()).sum()
    }

    pub fn manifest(&self) -> Manifest {
        Manifest {
            row_count: self.rows.len(),
            size_bytes: self.size_bytes(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}
