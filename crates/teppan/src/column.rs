use crate::device::DevicePtr;

/// One item's data within a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Row {
    pub ptr: DevicePtr,
    pub size: usize,
}

impl Row {
    /// A row of `size` bytes starting at `ptr`
    pub fn new(ptr: DevicePtr, size: usize) -> Self {
        Self { ptr, size }
    }
}

/// An ordered sequence of rows holding one tensor across an invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchedColumn {
    pub rows: Vec<Row>,
}

impl BatchedColumn {
    /// An empty column
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one item
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Drop every row past the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.rows.truncate(len);
    }
}

impl FromIterator<Row> for BatchedColumn {
    fn from_iter<T: IntoIterator<Item = Row>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

/// The columns of one invocation, inputs or outputs.
pub type BatchedColumns = Vec<BatchedColumn>;
