use crate::types::Cell;

/// A row of values ordered like the columns of the statement that produced or consumes it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableRow {
    pub values: Vec<Cell>,
}

impl TableRow {
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<C: Into<Cell>> FromIterator<C> for TableRow {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        TableRow::new(iter.into_iter().map(Into::into).collect())
    }
}
