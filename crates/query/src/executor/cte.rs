//! Common table expressions.
//!
//! Each CTE body runs at most once per execution of its `WITH`: the first
//! scan that opens materializes it into a shared buffer and every later scan
//! reads that buffer. Closing the `WITH` drops the rows.

use std::cell::RefCell;
use std::rc::Rc;

use tern_core::Row;
use tracing::debug;

use super::node::Operator;
use crate::error::QueryResult;

/// Rows of one CTE, computed on demand.
pub(crate) struct CteBuffer {
    name: String,
    source: Option<Box<Operator>>,
    rows: Option<Rc<Vec<Row>>>,
}

pub(crate) type SharedCte = Rc<RefCell<CteBuffer>>;

impl CteBuffer {
    pub(crate) fn new(name: impl Into<String>, source: Box<Operator>) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
            rows: None,
        }
    }

    /// A buffer with fixed contents.
    #[cfg(test)]
    pub(crate) fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            name: String::new(),
            source: None,
            rows: Some(Rc::new(rows)),
        }
    }

    fn rows(&mut self) -> QueryResult<Rc<Vec<Row>>> {
        if let Some(rows) = &self.rows {
            return Ok(Rc::clone(rows));
        }
        let mut rows = Vec::new();
        if let Some(source) = &mut self.source {
            source.open(None)?;
            rows = source.drain()?;
            source.close();
        }
        debug!(cte = %self.name, rows = rows.len(), "materialized");
        let rows = Rc::new(rows);
        self.rows = Some(Rc::clone(&rows));
        Ok(rows)
    }

    /// Drops computed rows so the next scan recomputes them.
    fn release(&mut self) {
        if self.source.is_some() {
            self.rows = None;
        }
    }
}

/// Runs the main query of a `WITH`; the CTEs are pulled in by its scans.
pub(crate) struct WithExec {
    ctes: Vec<SharedCte>,
    body: Box<Operator>,
}

impl WithExec {
    pub(crate) fn new(ctes: Vec<SharedCte>, body: Box<Operator>) -> Self {
        Self { ctes, body }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.body.open(outer)
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        self.body.next()
    }

    pub(crate) fn close(&mut self) {
        self.body.close();
        for cte in &self.ctes {
            cte.borrow_mut().release();
        }
    }
}

/// Reads a materialized CTE.
pub(crate) struct CteScanExec {
    buffer: SharedCte,
    rows: Option<Rc<Vec<Row>>>,
    position: usize,
}

impl CteScanExec {
    pub(crate) fn new(buffer: SharedCte) -> Self {
        Self {
            buffer,
            rows: None,
            position: 0,
        }
    }

    pub(crate) fn open(&mut self, _outer: Option<&Row>) -> QueryResult<()> {
        self.rows = Some(self.buffer.borrow_mut().rows()?);
        self.position = 0;
        Ok(())
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        let row = self
            .rows
            .as_ref()
            .and_then(|rows| rows.get(self.position))
            .cloned();
        if row.is_some() {
            self.position += 1;
        }
        Ok(row)
    }

    pub(crate) fn close(&mut self) {
        self.rows = None;
    }
}
