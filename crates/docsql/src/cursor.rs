//! Statement execution
//!
//! A [`Cursor`] compiles SQL text, runs the translated command against the
//! connection's store (under its session when one is active) and holds the
//! resulting [`ResultSet`] for reads, or the row count for writes.

use docsql_ir::{Document, InsertCommand, Operation, Params, TranslatedQuery, Value};
use tracing::{debug, Level};

use crate::connection::Connection;
use crate::error::{ProgrammingError, Result};
use crate::log_event;
use crate::result_set::{ColumnDescription, ResultSet, Row};
use crate::session::WriteOp;

pub struct Cursor<'c> {
    connection: &'c Connection,
    result_set: Option<ResultSet>,
    rowcount: i64,
    last_insert_id: Option<Value>,
    arraysize: usize,
    closed: bool,
}

impl<'c> Cursor<'c> {
    pub(crate) fn new(connection: &'c Connection) -> Self {
        Self {
            connection,
            result_set: None,
            rowcount: -1,
            last_insert_id: None,
            arraysize: connection.config().batch_size.max(1),
            closed: false,
        }
    }

    /// Compile and run one statement.
    ///
    /// Any previous result set is released first. Reads leave a result set
    /// to fetch from; writes record the affected row count.
    pub fn execute(&mut self, sql: &str, params: impl Into<Params>) -> Result<&mut Self> {
        self.check_open()?;
        self.reset();

        let params = params.into();
        let query = docsql_ast::compile(sql, &params)?;
        debug!(
            collection = %query.collection,
            command = query.operation.command_name(),
            fingerprint = %query.fingerprint(),
            "Statement translated"
        );

        if query.is_read() {
            self.run_read(query)?;
        } else {
            self.run_write(query)?;
        }
        Ok(self)
    }

    /// Run `sql` once per parameter set. Row counts of writes accumulate.
    pub fn execute_many<I, P>(&mut self, sql: &str, param_sets: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<Params>,
    {
        let mut total: Option<i64> = None;
        for params in param_sets {
            self.execute(sql, params)?;
            if self.rowcount >= 0 {
                total = Some(total.unwrap_or(0) + self.rowcount);
            }
        }
        self.rowcount = total.unwrap_or(-1);
        Ok(self)
    }

    fn run_read(&mut self, query: TranslatedQuery) -> Result<()> {
        let batch_size = self.connection.config().batch_size;
        let store_cursor = match &query.operation {
            Operation::Find(find) => self.connection.find(&query.collection, find, batch_size)?,
            Operation::Aggregate(pipeline) => self.connection.aggregate(&query.collection, pipeline, batch_size)?,
            Operation::Insert(_) | Operation::Update(_) | Operation::Delete(_) => return Ok(()),
        };
        log_event!(
            level: Level::DEBUG,
            event: "statement_executed",
            collection: query.collection,
            command: query.operation.command_name()
        );
        self.result_set = Some(ResultSet::new(
            store_cursor,
            query.columns,
            query.wildcard,
            self.arraysize,
        ));
        Ok(())
    }

    fn run_write(&mut self, query: TranslatedQuery) -> Result<()> {
        let op = match query.operation {
            Operation::Insert(cmd) => WriteOp::Insert(with_generated_ids(cmd)),
            Operation::Update(cmd) => WriteOp::Update(cmd),
            Operation::Delete(cmd) => WriteOp::Delete(cmd),
            Operation::Find(_) | Operation::Aggregate(_) => return Ok(()),
        };
        let is_insert = matches!(op, WriteOp::Insert(_));
        let command = op.name();
        let result = self.connection.write(&query.collection, op)?;

        self.rowcount = result.matched as i64;
        if is_insert {
            self.last_insert_id = result.inserted_ids.last().cloned();
        }
        log_event!(
            level: Level::DEBUG,
            event: "statement_executed",
            collection: query.collection,
            command: command,
            rowcount: self.rowcount
        );
        Ok(())
    }

    pub fn fetch_one(&mut self) -> Result<Option<Row>> {
        self.active_result_set()?.fetch_one()
    }

    /// Up to `size` rows; `arraysize` rows when `size` is `None`.
    pub fn fetch_many(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        let size = size.unwrap_or(self.arraysize);
        self.active_result_set()?.fetch_many(Some(size))
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        self.active_result_set()?.fetch_all()
    }

    /// Column metadata of the current result set; `None` after a write.
    pub fn description(&mut self) -> Result<Option<Vec<ColumnDescription>>> {
        self.check_open()?;
        match self.result_set.as_mut() {
            Some(rs) => Ok(rs.description()?.map(<[ColumnDescription]>::to_vec)),
            None => Ok(None),
        }
    }

    /// Rows affected by the last write; -1 after a read or before any statement.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// `_id` of the last document inserted by this cursor's last statement.
    pub fn last_insert_id(&self) -> Option<&Value> {
        self.last_insert_id.as_ref()
    }

    /// Rows fetched from the current result set so far.
    pub fn rownumber(&self) -> Option<usize> {
        self.result_set.as_ref().map(ResultSet::rownumber)
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    /// Default `fetch_many` size for the next statement. Zero is treated as one.
    pub fn set_arraysize(&mut self, size: usize) {
        self.arraysize = size.max(1);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the result set and any open store cursor. Safe to call twice.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.reset();
        self.closed = true;
    }

    fn reset(&mut self) {
        if let Some(mut rs) = self.result_set.take() {
            rs.close();
        }
        self.rowcount = -1;
        self.last_insert_id = None;
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ProgrammingError::CursorClosed.into());
        }
        Ok(())
    }

    fn active_result_set(&mut self) -> Result<&mut ResultSet> {
        self.check_open()?;
        self.result_set
            .as_mut()
            .ok_or_else(|| ProgrammingError::NoResultSet.into())
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Give every document an `_id` before it leaves the client, so a replayed
/// insert writes the same keys.
fn with_generated_ids(mut cmd: InsertCommand) -> InsertCommand {
    cmd.documents = cmd
        .documents
        .into_iter()
        .map(|doc| {
            if doc.contains_key("_id") {
                return doc;
            }
            let mut with_id = Document::with_capacity(doc.len() + 1);
            with_id.insert("_id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
            with_id.extend(doc);
            with_id
        })
        .collect();
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsql_ir::doc;

    #[test]
    fn test_generated_ids_come_first() {
        let cmd = InsertCommand {
            documents: vec![doc! { "name" => "ann" }, doc! { "_id" => "b", "name" => "bo" }],
        };
        let cmd = with_generated_ids(cmd);
        let first: Vec<&str> = cmd.documents[0].keys().map(String::as_str).collect();
        assert_eq!(first, vec!["_id", "name"]);
        assert_eq!(cmd.documents[1].get("_id"), Some(&Value::from("b")));
    }
}
