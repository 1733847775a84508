mod block_store;
mod database;
mod ledger;

pub use {block_store::BlockStore, database::Database, ledger::Ledger};

/// SQLite stores integers as i64; indices never get close to the limit.
pub(crate) fn sql_index(index: u64) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}
