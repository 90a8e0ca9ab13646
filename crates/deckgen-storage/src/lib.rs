// Deckgen Storage
//
// PostgreSQL backend for the deckgen record store.

mod postgres;

pub use postgres::PostgresRecordStore;
