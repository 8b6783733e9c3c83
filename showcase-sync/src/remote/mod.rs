//! The remote backend boundary.
//!
//! The sync layer only talks to the backend through [`RemoteSource`]:
//! typed CRUD over the `projects`, `profiles`, `tags` and `likes` tables
//! plus a change feed per table. [`RestRemote`] speaks PostgREST over
//! HTTP; [`mock::MockRemote`] keeps tables in memory.

pub mod mock;
mod processor;
mod rest;
mod source;

pub use processor::{RemoteRequestProcessor, parse_endpoint};
pub use rest::RestRemote;
pub use source::{ChangeEvent, ChangeKind, Filter, Order, Record, RemoteSource};
