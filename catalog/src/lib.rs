//! Declarative parts of the benchmark: the TPC-H schema, the value model shared by generated
//! rows and query results, the 22 benchmark queries and the resolution of logical table names.

pub mod names;
pub mod queries;
pub mod schema;
pub mod value;

pub use names::{ResolveError, TableMap};
pub use queries::{Query, CATALOG, QUERY_COUNT};
pub use schema::{ConstraintViolation, Entity, TableDef};
pub use value::{Row, Value};
