pub mod compiler;
pub mod executor;
pub mod plan;
pub mod sql;

pub use compiler::{CompiledQuery, compile};
pub use executor::{QueryResult, QueryRow, execute};
pub use plan::{
    QueryExpression, QueryFilter, QueryFilterSide, QueryJoin, QueryOrder, QueryRequest,
};
