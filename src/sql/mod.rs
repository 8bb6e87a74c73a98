//! The host-facing SQL surface: value union, scalar functions, the
//! `VECTOR(D)` type, vector-index DDL, and the top-k plan hook.

pub mod ddl;
pub mod functions;
pub mod planner;
pub mod types;
pub mod value;

pub use ddl::{
    is_vector_ddl, parse_ddl, parse_distance_expr, CreateIndex, DdlStatement, DistanceCall,
    IndexOptions,
};
pub use functions::VectorFunctions;
pub use planner::{explain_decision, PlanDecision, PlanHook, QueryShape, SELECTIVITY_THRESHOLD};
pub use types::{VectorColumn, VectorType};
pub use value::{parse_json_vector, to_json_vector, SqlValue};
