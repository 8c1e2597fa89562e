//! Per-doctor diagnosis and procedure-referral counts from a SQLite claims
//! database, feeding downstream doctor ranking.

pub mod aggregate;
pub mod export;
pub mod loader;
pub mod query;
pub mod schema;

pub use aggregate::{DoctorAggregate, DoctorCounts, DoctorTable};
pub use export::OutputFormat;
pub use loader::{
    ClaimsFilter, DerivedRowCounts, DiagnosisProceduresLoader, ScopeExit, with_loader,
};
pub use schema::ClaimsSchema;
