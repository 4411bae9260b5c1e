//! leadpool-ingest library interface
//!
//! The batch pipeline that turns heterogeneous provider lead files into
//! the deduplicated system of record plus the `lead_overlap` projection:
//!
//! reader -> normalize/validate -> dedup -> store -> materialize
//!
//! Exposed as a library so integration tests can drive the pipeline
//! end to end.

pub mod audit;
pub mod dedup;
pub mod materialize;
pub mod normalize;
pub mod reader;
pub mod store;
pub mod validate;
