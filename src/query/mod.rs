//! Query engine for relcms
//!
//! Translates filters and sorts into SQL, runs CRUD operations against a
//! connection and resolves relationships to the requested depth.

pub mod args;
mod executor;
pub mod filter;
pub mod json;
mod resolve;

pub use args::{
    CreateArgs, DeleteArgs, FindArgs, FindByIdArgs, FindOneArgs, PaginatedDocs, UpdateArgs, WhereArgs,
};
pub use executor::{Engine, EngineOptions};
pub use filter::{translate_filter, translate_sort, Scope};
pub use json::translate_json_path;
