//! services/twin_data/src/stores/mod.rs
//!
//! Typed record stores over the `DocumentStore` port. Every record is
//! partitioned by its owning twin's id.

mod collection;

pub mod books;
pub mod courses;
pub mod jobs;
pub mod mortgages;

pub use books::{BookQuery, BookStore};
pub use courses::CourseStore;
pub use jobs::{JobOpportunityStore, JobQuery};
pub use mortgages::MortgageStore;
