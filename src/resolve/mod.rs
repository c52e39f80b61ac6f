//! Entity resolvers.
//!
//! Each resolver takes a normalized [`Record`](crate::record::Record), looks
//! the entity up by natural key (staged entities first, then the store) and
//! otherwise creates it with placeholder defaults. New or modified entities
//! are staged on the [`ResolutionContext`](crate::context::ResolutionContext).

pub mod author;
pub mod country;
pub mod fund;
pub mod institution;
pub mod keyword;
pub mod paper;
pub mod source;
pub mod subject;

pub use author::resolve_authors;
pub use country::{canonical_country_name, resolve_country};
pub use fund::resolve_fund;
pub use institution::resolve_affiliation;
pub use keyword::{dedup_keywords, resolve_keywords};
pub use paper::assemble_paper;
pub use source::resolve_source;
pub use subject::{resolve_subject, subject_codes};
