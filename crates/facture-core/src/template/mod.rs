//! Vendor templates: regex matching, persistence and mapping learning.

pub mod fields;
mod learning;
mod matcher;
mod store;

pub use learning::{apply_mappings, learn_mappings};
pub use matcher::match_template;
pub use store::TemplateStore;
