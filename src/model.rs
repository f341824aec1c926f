//! Core data model.
//!
//! A work item is one captured question moving through the answer and
//! speech stages. Everything the pipeline knows about it lives in one row.

pub mod work;
