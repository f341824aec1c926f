//! # clipboard-tts
//!
//! Question pipeline coordinated through Postgres change notifications.
//!
//! A question row is inserted by any producer; the answer worker hears
//! `question_pending`, asks an LLM, and writes the answer; the trigger on
//! that write emits `answer_ready`, which the speech worker turns into an
//! audio artifact. Stages share nothing but the table.

pub mod artifact;
pub mod capability;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod listener;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod worker;
