// Engine layer: rule compilation, group evaluation, orchestration, dispatch

//! # Engine
//!
//! The engine owns the non-trivial semantics of the automation core:
//!
//! - [`compiler`]: turns a group's rule tree into one parameterized SQL
//!   query over `processed_entities`
//! - [`evaluator`]: runs the compiled query and replaces the group's
//!   membership inside a single transaction, with status logging
//! - [`orchestrator`]: expands a triggered workflow into per-member,
//!   per-step executor tasks
//! - [`storage`]: the Postgres layer (schema bootstrap, membership reads,
//!   instance reads)
//! - [`nats_bus`]: the JetStream adapter (durable publish, stream
//!   auto-provisioning, consumers)
//! - [`dispatch`]: the executor-facing delivery contract (subjects,
//!   durable consumer conventions, the executor run loop)
//! - [`events`]: the group-update event router feeding the orchestrator

pub mod compiler;
pub mod dispatch;
pub mod evaluator;
pub mod events;
pub mod nats_bus;
pub mod orchestrator;
pub mod storage;

#[cfg(test)]
pub(crate) mod testutil;
