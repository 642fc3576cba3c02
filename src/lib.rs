#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::type_complexity)]
#![deny(clippy::clone_on_ref_ptr)]
#![deny(clippy::trivially_copy_pass_by_ref)]

//! The rowflow execution engine.
//!
//! A transformation is a directed graph of steps. [`topology::build_pieces`]
//! wires the graph into [`RowSet`](rowflow_core::RowSet) queues, and either the
//! thread scheduler ([`topology::Transformation`]) or the cooperative
//! single-threaded scheduler ([`topology::SingleThreadedExecutor`]) drives the
//! step copies until every producer has finished.

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate rowflow_core;

pub mod app;
pub mod cli;
pub mod config;
pub mod context;
pub mod internal_events;
pub mod list;
pub mod step;
pub mod steps;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;
pub mod topology;
pub mod trace;
pub mod validate;

pub use rowflow_core::{Row, RowSet, RowShape, Value, ValueType};

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> String {
    let pkg_version = env!("CARGO_PKG_VERSION");
    let build_desc = option_env!("ROWFLOW_BUILD_DESC");
    match build_desc {
        Some(desc) => format!("{pkg_version} ({desc})"),
        None => pkg_version.to_owned(),
    }
}
