//! bleephub core
//!
//! Domain types shared by every bleephub crate: the workflow definition
//! model and its YAML parser, the runtime workflow/job model, the `if:`
//! expression evaluator, job output resolution and the wire-level token
//! types the Actions runner deserializes.

pub mod error;
pub mod expressions;
pub mod ids;
pub mod jwt;
pub mod outputs;
pub mod run;
pub mod token;
pub mod workflow;

pub use error::{Error, Result};
pub use ids::*;
