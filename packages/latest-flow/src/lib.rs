#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub use config::*;
pub use emitter::*;
pub use epoch::Epoch;
pub use error::*;
pub use ext::*;
pub use sink::TransformerState;
pub use stream::*;
pub use task::TaskContext;
pub use transformer::*;

mod config;
mod emitter;
mod epoch;
mod error;
mod ext;
mod sink;
mod stream;
mod task;
mod transformer;
