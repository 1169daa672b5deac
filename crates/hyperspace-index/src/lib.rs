#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod factory;
pub mod filter;
pub mod flat;
pub mod hnsw;

pub use error::IndexError;
pub use factory::{IndexFactory, IndexHandle};
pub use filter::FilterIndex;
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
