pub mod read_model;

pub use read_model::{ReadModelRepository, SectionCounter};

#[cfg(any(test, feature = "testing"))]
pub use read_model::MockReadModelRepository;
