pub mod orchestration;
pub mod status;

pub use orchestration::*;
pub use status::*;
