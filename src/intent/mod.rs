pub mod classifier;
pub mod descriptor;
pub mod router;

pub use classifier::*;
pub use descriptor::*;
pub use router::*;
