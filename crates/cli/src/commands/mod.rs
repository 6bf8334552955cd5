pub mod binaries;
pub mod decompile;
pub mod project;
pub mod runs;
pub mod sections;
pub mod specs;
pub mod util;

pub use binaries::*;
pub use decompile::*;
pub use project::*;
pub use runs::*;
pub use sections::*;
pub use specs::*;
pub use util::*;
