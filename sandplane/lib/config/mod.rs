//! Configuration types and defaults.

mod control_plane;
mod defaults;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use control_plane::*;
pub use defaults::*;
