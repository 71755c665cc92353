//! Scene management.
//!
//! [`ViewerState`] holds everything the controls change and needs no GPU.
//! [`BrainstemScene`] owns the renderers and turns that state into frames.

pub mod brainstem_scene;
pub mod state;
pub mod traits;

pub use brainstem_scene::BrainstemScene;
pub use state::ViewerState;
pub use traits::Scene;
