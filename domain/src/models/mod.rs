pub mod configuration;
pub mod docker_image_reference;
pub mod pipeline;
pub mod stage_result;
pub mod trigger;

pub use configuration::*;
pub use docker_image_reference::*;
pub use pipeline::*;
pub use stage_result::*;
pub use trigger::*;
