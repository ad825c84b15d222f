mod conv;
mod generator;
mod misc;
mod norm;
mod spade;
mod spade_resnet_block;
mod spectral_norm;

pub use conv::*;
pub use generator::*;
pub use misc::*;
pub use norm::*;
pub use spade::*;
pub use spade_resnet_block::*;
pub use spectral_norm::*;
