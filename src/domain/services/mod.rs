//! Domain services operating purely on entities.

pub mod transforms;

pub use transforms::{
    apply_pipeline, apply_step, calculate_downsample_dimensions, calculate_resize_dimensions,
    process_decoded,
};
