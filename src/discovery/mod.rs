//! Image discovery: the kernel that lists images on a resource and the
//! pipeline that runs it.

pub mod kernel;
pub mod pipeline;

pub use kernel::{
    discover_images, read_image_table, write_image_table, DiscoverArgs, ImageRecord,
};
pub use pipeline::{build_discovery_pipeline, module_loads, table_name, Discovery};
