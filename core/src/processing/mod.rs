pub mod buffer_pool;
pub mod mtd;
pub mod pipeline;
pub mod rd_map;

pub use buffer_pool::BufferPool;
pub use mtd::MtdStage;
pub use pipeline::RdPipeline;
pub use rd_map::RdMapStage;
