//! Periodic export: the scheduled pipeline and the backend fan-out

mod fanout;
mod pipeline;

pub use fanout::FanoutExporter;
pub use pipeline::ExportPipeline;
