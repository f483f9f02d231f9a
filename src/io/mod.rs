pub mod annotation_record;
pub mod cohort;
pub mod config;
pub mod output;

pub use annotation_record::{AnnotationRecord, ShapeRecord};
pub use config::{AnalysisConfig, CsvConfig};
