pub mod cloud;
pub mod compression;
pub mod csv;
pub mod parquet;
