pub mod file_record;
pub mod storage_statistics;
