pub mod common;
pub mod storage;
