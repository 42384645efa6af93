pub mod config;
pub mod extract;
pub mod load;
pub mod migration;
pub mod report;
pub mod test_utils;
pub mod translate;
