pub mod chart;
pub mod dashboard;
pub mod dataset_store;
pub mod excel;
pub mod filter;
pub mod history;
pub mod report;
pub mod selection;
pub mod state_store;
pub mod workspace;
