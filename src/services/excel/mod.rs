pub mod insights;
pub mod parser;
pub mod schema;
pub mod types;
pub mod utils;

pub use parser::{validate_upload, ExcelParser};
pub use schema::infer_schema;
pub use types::{BasicInsights, ColumnInsight, ColumnKind, NumericSummary, Schema};
