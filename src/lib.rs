// Isolation Forest anomaly detection over tables with numeric and text attributes.
// Trees are grown from random samples of observation indices by recursive
// random splitting; an observation's anomaly score is
// 2^(-E[path length] / c(tree_size)), close to 1 for points that are
// isolated after few splits.

pub mod module_data_source;
pub mod module_error;
pub mod module_isolation_forest;
pub mod module_isolation_tree;

pub use module_data_source::data_source::{ColumnarData, DataSource};
pub use module_error::error::{ForestError, Result};
pub use module_isolation_forest::isolation_forest::{ForestParams, GrowJob, IsolationForest};
pub use module_isolation_tree::isolation_tree::{average_path_length, IsolationNode, IsolationTree};
