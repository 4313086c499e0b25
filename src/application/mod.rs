//! Application Layer
//!
//! Region selection and request execution on top of the domain ports.

pub mod region_selector;
pub mod request_executor;

pub use region_selector::{RegionSelector, HISTORY_CAPACITY};
pub use request_executor::{
    ConnectivityReport, ExecutorConfig, ExternalIp, RequestExecutor, RequestOptions, ResponseBody,
    RoutedResponse,
};
