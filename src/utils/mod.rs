pub mod error;
pub mod logging;
pub mod response;

pub use error::{AppError, DispatchError, DispatchResult};
pub use response::{BaseResponse, ErrorResponse};
