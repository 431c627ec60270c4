//! Value-exchange data model: addresses, values, user identities, coded
//! errors and the request/response pair exchanged with the transport.

pub mod address;
pub mod coded;
pub mod request;
pub mod response_error;
pub mod severity;
pub mod user;
pub mod value;

pub use address::{Address, AddressError};
pub use request::{RequestParams, RequestType, ValueRequest, ValueResponse};
pub use response_error::ResponseError;
pub use severity::{Severity, compare_severity};
pub use user::{Identity, ServiceUser, TreeUser};
pub use value::{SERVER_CACHE_TAG, Value};
