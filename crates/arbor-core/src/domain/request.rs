use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::now_ts;
use crate::ports::config::{ConfigProvider, keys, resolve};
use crate::wire::codec::{self, CodecError};

use super::address::{Address, AddressError};
use super::response_error::ResponseError;
use super::user::TreeUser;
use super::value::Value;

/// Kind of a value request. Anything else fails validation on decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    #[default]
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "EXECUTE")]
    Execute,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestType::Get => "GET",
            RequestType::Put => "PUT",
            RequestType::Execute => "EXECUTE",
        };
        f.write_str(s)
    }
}

/// Optional fields of a [`ValueRequest`]; whatever is left unset is filled
/// by the normalizing constructor.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub time_of_data: Option<f64>,
    pub time_of_data_tolerance: Option<f64>,
    /// Absolute epoch deadline. When unset, resolved as
    /// `now + default_request_timeout` from configuration.
    pub request_timeout: Option<f64>,
    pub request_type: RequestType,
    pub request_data: BTreeMap<String, rmpv::Value>,
    pub user: Option<TreeUser>,
    pub cycle_query: bool,
}

/// An addressed GET/PUT/EXECUTE request for a named value.
///
/// `request_timeout`, once resolved, is an absolute epoch deadline, never a
/// duration. `index` is a transport-local ordinal and does not cross the
/// wire. `clone` is a deep copy: the address segments, the user and the data
/// mapping of the clone are independent of the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRequest {
    pub address: Address,

    #[serde(default = "now_ts")]
    pub time_of_data: f64,

    #[serde(default)]
    pub time_of_data_tolerance: f64,

    #[serde(default)]
    pub request_timeout: f64,

    #[serde(default)]
    pub request_type: RequestType,

    #[serde(default)]
    pub request_data: BTreeMap<String, rmpv::Value>,

    #[serde(default)]
    pub user: TreeUser,

    #[serde(default)]
    pub cycle_query: bool,

    #[serde(skip)]
    pub index: i64,
}

impl ValueRequest {
    /// Normalizing constructor: missing `time_of_data` becomes now, missing
    /// tolerance and timeout are filled from configuration (resolved for the
    /// `ValueRequest` component), a missing user becomes the anonymous
    /// default identity.
    pub fn new(address: Address, params: RequestParams, cfg: &dyn ConfigProvider) -> Self {
        let now = now_ts();
        let request_timeout = params.request_timeout.unwrap_or_else(|| {
            now + resolve(cfg, "ValueRequest", keys::DEFAULT_REQUEST_TIMEOUT, 30.0)
        });
        let time_of_data_tolerance = params
            .time_of_data_tolerance
            .unwrap_or_else(|| resolve(cfg, "ValueRequest", keys::TIME_OF_DATA_TOLERANCE, 0.0));
        Self {
            address,
            time_of_data: params.time_of_data.unwrap_or(now),
            time_of_data_tolerance,
            request_timeout,
            request_type: params.request_type,
            request_data: params.request_data,
            user: params.user.unwrap_or_default(),
            cycle_query: params.cycle_query,
            index: 0,
        }
    }

    /// Like [`ValueRequest::new`] with a raw dotted address.
    pub fn parse(
        address: &str,
        params: RequestParams,
        cfg: &dyn ConfigProvider,
    ) -> Result<Self, AddressError> {
        Ok(Self::new(Address::parse(address)?, params, cfg))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::pack(self)
    }

    /// Decode from the wire mapping. Unknown keys are ignored; a missing
    /// address or an unknown request type is an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::unpack(bytes)
    }
}

/// Answer to a single [`ValueRequest`]. `status == false` means the request
/// failed and `error` carries the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueResponse {
    pub address: Address,

    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default = "default_status")]
    pub status: bool,

    #[serde(default)]
    pub error: Option<ResponseError>,
}

fn default_status() -> bool {
    true
}

impl ValueResponse {
    pub fn ok(address: Address, value: Value) -> Self {
        Self {
            address,
            value: Some(value),
            status: true,
            error: None,
        }
    }

    pub fn failed(address: Address, error: ResponseError) -> Self {
        Self {
            address,
            value: None,
            status: false,
            error: Some(error),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::pack(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::unpack(bytes)
    }
}
