#![forbid(unsafe_code)]

use poem_openapi::{ OpenApi, payload::Json, Object };

use crate::RUNTIME_CTX;

// From cargo.toml.
const SERVER_VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

// ***************************************************************************
//                          Request/Response Definiions
// ***************************************************************************
pub struct VersionApi;

#[derive(Object)]
struct RespVersion
{
    result_code: String,
    result_msg: String,
    server_version: String,
    hostname: String,
    node_name: String,
}

// ***************************************************************************
//                             OpenAPI Endpoint
// ***************************************************************************
#[OpenApi]
impl VersionApi {
    #[oai(path = "/version", method = "get")]
    async fn get_version(&self) -> Json<RespVersion> {
        Json(RespVersion::new("0", "success"))
    }
}

// ***************************************************************************
//                          Request/Response Methods
// ***************************************************************************
impl RespVersion {
    fn new(result_code: &str, result_msg: &str) -> Self {
        Self {result_code: result_code.to_string(),
              result_msg: result_msg.to_string(),
              server_version: SERVER_VERSION.unwrap_or("unknown").to_string(),
              hostname: RUNTIME_CTX.hostname.clone(),
              node_name: RUNTIME_CTX.node_name.clone().unwrap_or_default(),
        }
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_response_reports_success() {
        let resp = RespVersion::new("0", "success");
        assert_eq!(resp.result_code, "0");
        assert_eq!(resp.server_version, env!("CARGO_PKG_VERSION"));
        assert!(!resp.hostname.is_empty());
    }
}
