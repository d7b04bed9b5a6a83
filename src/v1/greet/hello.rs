#![forbid(unsafe_code)]

use poem::Request;
use poem_openapi::{ OpenApi, payload::PlainText, param::Query, ApiResponse };
use anyhow::Result;
use std::env;
use log::error;

use crate::utils::config::{ENV_CONFIG, ENV_SECRET};
use crate::utils::counter::CounterStore;
use crate::utils::greet_utils::{self, RequestDebug};

use crate::RUNTIME_CTX;

// From cargo.toml.
const SERVER_VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

// ***************************************************************************
//                          Request/Response Definiions
// ***************************************************************************
pub struct HelloApi;

struct ReqHello
{
    greeting: String,
}

// Implement the debug record trait for logging.
impl RequestDebug for ReqHello {
    type Req = ReqHello;
    fn get_request_info(&self) -> String {
        let mut s = String::with_capacity(64);
        s.push_str("  Request body:");
        s.push_str("\n    greeting: ");
        s.push_str(&self.greeting);
        s
    }
}

// ------------------- HTTP Status Codes -------------------
#[derive(Debug, ApiResponse)]
enum HelloResponse {
    #[oai(status = 200)]
    Http200(PlainText<String>),
    #[oai(status = 503)]
    Http503(PlainText<String>),
}

fn make_http_200(body: String) -> HelloResponse {
    HelloResponse::Http200(PlainText(body))
}
fn make_http_503(msg: String) -> HelloResponse {
    HelloResponse::Http503(PlainText(msg))
}

// ***************************************************************************
//                             OpenAPI Endpoint
// ***************************************************************************
#[OpenApi]
impl HelloApi {
    #[oai(path = "/hello", method = "get")]
    async fn get_hello(&self, http_req: &Request, greeting: Query<Option<String>>) -> HelloResponse {
        // An absent greeting parameter shares the unnamed-greeting bucket
        // with the explicitly empty one.  No further validation.
        let req = ReqHello { greeting: greeting.0.unwrap_or_default() };

        // Conditional logging depending on log level.
        greet_utils::debug_request(http_req, &req);

        // -------------------- Process Request ----------------------
        process_or_error(&RUNTIME_CTX.counter, &req).await
    }
}

// ***************************************************************************
//                          Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// process_or_error:
// ---------------------------------------------------------------------------
/** Run the request against the given counter store and map any failure onto
 * a service-unavailable response.  Only a shared counter store failure
 * reaches the error arm; it is reported to the caller and the process keeps
 * serving.
 */
async fn process_or_error(store: &impl CounterStore, req: &ReqHello) -> HelloResponse {
    match process(store, req).await {
        Ok(r) => r,
        Err(e) => {
            let msg = "ERROR: ".to_owned() + e.to_string().as_str();
            error!("{}", msg);
            make_http_503(msg)
        }
    }
}

// ---------------------------------------------------------------------------
// process:
// ---------------------------------------------------------------------------
/** Count this occurrence of the greeting and render the response.  The
 * reported count is the value before this request's increment, so the first
 * request for a new key reports 0.
 */
async fn process(store: &impl CounterStore, req: &ReqHello) -> Result<HelloResponse> {
    let times_seen = store.increment(&req.greeting).await?;
    Ok(make_http_200(render_greeting(&req.greeting, times_seen)))
}

// ---------------------------------------------------------------------------
// render_greeting:
// ---------------------------------------------------------------------------
/** Build the multi-line greeting body from the runtime context and the
 * pre-increment occurrence count.
 */
fn render_greeting(greeting: &str, times_seen: u64) -> String {
    let mut body = String::with_capacity(128);
    body.push_str(&format!("Hello from {}!\n", RUNTIME_CTX.hostname));

    // The demo line leaks whatever CONFIG and SECRET hold, on purpose.  It is
    // rendered only when the insecure-demo flag was set explicitly.
    if RUNTIME_CTX.insecure_demo {
        body.push_str(&format!("Our config is {:?} and our secret is {:?}\n",
            env::var(ENV_CONFIG).unwrap_or_default(),
            env::var(ENV_SECRET).unwrap_or_default()));
    }

    if let Some(node) = &RUNTIME_CTX.node_name {
        body.push_str(&format!("Hello from node {:?}!\n", node));
    }
    body.push_str(&format!("I have seen {:?} {} times.\n", greeting, times_seen));
    body.push_str(&format!("Version: {}\n", SERVER_VERSION.unwrap_or("unknown")));
    body
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::counter::{LocalCounterStore, SharedCounterStore};
    use std::time::Duration;

    fn times_seen_line(resp: HelloResponse) -> String {
        let HelloResponse::Http200(PlainText(body)) = resp else {
            panic!("expected a 200 greeting response");
        };
        body.lines()
            .find(|line| line.starts_with("I have seen"))
            .expect("greeting body has a times-seen line")
            .to_string()
    }

    #[tokio::test]
    async fn first_greeting_reports_zero_times_seen() {
        let store = LocalCounterStore::new();
        let req = ReqHello { greeting: "handler-first".to_string() };
        let resp = process(&store, &req).await.unwrap();
        assert_eq!(
            times_seen_line(resp),
            "I have seen \"handler-first\" 0 times."
        );
    }

    #[tokio::test]
    async fn repeated_greetings_count_up() {
        let store = LocalCounterStore::new();
        let req = ReqHello { greeting: "handler-repeat".to_string() };
        for expected in 0..3 {
            let resp = process(&store, &req).await.unwrap();
            assert_eq!(
                times_seen_line(resp),
                format!("I have seen \"handler-repeat\" {} times.", expected)
            );
        }
    }

    #[tokio::test]
    async fn greeting_body_has_host_and_version_lines() {
        let store = LocalCounterStore::new();
        let req = ReqHello { greeting: "handler-body".to_string() };
        let HelloResponse::Http200(PlainText(body)) = process(&store, &req).await.unwrap() else {
            panic!("expected a 200 greeting response");
        };
        assert!(body.starts_with(&format!("Hello from {}!\n", RUNTIME_CTX.hostname)));
        assert!(body.ends_with(&format!("Version: {}\n", env!("CARGO_PKG_VERSION"))));
    }

    #[tokio::test]
    async fn unreachable_shared_store_maps_to_503() {
        // Port 9 is the discard service; nothing listens there in CI.
        let store =
            SharedCounterStore::new("http://127.0.0.1:9", Duration::from_millis(250)).unwrap();
        let req = ReqHello { greeting: "handler-down".to_string() };

        let HelloResponse::Http503(PlainText(body)) = process_or_error(&store, &req).await else {
            panic!("expected a 503 response from an unreachable store");
        };
        assert!(body.starts_with("ERROR: "));
        assert!(!body.is_empty());
    }
}
