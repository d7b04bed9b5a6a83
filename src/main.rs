#![forbid(unsafe_code)]

use lazy_static::lazy_static;
use log::{error, info};
use poem::{handler, listener::TcpListener, Route};
use poem_openapi::OpenApiService;

// Greeting service utilities
use crate::utils::config::{init_log, init_runtime_context, RuntimeCtx, DEFAULT_HTTP_ADDR, HTTP_PORT};
use crate::utils::errors::Errors;
use crate::v1::greet::hello::HelloApi;
use crate::v1::greet::version::VersionApi;

// Modules
mod utils;
mod v1;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "GreetServer"; // for poem logging

// From cargo.toml.
const SERVER_VERSION : Option<&str> = option_env!("CARGO_PKG_VERSION");

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Lazily initialize the runtime context so that it has a 'static lifetime.
// Reading the configuration also selects and constructs the counter store
// backend.  We exit if we can't read our parameters.
lazy_static! {
    static ref RUNTIME_CTX: RuntimeCtx = init_runtime_context();
}

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    // --------------- Initialize Greet Server --------
    // Announce ourselves.
    println!("Starting greet_server!");

    // Initialize the server.
    greet_init();

    // --------------- Main Loop Set Up ---------------
    // The listening port is part of the service contract and is not configurable.
    let addr = format!("{}:{}", DEFAULT_HTTP_ADDR, HTTP_PORT);

    // ------------------ Main Loop -------------------
    // A failure to bind the port is fatal; we log it and exit non-zero.
    match poem::Server::new(TcpListener::bind(addr))
        .name(SERVER_NAME)
        .run(build_app())
        .await
    {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{}", Errors::ListenerTerminated(e.to_string()));
            Err(e)
        }
    }
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// build_app:
// ---------------------------------------------------------------------------
/** Assemble the route table served by the main loop.  The liveness endpoint
 * answers every method at the root path; the greeting and version endpoints
 * are OpenAPI routes nested below it.
 */
fn build_app() -> Route {
    let server_url = format!("http://{}:{}", DEFAULT_HTTP_ADDR, HTTP_PORT);
    let title = "Greet Server";
    let version = SERVER_VERSION.unwrap_or("unknown");

    // The combined service generates the openapi spec and the swagger ui.
    let api_service =
        OpenApiService::new((HelloApi, VersionApi), title, version).server(server_url.clone());
    let spec = api_service.spec_endpoint();
    let spec_yaml = api_service.spec_endpoint_yaml();
    let ui = api_service.swagger_ui();

    // A nest at the root would swallow the exact-match liveness path, so each
    // API path gets its own explicit mount instead.
    let hello_routes = OpenApiService::new(HelloApi, title, version).server(server_url.clone());
    let version_routes = OpenApiService::new(VersionApi, title, version).server(server_url);

    Route::new()
        .at("/", liveness)
        .nest_no_strip("/hello", hello_routes)
        .nest_no_strip("/version", version_routes)
        .at("/spec", spec)
        .at("/spec_yaml", spec_yaml)
        .nest("/docs", ui)
}

// ---------------------------------------------------------------------------
// greet_init:
// ---------------------------------------------------------------------------
/** Initialize all subsystems and data structures other than those needed
 * to configure the main loop processor.
 */
fn greet_init() {
    // Configure our log.
    init_log();

    // Force the reading of input parameters and initialization of the runtime
    // context, which also constructs the configured counter store backend.
    info!("{}", Errors::InputParms(format!("{:#?}", *RUNTIME_CTX)));

    // Log build info.
    print_version_info();
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    info!("{}.", format!("\n*** Running greet_server version={} on host={}",
                        SERVER_VERSION.unwrap_or("unknown"),
                        RUNTIME_CTX.hostname),
    );
}

// ***************************************************************************
//                            Liveness Endpoint
// ***************************************************************************
// ---------------------------------------------------------------------------
// liveness:
// ---------------------------------------------------------------------------
// Registered with Route::at directly so it answers every HTTP method.
// No side effects.
#[handler]
fn liveness() -> &'static str {
    "OK"
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use poem::test::TestClient;

    // Build the body the hello endpoint is expected to return.  Hostname and
    // node name come from the same runtime context the handler reads.
    fn expected_body(greeting: &str, times_seen: u64) -> String {
        let mut s = format!("Hello from {}!\n", RUNTIME_CTX.hostname);
        if let Some(node) = &RUNTIME_CTX.node_name {
            s.push_str(&format!("Hello from node {:?}!\n", node));
        }
        s.push_str(&format!("I have seen {:?} {} times.\n", greeting, times_seen));
        s.push_str(&format!("Version: {}\n", env!("CARGO_PKG_VERSION")));
        s
    }

    #[tokio::test]
    async fn liveness_always_returns_ok() {
        let cli = TestClient::new(build_app());

        let resp = cli.get("/").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("OK").await;

        // Any method and any query string get the same answer.
        let resp = cli.post("/").query("greeting", &"ignored").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("OK").await;

        let resp = cli.delete("/").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("OK").await;
    }

    #[tokio::test]
    async fn hello_reports_previous_counts_in_sequence() {
        let cli = TestClient::new(build_app());

        // hi, hi, yo, hi must report 0, 1, 0, 2.
        for (greeting, times_seen) in
            [("seq-hi", 0), ("seq-hi", 1), ("seq-yo", 0), ("seq-hi", 2)]
        {
            let resp = cli.get("/hello").query("greeting", &greeting).send().await;
            resp.assert_status_is_ok();
            resp.assert_text(expected_body(greeting, times_seen)).await;
        }
    }

    #[tokio::test]
    async fn absent_and_empty_greeting_share_one_counter() {
        let cli = TestClient::new(build_app());

        // No greeting parameter at all.
        let resp = cli.get("/hello").send().await;
        resp.assert_status_is_ok();
        resp.assert_text(expected_body("", 0)).await;

        // An explicitly empty greeting lands in the same bucket.
        let resp = cli.get("/hello").query("greeting", &"").send().await;
        resp.assert_status_is_ok();
        resp.assert_text(expected_body("", 1)).await;
    }

    #[tokio::test]
    async fn version_endpoint_is_served() {
        let cli = TestClient::new(build_app());
        let resp = cli.get("/version").send().await;
        resp.assert_status_is_ok();
    }

    #[tokio::test]
    async fn liveness_and_api_routes_coexist() {
        let cli = TestClient::new(build_app());

        // The root liveness path must stay reachable alongside the API mounts.
        let resp = cli.get("/").send().await;
        resp.assert_status_is_ok();
        resp.assert_text("OK").await;

        let resp = cli.get("/hello").query("greeting", &"coexist").send().await;
        resp.assert_status_is_ok();

        let resp = cli.get("/spec").send().await;
        resp.assert_status_is_ok();
    }
}
