use std::time::Duration;

/// Shared client for the chat and embedding endpoints. Proxy discovery is
/// opt-in; some sandboxed environments panic inside system proxy lookup, so
/// the default build disables it.
pub fn build_http_client(timeout: Duration) -> reqwest::Client {
    let allow_system_proxy = std::env::var("SENTISIM_ENABLE_SYSTEM_PROXY")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    if allow_system_proxy {
        if let Ok(client) = attempt_build(timeout, false) {
            return client;
        }
        tracing::warn!(
            "HTTP client initialization with system proxy discovery failed; retrying with no_proxy"
        );
    }

    match attempt_build(timeout, true) {
        Ok(client) => client,
        Err(error) => panic!("Failed to initialize HTTP client: {}", error),
    }
}

fn attempt_build(timeout: Duration, no_proxy: bool) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if no_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
