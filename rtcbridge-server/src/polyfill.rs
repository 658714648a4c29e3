//! Plain HTTP side of the bridge port.

use rtcbridge_protocol::{HttpRequest, HttpResponse};
use rtcbridge_socket::HttpResponder;

const NOT_FOUND_PAGE: &str = "<!doctype html><html><body><h1>404 Not Found</h1></body></html>";

/// Serves the page-side script at one path and 404 everywhere else.
#[derive(Debug, Clone)]
pub struct PolyfillResponder {
    path: String,
    script: String,
}

impl PolyfillResponder {
    pub fn new(path: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            script: script.into(),
        }
    }

    /// Script used when none is configured. It only publishes the bridge URL.
    pub fn stub_script(bridge_url: &str) -> String {
        format!("window.rtcbridgeUrl = {};\n", serde_json::Value::from(bridge_url))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl HttpResponder for PolyfillResponder {
    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        if request.method == "GET" && request.path() == self.path {
            tracing::debug!("Serving polyfill script ({} bytes)", self.script.len());
            return HttpResponse::new(200)
                .with_header("Content-Type", "text/javascript")
                .with_header("Access-Control-Allow-Origin", "*")
                .with_body(self.script.clone());
        }
        tracing::debug!("No resource for {} {}", request.method, request.url);
        HttpResponse::new(404)
            .with_header("Content-Type", "text/html")
            .with_body(NOT_FOUND_PAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, url: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            url: url.to_string(),
            version: "HTTP/1.1".to_string(),
            ..HttpRequest::default()
        }
    }

    #[test]
    fn test_serves_script() {
        let responder = PolyfillResponder::new("/owr.js", "console.log(1);");
        let response = responder.respond(&request("GET", "/owr.js?v=2"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "console.log(1);");
        assert!(response
            .headers
            .contains(&("Content-Type".to_string(), "text/javascript".to_string())));
        assert!(response
            .headers
            .contains(&("Access-Control-Allow-Origin".to_string(), "*".to_string())));
    }

    #[test]
    fn test_other_requests_get_404() {
        let responder = PolyfillResponder::new("/owr.js", "");
        for (method, url) in [("GET", "/"), ("GET", "/owr.jsx"), ("POST", "/owr.js")] {
            let response = responder.respond(&request(method, url));
            assert_eq!(response.status, 404);
            assert_eq!(response.body, NOT_FOUND_PAGE);
        }
    }

    #[test]
    fn test_stub_script_quotes_url() {
        assert_eq!(
            PolyfillResponder::stub_script("ws://localhost:10717/bridge"),
            "window.rtcbridgeUrl = \"ws://localhost:10717/bridge\";\n"
        );
    }
}
