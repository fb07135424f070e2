use axum::{routing::get, Router, body::Body, http::Request};
use tower::ServiceExt;

#[tokio::main]
async fn main() {
    let inner: Router<()> = Router::new().route("/", get(|| async { "hi" }));
    let app = Router::new().nest("/api", inner);
    for path in ["/api", "/api/"] {
        let resp = app.clone().oneshot(Request::builder().uri(path).body(Body::empty()).unwrap()).await.unwrap();
        println!("{} -> {}", path, resp.status());
    }
}
