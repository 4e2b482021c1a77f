use std::sync::Arc;

use serde_json::json;
use simple_api_client::{ApiClient, ClientOptions, Method, RequestOptions, TracingLogger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let host = std::env::var("API_CLIENT_HOST")?;
    let mut client = ApiClient::new(host, Arc::new(TracingLogger))?.with_options(ClientOptions {
        max_retries: 3,
        ..ClientOptions::default()
    });

    if let Ok(token) = std::env::var("API_CLIENT_BEARER_TOKEN") {
        client.add_bearer_auth(&token)?;
    }

    let created = client
        .post("/users", json!({"name": "Kit"}))
        .await?;
    println!("{created}");

    let listed = client
        .send(
            Method::Get,
            "/users",
            RequestOptions::new().query("page", "1").max_retries(5),
        )
        .await?;

    if listed.is_success() {
        println!("{}", listed);
    } else {
        eprintln!(
            "listing failed ({}): {}",
            listed.status_code(),
            listed.error().unwrap_or("unknown error")
        );
    }

    Ok(())
}
