//! A service-specific client built by wrapping `ApiClient`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use simple_api_client::{ApiClient, ApiResponse, TracingLogger};

#[derive(Debug, Deserialize)]
struct Pupil {
    id: u64,
    name: String,
}

struct PupilsApi {
    client: ApiClient,
}

impl PupilsApi {
    fn new(host: &str, token: &str, signing_key: &str) -> anyhow::Result<Self> {
        let mut client = ApiClient::new(host, Arc::new(TracingLogger))?;
        client.add_bearer_auth(token)?;
        client.add_signed_cookie(
            "client-details",
            &json!({"service": "pupils-demo"}),
            "pupils>school",
            signing_key,
        )?;
        Ok(Self { client })
    }

    async fn pupil(&self, id: u64) -> anyhow::Result<Option<Pupil>> {
        let response = self.client.get(&format!("/pupils/{id}")).await?;
        Ok(decode(&response))
    }

    async fn rename(&self, id: u64, name: &str) -> anyhow::Result<ApiResponse> {
        Ok(self
            .client
            .patch(&format!("/pupils/{id}"), json!({"name": name}))
            .await?)
    }
}

fn decode(response: &ApiResponse) -> Option<Pupil> {
    if !response.is_success() {
        tracing::warn!(status = response.status_code(), error = ?response.error(), "lookup failed");
        return None;
    }
    response.json().ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let host = std::env::var("API_CLIENT_HOST")?;
    let token = std::env::var("API_CLIENT_BEARER_TOKEN")?;
    let key = std::env::var("COOKIE_SIGNING_KEY")?;
    let pupils = PupilsApi::new(&host, &token, &key)?;

    if let Some(pupil) = pupils.pupil(1).await? {
        println!("{} -> {}", pupil.id, pupil.name);
        let renamed = pupils.rename(pupil.id, "Renamed").await?;
        println!("{renamed}");
    }

    Ok(())
}
