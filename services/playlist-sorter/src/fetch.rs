//!
//! src/fetch.rs  Andrew Belles  Oct 2025
//!
//! Defines methods for hitting the catalog endpoints and
//! returning unparsed data, handling retries, etc.
//!

use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use reqwest::{Client, header, redirect, RequestBuilder};
use tokio::time::sleep;
use tracing::warn;
use url::Url;

use crate::config::{HttpConfig, RetryConfig, SpotifyConfig};
use crate::errors::SorterError;

/// Client building functionality
fn client_helper(http: &HttpConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(http.timeout)
        .connect_timeout(http.connect_timeout)
        .pool_max_idle_per_host(http.pool_max_idle_per_host)
        .pool_idle_timeout(Some(http.pool_idle_timeout))
        .redirect(redirect::Policy::limited(http.max_redirects as usize))
}

pub fn base_client(http: &HttpConfig) -> Result<Client, SorterError> {
    let mut h = header::HeaderMap::new();
    h.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    client_helper(http)
        .default_headers(h)
        .build()
        .map_err(|e| SorterError::Http(format!("build client: {e}")))
}

/// Simple function to generate random wait for http_with_retry
pub(crate) fn generate_backoff(base: Duration, attempt: u8, jitter: bool, rng: &mut SmallRng) ->
    Duration {
    let exp = base * (1_u32 << attempt.min(6));
    if jitter {
        exp + Duration::from_millis(rng.gen_range(50..=200))
    } else {
        exp
    }
}

///
/// Sends a request, retrying transport errors and retryable statuses
/// with exponential backoff. Returns the decoded json body.
///
pub async fn http_with_retry(request: RequestBuilder, retry: &RetryConfig) ->
    Result<serde_json::Value, SorterError> {
    let mut rng = SmallRng::from_entropy();
    let mut attempt = 0_u8;
    loop {
        let response = request.try_clone()
            .ok_or_else(|| SorterError::Http("non-cloneable request".to_string()))?
            .send()
            .await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    // some write endpoints answer 201/204 with an empty body
                    let body = resp.text().await?;
                    if body.trim().is_empty() {
                        return Ok(serde_json::Value::Null);
                    }
                    return Ok(serde_json::from_str(&body)?);
                }
                let body = resp.text().await.unwrap_or_default();
                let retryable = retry.retryable_statuses.contains(&status.as_u16());
                if !retryable || attempt + 1 >= retry.max_attempts {
                    if status.as_u16() == 429 {
                        return Err(SorterError::RateLimited(
                            format!("status {status} after {attempt} retries")
                        ));
                    }
                    return Err(SorterError::Http(
                        format!("status {status} after {attempt} retries: {body}")
                    ));
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng);
                warn!(status = %status, backoff = ?backoff.as_millis(), "http.retry");
                sleep(backoff).await;
                attempt += 1;
            },
            Err(e) => {
                if attempt + 1 >= retry.max_attempts {
                    return Err(e.into());
                }
                let backoff = generate_backoff(retry.base_backoff, attempt, retry.jitter, &mut rng);
                warn!(error = %e, backoff = ?backoff.as_millis(), "http.retry.error");
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SpotifyClient {
    pub http: Client,
    pub cfg: SpotifyConfig,
    pub retry: RetryConfig
}

impl SpotifyClient {
    pub fn new(http_config: &HttpConfig, cfg: &SpotifyConfig) ->
        Result<Self, SorterError> {

        let http = base_client(http_config)?;
        Ok( Self {
            http,
            cfg: cfg.clone(),
            retry: http_config.retry.clone()
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SorterError> {
        self.cfg.api_base.join(path)
            .map_err(|e| SorterError::Config(format!("bad endpoint {path}: {e}")))
    }

    /// POST token_url grant_type=authorization_code
    pub fn authorization_code_request(&self, code: &str) -> RequestBuilder {
        self.http
            .post(self.cfg.token_url.clone())
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.cfg.redirect_uri.as_str()),
                ("client_id", self.cfg.client_id.as_str()),
                ("client_secret", self.cfg.client_secret.as_str()),
            ])
    }

    ///
    /// Swaps an authorization code for the provider's token json,
    /// returned verbatim. Never retried: codes are single-use.
    ///
    pub async fn exchange_code(&self, code: &str) -> Result<serde_json::Value, SorterError> {
        let failed = || SorterError::BadRequest("Failed to retrieve access token".to_string());
        let response = match self.authorization_code_request(code).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "auth.exchange.unreachable");
                return Err(failed());
            }
        };
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        if status.is_success() {
            Ok(body)
        } else {
            warn!(status = %status, body = %body, "auth.exchange.failed");
            Err(failed())
        }
    }

    /// GET /v1/me
    pub fn current_user(&self, bearer: &str) -> Result<RequestBuilder, SorterError> {
        Ok( self.http.get(self.endpoint("me")?).bearer_auth(bearer) )
    }

    /// GET /v1/playlists/{id}?fields=name
    pub fn playlist(&self, playlist_id: &str, bearer: &str) ->
        Result<RequestBuilder, SorterError> {
        let url = self.endpoint(&format!("playlists/{playlist_id}"))?;
        Ok( self.http.get(url).bearer_auth(bearer).query(&[("fields", "id,name")]) )
    }

    /// GET /v1/playlists/{id}/tracks?offset=&limit=
    pub fn playlist_items(&self, playlist_id: &str, offset: u32, limit: u32, bearer: &str) ->
        Result<RequestBuilder, SorterError> {
        let url = self.endpoint(&format!("playlists/{playlist_id}/tracks"))?;
        Ok( self.http.get(url).bearer_auth(bearer).query(&[
            ("offset", offset.to_string()),
            ("limit", limit.to_string())
        ]) )
    }

    /// GET /v1/artists?ids=...
    pub fn artists(&self, ids_csv: &str, bearer: &str) -> Result<RequestBuilder, SorterError> {
        let url = self.endpoint("artists")?;
        Ok( self.http.get(url).bearer_auth(bearer).query(&[("ids", ids_csv)]) )
    }

    /// GET /v1/audio-features?ids=...
    pub fn audio_features(&self, ids_csv: &str, bearer: &str) ->
        Result<RequestBuilder, SorterError> {
        let url = self.endpoint("audio-features")?;
        Ok( self.http.get(url).bearer_auth(bearer).query(&[("ids", ids_csv)]) )
    }

    /// POST /v1/users/{user_id}/playlists
    pub fn create_playlist(&self, user_id: &str, name: &str, description: &str, bearer: &str)
        -> Result<RequestBuilder, SorterError> {
        let url = self.endpoint(&format!("users/{user_id}/playlists"))?;
        Ok( self.http.post(url).bearer_auth(bearer).json(&serde_json::json!({
            "name": name,
            "public": false,
            "description": description
        })) )
    }

    /// POST /v1/playlists/{id}/tracks
    pub fn add_items(&self, playlist_id: &str, uris: &[String], bearer: &str) ->
        Result<RequestBuilder, SorterError> {
        let url = self.endpoint(&format!("playlists/{playlist_id}/tracks"))?;
        Ok( self.http.post(url).bearer_auth(bearer).json(&serde_json::json!({ "uris": uris })) )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_spotify_client as test_client;
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wiremock::matchers::{body_string_contains, method, path, query_param};

    #[test]
    fn backoff_grows_exponentially() {
        let mut rng = SmallRng::seed_from_u64(7);
        let base = Duration::from_millis(100);
        assert_eq!(generate_backoff(base, 0, false, &mut rng), Duration::from_millis(100));
        assert_eq!(generate_backoff(base, 3, false, &mut rng), Duration::from_millis(800));
        assert_eq!(generate_backoff(base, 9, false, &mut rng), Duration::from_millis(6400));

        let jittered = generate_backoff(base, 0, true, &mut rng);
        assert!(jittered >= Duration::from_millis(150) && jittered <= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() -> Result<(), SorterError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "u1"})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let value = http_with_retry(client.current_user("tok")?, &client.retry).await?;
        assert_eq!(value["id"], "u1");
        Ok(())
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() -> Result<(), SorterError> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/artists"))
            .and(query_param("ids", "a,b"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result = http_with_retry(client.artists("a,b", "tok")?, &client.retry).await;
        assert!(matches!(result, Err(SorterError::Http(_))));
        Ok(())
    }

    #[tokio::test]
    async fn exchange_code_passes_token_through() -> Result<(), SorterError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("code=good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc", "token_type": "Bearer", "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("code=bad"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let token = client.exchange_code("good").await?;
        assert_eq!(token["access_token"], "abc");
        assert_eq!(token["expires_in"], 3600);

        let failed = client.exchange_code("bad").await;
        assert!(matches!(failed, Err(SorterError::BadRequest(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_a_bad_request() {
        let server = MockServer::start().await;
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let mut client = test_client(&server);
        client.cfg.token_url = Url::parse(&format!("http://{addr}/api/token")).unwrap();

        match client.exchange_code("any").await {
            Err(SorterError::BadRequest(message)) => {
                assert_eq!(message, "Failed to retrieve access token");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
