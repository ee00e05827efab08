use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::info;

use crate::domain::{BiomaterialId, Entity};
use crate::error::ExportError;

pub trait IngestClient: Send + Sync {
    fn entity_by_uuid(&self, collection: &str, id: &BiomaterialId) -> Result<Entity, ExportError>;

    fn related(&self, entity: &Entity, relation: &str) -> Result<Vec<Entity>, ExportError>;
}

#[derive(Clone)]
pub struct IngestHttpClient {
    client: Client,
    base_url: String,
}

impl IngestHttpClient {
    pub fn new(base_url: &str) -> Result<Self, ExportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hca-cellxgene/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ExportError::IngestHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ExportError::IngestHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn find_by_uuid_url(&self, collection: &str, id: &BiomaterialId) -> String {
        format!(
            "{}/{collection}/search/findByUuid?uuid={id}",
            self.base_url
        )
    }

    fn get_json(&self, url: &str) -> Result<Value, ExportError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| ExportError::IngestHttp(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ExportError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ingest request failed".to_string());
        Err(ExportError::IngestStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, ExportError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(ExportError::IngestHttp(err.to_string()));
                }
            }
        }
    }
}

impl IngestClient for IngestHttpClient {
    fn entity_by_uuid(&self, collection: &str, id: &BiomaterialId) -> Result<Entity, ExportError> {
        let url = self.find_by_uuid_url(collection, id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status().as_u16() == 404 {
            return Err(ExportError::NotFound(id.to_string()));
        }
        let response = Self::handle_status(response)?;
        let document: Value = response
            .json()
            .map_err(|err| ExportError::IngestHttp(err.to_string()))?;
        Entity::from_document(document)
    }

    fn related(&self, entity: &Entity, relation: &str) -> Result<Vec<Entity>, ExportError> {
        let Some(href) = entity.link(relation) else {
            return Ok(Vec::new());
        };
        info!(
            "fetching {relation} of {} {}",
            entity.entity_type, entity.uuid
        );
        collect_pages(strip_template(href).to_string(), |url| self.get_json(url))
    }
}

pub fn collect_pages<F>(first_url: String, mut fetch: F) -> Result<Vec<Entity>, ExportError>
where
    F: FnMut(&str) -> Result<Value, ExportError>,
{
    let mut url = first_url;
    let mut entities = Vec::new();
    loop {
        let mut page = fetch(&url)?;
        let next = page
            .pointer("/_links/next/href")
            .and_then(Value::as_str)
            .map(|href| strip_template(href).to_string());
        let embedded = page
            .get_mut("_embedded")
            .and_then(Value::as_object_mut)
            .and_then(|collections| collections.values_mut().next())
            .map(Value::take);
        if let Some(Value::Array(documents)) = embedded {
            for document in documents {
                entities.push(Entity::from_document(document)?);
            }
        }
        match next {
            Some(next) => url = next,
            None => break,
        }
    }
    Ok(entities)
}

fn strip_template(href: &str) -> &str {
    match href.find('{') {
        Some(pos) => &href[..pos],
        None => href,
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
