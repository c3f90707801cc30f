/// Network seam between the submission controller and the generation server
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::session::InputFile;

/// One outbound generate request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Files in selection order
    pub files: Vec<InputFile>,

    /// Field name shared by every file part
    pub file_field: String,

    /// Flat text fields, sent after the files
    pub fields: Vec<(String, String)>,
}

impl GenerateRequest {
    /// Build the multipart form: every file under one field name, order
    /// preserved, then one text part per auxiliary field.
    pub fn to_form(&self) -> Result<reqwest::multipart::Form, TransportError> {
        let mut form = reqwest::multipart::Form::new();

        for file in &self.files {
            let part = reqwest::multipart::Part::bytes(file.bytes().to_vec())
                .file_name(file.name.clone())
                .mime_str(&file.mime)
                .map_err(|e| TransportError::Other(format!("invalid content type {}: {}", file.mime, e)))?;
            form = form.part(self.file_field.clone(), part);
        }

        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }

        Ok(form)
    }
}

/// Settled HTTP exchange
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Arc<[u8]>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends generate requests
#[async_trait]
pub trait GenerateTransport: Send + Sync {
    /// Transport name
    fn name(&self) -> &str;

    /// Send one request and read the whole response body
    async fn send(&self, request: GenerateRequest) -> Result<TransportResponse, TransportError>;

    /// Check if the server answers its health probe
    async fn is_available(&self) -> bool {
        true
    }
}

/// `reqwest` implementation
pub struct HttpTransport {
    generate_url: String,
    health_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            generate_url: config.generate_url(),
            health_url: config.health_url(),
            client,
        })
    }
}

#[async_trait]
impl GenerateTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: GenerateRequest) -> Result<TransportResponse, TransportError> {
        let form = request.to_form()?;
        info!(
            "POST {} ({} files, {} fields)",
            self.generate_url,
            request.files.len(),
            request.fields.len()
        );

        let response = self
            .client
            .post(&self.generate_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!("response {} ({} bytes)", status, body.len());

        Ok(TransportResponse {
            status,
            body: Arc::from(&body[..]),
        })
    }

    async fn is_available(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
