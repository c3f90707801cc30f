/// Image-to-video generator
///
/// One component for every page variant: the differences (file cap, step
/// counter, endpoint) all come from `ClientConfig`.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::config::{ClientConfig, DEFAULT_PROMPT};
use crate::error::SubmitError;
use crate::resources::{Resource, ResourceManager, ResultHandle};
use crate::session::{InputFile, UploadSession};
use crate::submission::{SubmissionController, SubmissionState};
use crate::transport::{GenerateTransport, HttpTransport};

pub struct Generator {
    session: UploadSession,
    controller: SubmissionController,
    transport: Arc<dyn GenerateTransport>,
    resources: Arc<ResourceManager>,
    prompt: String,
    fields: BTreeMap<String, String>,
}

impl Generator {
    /// Generator talking HTTP to `config.base_url`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config).context("Failed to build HTTP client")?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn GenerateTransport>) -> Self {
        let resources = ResourceManager::shared();
        Self {
            session: UploadSession::new(resources.clone()),
            controller: SubmissionController::new(config, transport.clone(), resources.clone()),
            transport,
            resources,
            prompt: DEFAULT_PROMPT.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        self.controller.config()
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn add(&mut self, files: Vec<InputFile>) {
        self.session.add(files);
    }

    /// Read images from disk and append them; nothing is added if any read fails
    pub fn add_paths<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        let files = paths
            .iter()
            .map(|p| InputFile::from_path(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.session.add(files);
        Ok(())
    }

    pub fn remove_at(&mut self, index: usize) -> Option<InputFile> {
        self.session.remove_at(index)
    }

    /// Drop every file and preview, release the result and go back to `Idle`
    pub fn clear(&mut self) {
        self.session.clear();
        self.controller.reset();
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    /// Extra text field sent with the upload (e.g. a model identifier)
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Submit the current selection with the prompt and extra fields
    pub async fn submit(&self) -> Result<ResultHandle, SubmitError> {
        let mut fields = self.fields.clone();
        fields.insert(self.config().prompt_field.clone(), self.prompt.clone());
        self.controller.submit(&self.session, &fields).await
    }

    pub fn cancel(&self) -> bool {
        self.controller.cancel()
    }

    pub fn state(&self) -> SubmissionState {
        self.controller.state()
    }

    pub fn progress(&self) -> u8 {
        self.controller.progress()
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.controller.subscribe()
    }

    /// Bytes and type of the current result video
    pub fn result(&self) -> Option<Resource> {
        self.controller
            .result()
            .and_then(|handle| self.resources.resolve(&handle))
    }

    /// Probe the server's health endpoint
    pub async fn is_available(&self) -> bool {
        self.transport.is_available().await
    }

    /// Write the result video to `path`. A directory gets the configured
    /// download name appended. Returns the written path.
    pub fn save_result(&self, path: &Path) -> Result<PathBuf> {
        let video = self
            .result()
            .context("No generated video to save")?;

        let target = if path.is_dir() {
            path.join(&self.config().download_name)
        } else {
            path.to_path_buf()
        };

        std::fs::write(&target, &video.bytes[..])
            .with_context(|| format!("Failed to write video: {:?}", target))?;
        info!("saved {} bytes to {:?}", video.bytes.len(), target);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{GenerateRequest, TransportResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct EchoTransport {
        seen: Mutex<Vec<GenerateRequest>>,
    }

    #[async_trait]
    impl GenerateTransport for EchoTransport {
        fn name(&self) -> &str {
            "echo"
        }

        async fn send(&self, request: GenerateRequest) -> Result<TransportResponse, TransportError> {
            let count = request.files.len();
            self.seen.lock().push(request);
            Ok(TransportResponse {
                status: 200,
                body: Arc::from(format!("video of {} clips", count).into_bytes()),
            })
        }
    }

    fn generator() -> (Generator, Arc<EchoTransport>) {
        let transport = Arc::new(EchoTransport {
            seen: Mutex::new(Vec::new()),
        });
        let generator = Generator::with_transport(ClientConfig::default(), transport.clone());
        (generator, transport)
    }

    fn image(name: &str) -> InputFile {
        InputFile::new(name, "image/jpeg", vec![0xff, 0xd8])
    }

    #[tokio::test]
    async fn test_submit_sends_prompt_and_fields() {
        let (mut generator, transport) = generator();
        generator.add(vec![image("a.jpg"), image("b.jpg")]);
        generator.set_prompt("sunset stroll");
        generator.set_field("model", "I2V-01-Director");

        generator.submit().await.unwrap();

        let seen = transport.seen.lock();
        assert_eq!(
            seen[0].fields,
            vec![
                ("model".to_string(), "I2V-01-Director".to_string()),
                ("prompt".to_string(), "sunset stroll".to_string()),
            ]
        );
        assert_eq!(generator.result().unwrap().bytes.as_ref(), b"video of 2 clips");
    }

    #[tokio::test]
    async fn test_default_prompt_prefilled() {
        let (generator, _) = generator();
        assert_eq!(generator.prompt(), DEFAULT_PROMPT);
    }

    #[tokio::test]
    async fn test_clear_after_success() {
        let (mut generator, _) = generator();
        generator.add(vec![image("a.jpg")]);
        let handle = generator.submit().await.unwrap();

        generator.clear();

        assert_eq!(generator.state(), SubmissionState::Idle);
        assert_eq!(generator.progress(), 0);
        assert!(generator.session().is_empty());
        assert!(!generator.resources().is_live(&handle));
        assert_eq!(generator.resources().live_count(), 0);
    }

    #[tokio::test]
    async fn test_save_result_into_directory() {
        let (mut generator, _) = generator();
        generator.add(vec![image("a.jpg")]);
        generator.submit().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let written = generator.save_result(dir.path()).unwrap();

        assert_eq!(written, dir.path().join("tour-agency-preview.mp4"));
        assert_eq!(std::fs::read(&written).unwrap(), b"video of 1 clips");
    }

    #[tokio::test]
    async fn test_save_without_result_fails() {
        let (generator, _) = generator();
        let dir = tempfile::tempdir().unwrap();
        let err = generator.save_result(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No generated video"));
    }

    #[test]
    fn test_add_paths_is_all_or_nothing() {
        let (mut generator, _) = generator();
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        std::fs::write(&good, b"png").unwrap();
        let missing = dir.path().join("missing.png");

        assert!(generator.add_paths(&[good.clone(), missing]).is_err());
        assert!(generator.session().is_empty());

        generator.add_paths(&[good]).unwrap();
        assert_eq!(generator.session().len(), 1);
        assert_eq!(generator.resources().live_count(), 1);
    }
}
