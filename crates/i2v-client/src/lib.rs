/// Image-to-video client
///
/// Collects input images, uploads them to a generation server in a single
/// multipart request and keeps the returned video addressable until it is
/// replaced or cleared.

pub mod config;
pub mod error;
pub mod generator;
pub mod progress;
pub mod resources;
pub mod session;
pub mod submission;
pub mod transport;

pub use config::{ClientConfig, ProgressConfig, BASE_URL_ENV, DEFAULT_BASE_URL, DEFAULT_PROMPT};
pub use error::{SubmitError, TransportError, ValidationError};
pub use generator::Generator;
pub use progress::{clip_step, HeuristicProgress};
pub use resources::{PreviewHandle, Resource, ResourceHandle, ResourceManager, ResourceStats, ResultHandle};
pub use session::{InputFile, UploadSession};
pub use submission::{SubmissionController, SubmissionState};
pub use transport::{GenerateRequest, GenerateTransport, HttpTransport, TransportResponse};
