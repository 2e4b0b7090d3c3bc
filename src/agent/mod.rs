pub mod endpoint;
pub mod error;
pub mod events;
pub mod http;
pub mod mock;
pub mod stream;

pub use endpoint::{AgentKind, GenerationEndpoint, RawEventChannel};
pub use error::AgentError;
pub use events::*;
pub use http::HttpEndpoint;
pub use mock::{MockAttempt, MockEndpoint, MockEventBuilder, MockFrame};
pub use stream::{decode_message, EventDecoder, DECODE_FAILURE_MESSAGE};
