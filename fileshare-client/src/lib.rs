pub mod api;
pub mod config;
pub mod error;
pub mod notify;
pub mod qr;
pub mod session;
pub mod shell;

pub use api::ApiClient;
pub use error::ClientError;
pub use notify::{Notifier, RecordingNotifier, TerminalNotifier};
pub use session::FileShareClient;
