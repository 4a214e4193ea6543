//! ndt7 speed-test client.
//!
//! Runs one measurement session against an ndt7 server:
//!
//! - **Download**: the server floods a WebSocket, the client counts bytes
//! - **Upload**: the client paces growing binary messages to the server
//! - **Supervision**: each subtest runs in its own task under a watchdog
//!   and resolves once to a [`SubtestOutcome`]
//! - **Aggregation**: the two outcomes become a [`Results`] record
//!
//! ```no_run
//! # async fn demo() -> Result<(), ndt7_client::Ndt7Error> {
//! use ndt7_client::{Callbacks, Client, ClientConfig};
//!
//! let callbacks = Callbacks::new()
//!     .on_error(|e| eprintln!("{e}"))
//!     .on_final_measurements(|r| println!("{} Mbps down", r.bandwidth_download));
//! let status = Client::new(ClientConfig::default(), callbacks).run().await?;
//! std::process::exit(status.code() as i32);
//! # }
//! ```

pub mod aggregate;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod locate;
pub mod pacing;
pub mod session;
pub mod supervisor;
pub mod worker;

pub use callbacks::Callbacks;
pub use config::{ClientConfig, ClientConfigInput};
pub use error::Ndt7Error;
pub use locate::ServerUrls;
pub use ndt7_common::models::{Results, SubtestOutcome, TestStatus};
pub use ndt7_common::protocol::{ClientMeasurement, ServerMeasurement, SubtestKind};
pub use session::Client;
pub use supervisor::Supervisor;
