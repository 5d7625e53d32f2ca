pub mod config;
pub mod error;
pub mod fetch;
pub mod observer;
pub mod origin;
pub mod planner;
pub mod playback;
pub mod scheduler;
pub mod segment;
pub mod session;
pub mod sink;
pub mod util;

pub use config::StreamConfig;
pub use error::*;
pub use origin::Origin;
pub use segment::*;
pub use session::{SessionHandle, SessionOutcome, SessionState, Streamer, StreamingSession};
pub use util::{http::HttpClient, range::ByteRange};

// ┌──────────────┐  POST /streamFileInfo   ┌──────────────────┐
// │              ├─────────────────────────►                  │
// │              │                         │   Origin (node)  │
// │              │  GET /streaming/{name}  │                  │
// │   Session    ├────────┬────────────────►                  │
// │              │        │  Range: k      └──────────────────┘
// │  [select!]   │        │
// │              ◄────────┘ segment k         ┌───────────────┐
// │              │                            │               │
// │              ├── append k ───────────────►│  Playback     │
// │              │                            │  element      │
// │              ◄── TimeUpdate / Seeking ────┤               │
// └──────────────┘                            └───────────────┘
//
// Segment k + 1 is requested only after segment k was appended and playback crossed the
// prefetch threshold of the segment currently playing.
