//! Stubsmith
//!
//! A configurable HTTP mock server that answers requests with stubbed
//! responses. Useful for testing, development, and demos.
//!
//! # Features
//!
//! - **Route Matching**: Match by exact method and path pattern with variables
//! - **Static Responses**: Return fixed bodies verbatim
//! - **Dynamic Templates**: Render bodies and headers from the request
//! - **Dynamic Loading**: Resolve the route table per request from a [`Loader`]
//! - **Latency Simulation**: Delay individual responses
//!
//! # Example Configuration
//!
//! ```yaml
//! routes:
//!   - name: get-item
//!     path: /items/{id}
//!     method: GET
//!     response:
//!       type: DYNAMIC
//!       status_code: 200
//!       body: '{"id": "{{ requestVar "id" }}", "trace": "{{ uuid "ulid" }}"}'
//!       headers:
//!         Item-ID: '{{ requestVar "id" }}'
//!       delay_ms: 100
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod generators;
pub mod loader;
pub mod matcher;
pub mod response;
pub mod template;

pub use config::MockServerConfig;
pub use dispatcher::Dispatcher;
pub use loader::{Loader, TableFileLoader};
