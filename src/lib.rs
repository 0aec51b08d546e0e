//! Easy Mock Server
//!
//! An HTTP mock server whose routes are the files under a resources
//! directory. Each request path is resolved against that tree, and the
//! matched file is either proxied to the URL it contains or resolved as a
//! template into a JSON response.
//!
//! # Features
//!
//! - **Filesystem Routing**: `_name` / `{name}` entries bind path parameters
//! - **Rule Templates**: `"name|rule"` keys randomize lists, objects, and scalars
//! - **Placeholders**: `@name`, `@integer(1, 9)`, `@date(yyyy-MM-dd)` and friends
//! - **Generators**: Handlebars expressions reading the request and resolved siblings
//! - **Proxy Routes**: a file holding a URL forwards method and query upstream
//! - **Hot Reload**: route table rebuilt on SIGHUP or file change
//!
//! # Example Template
//!
//! `resources/users/_id.json`:
//!
//! ```json
//! {
//!   "id": "{{req.params.id}}",
//!   "name": "@name",
//!   "tags|1-3": ["admin", "staff", "guest"],
//!   "active|1-1": true
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod placeholder;
pub mod proxy;
pub mod routes;
pub mod rules;
pub mod server;
pub mod template;

pub use config::MockServerConfig;
pub use dispatcher::{Dispatcher, MockResponse};
pub use error::MockError;
pub use routes::RouteRegistry;
pub use template::TemplateEngine;
