//! # PeerCall Directory
//!
//! Client for the REST directory that stores each user's contact list, plus
//! helpers for reading the local [`Identity`](peercall_core::Identity) out of
//! the token the authentication service issues.
//!
//! ```rust,no_run
//! use peercall_directory::{DirectoryClient, DirectoryConfig};
//!
//! # async fn example() -> peercall_directory::DirectoryResult<()> {
//! let client = DirectoryClient::new(DirectoryConfig::new("http://localhost:5000/api", "token"))?;
//! for contact in client.list_contacts().await? {
//!     println!("{} ({})", contact.username, contact.id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod token;

pub use client::{Contact, DirectoryClient, AUTH_HEADER};
pub use config::DirectoryConfig;
pub use error::{DirectoryError, DirectoryResult};
pub use token::{identity_from_token, TokenClaims};
