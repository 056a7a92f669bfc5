//! Fake IMAP server for integration testing
//!
//! Speaks just enough IMAP for the sync engine:
//!
//! TCP -> greeting -> STARTTLS -> TLS handshake -> LOGIN -> SELECT /
//! UID SEARCH -> LOGOUT
//!
//! or, in implicit-TLS mode, TLS handshake -> greeting -> LOGIN -> ...
//!
//! - `server` -- TCP listener, TLS setup, command loop
//! - `responses` -- one writer per supported command
//! - `mailbox` -- folders with their UIDs, shared with the test

pub mod mailbox;
mod responses;
mod server;

pub use mailbox::MailboxBuilder;
pub use server::FakeImapServer;
