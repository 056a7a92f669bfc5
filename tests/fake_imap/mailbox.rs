//! Test data model for the fake IMAP server
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .uids([1, 2, 3])
//!     .folder("Sent")
//!     .build();
//! ```
//!
//! Message bodies are never fetched by the sync engine, so a folder is
//! just its UIDVALIDITY and the UIDs it holds.

#[derive(Debug, Clone)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub uid_validity: u32,
    pub uids: Vec<u32>,
}

impl Folder {
    /// Next UID the server would assign.
    pub fn uid_next(&self) -> u32 {
        self.uids.iter().max().map_or(1, |max| max + 1)
    }
}

pub struct MailboxBuilder {
    folders: Vec<Folder>,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self {
            folders: Vec::new(),
        }
    }

    /// Add a new, empty folder with UIDVALIDITY 1.
    pub fn folder(mut self, name: &str) -> Self {
        self.folders.push(Folder {
            name: name.to_string(),
            uid_validity: 1,
            uids: Vec::new(),
        });
        self
    }

    /// Put messages with these UIDs into the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn uids(mut self, uids: impl IntoIterator<Item = u32>) -> Self {
        self.folders
            .last_mut()
            .expect("call .folder() before .uids()")
            .uids
            .extend(uids);
        self
    }

    pub fn build(self) -> Mailbox {
        Mailbox {
            folders: self.folders,
        }
    }
}
