pub mod classify;
pub mod completion;
pub mod driver;
pub mod events;
pub mod guard;
pub mod machine;
pub mod phase;
pub mod retry;

use std::fmt;

/// The two interactive request kinds the backend can park a job on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Icon,
    UrlName,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Icon => "icon",
            Self::UrlName => "url_name",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
