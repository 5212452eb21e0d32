use std::collections::HashMap;
use std::str::FromStr;

use crate::config::UserEntry;
use crate::error::{ExecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    /// Reading covers status and output; writing adds starting and stopping.
    pub fn allows(&self, operation: Operation) -> bool {
        match operation {
            Operation::Status | Operation::Output => true,
            Operation::Run | Operation::Stop => *self == Permission::Write,
        }
    }
}

impl FromStr for Permission {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            other => Err(ExecError::InvalidArgument(format!(
                "unknown permission {other:?}, expected read or write"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Run,
    Status,
    Output,
    Stop,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Run => write!(f, "run commands"),
            Operation::Status => write!(f, "read job status"),
            Operation::Output => write!(f, "read job output"),
            Operation::Stop => write!(f, "stop jobs"),
        }
    }
}

/// Identity (client certificate common name) to permission.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, Permission>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut directory = Self::new();
        for entry in entries {
            directory.insert(&entry.identity, entry.permission);
        }
        directory
    }

    pub fn insert(&mut self, identity: &str, permission: Permission) {
        self.users.insert(identity.to_string(), permission);
    }

    pub fn permission(&self, identity: &str) -> Option<Permission> {
        self.users.get(identity).copied()
    }

    pub fn authorize(&self, identity: &str, operation: Operation) -> Result<()> {
        let allowed = self
            .permission(identity)
            .is_some_and(|permission| permission.allows(operation));

        tracing::debug!(identity, %operation, allowed, "Authorization check");
        if allowed {
            Ok(())
        } else {
            Err(ExecError::Unauthorized {
                identity: identity.to_string(),
                operation,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
